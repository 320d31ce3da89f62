//! The managed stack: network, EKS cluster, autoscaling, certificate, ingress, DNS
//!
//! Each layer declares its resources into a shared [`GraphBuilder`] and hands
//! back the ids the next layer refers to. Values only flow through
//! references, so the graph (not declaration order) decides what runs first.

pub mod autoscaling;
pub mod catalog;
pub mod cluster;
pub mod domain;
pub mod ingress;
pub mod network;

use anyhow::Result;
use declarative::{Catalog, Graph, GraphBuilder, Reference, StateSnapshot};
use serde_json::Value;
use std::sync::Arc;

use crate::config::StackConfig;

/// Output path of the load balancer hostname on the traefik service lookup
pub(crate) const LOAD_BALANCER_HOSTNAME: &str = "status.load_balancer.ingress.0.hostname";

/// A named value exported by the stack
#[derive(Debug, Clone)]
pub struct StackOutput {
    pub name: &'static str,
    pub reference: Reference,
}

impl StackOutput {
    /// Read the value from the last applied state
    pub fn resolve(&self, snapshot: &StateSnapshot) -> Option<Value> {
        snapshot
            .get(&self.reference.target)
            .and_then(|record| self.reference.lookup(&record.outputs))
            .cloned()
    }
}

/// Desired graph plus the outputs exported from it
#[derive(Debug)]
pub struct Stack {
    pub graph: Graph,
    pub outputs: Vec<StackOutput>,
}

/// Declare every resource of the stack and validate the resulting graph
pub fn build(config: &StackConfig, catalog: Arc<Catalog>) -> Result<Stack> {
    let mut builder = GraphBuilder::new(catalog);

    let network = network::declare(&mut builder, config)?;
    let cluster = cluster::declare(&mut builder, config, &network)?;
    let autoscaling = autoscaling::declare(&mut builder, config, &network, &cluster)?;
    log::debug!(
        "Node group {} scaled by {}",
        autoscaling.node_group,
        autoscaling.chart
    );
    let certificate = domain::declare_certificate(&mut builder, config)?;
    let ingress = ingress::declare(&mut builder, config, &cluster, &certificate)?;
    let alias = domain::declare_alias(&mut builder, config, &certificate.zone, &ingress.service)?;
    log::debug!("{alias} points at {}", ingress.chart);

    let outputs = vec![
        StackOutput {
            name: "clusterVPCSecurityGroupId",
            reference: Reference::new(&cluster.cluster, "vpc_config.cluster_security_group_id"),
        },
        StackOutput {
            name: "clusterId",
            reference: Reference::new(&cluster.cluster, "id"),
        },
        StackOutput {
            name: "vpcId",
            reference: Reference::new(&network.vpc, "id"),
        },
        StackOutput {
            name: "traefikHostname",
            reference: Reference::new(&ingress.service, LOAD_BALANCER_HOSTNAME),
        },
    ];

    log::info!("Declared {} resources", builder.len());
    let graph = builder.finish()?;
    Ok(Stack { graph, outputs })
}

// ============================================================================
// Tests
// ============================================================================
