//! Traefik behind an NLB terminating TLS with the ACM certificate

use anyhow::Result;
use declarative::{GraphBuilder, PropertyValue, ResourceId, ResourceNode, properties};
use serde_json::json;

use super::catalog::{CONFIG_GROUP, HELM_CHART, SECURITY_GROUP_RULE, SERVICE_LOOKUP};
use super::cluster::Cluster;
use super::domain::Certificate;
use crate::config::StackConfig;

/// NodePort the load balancer target groups forward to
const TRAEFIK_NODE_PORT: u32 = 32010;

#[derive(Debug, Clone)]
pub struct Ingress {
    pub chart: ResourceId,
    /// Lookup of the chart's `traefik` service, which carries the NLB hostname
    pub service: ResourceId,
}

pub fn declare(
    builder: &mut GraphBuilder,
    config: &StackConfig,
    cluster: &Cluster,
    certificate: &Certificate,
) -> Result<Ingress> {
    let on_cluster = || PropertyValue::reference(&cluster.cluster, "name");

    let annotations = PropertyValue::map([
        (
            "service.beta.kubernetes.io/aws-load-balancer-type",
            PropertyValue::from("nlb"),
        ),
        (
            "service.beta.kubernetes.io/aws-load-balancer-ssl-cert",
            PropertyValue::reference(&certificate.validation, "certificate_arn"),
        ),
        (
            "service.beta.kubernetes.io/aws-load-balancer-ssl-ports",
            PropertyValue::from("*"),
        ),
        (
            "service.beta.kubernetes.io/aws-load-balancer-proxy-protocol",
            PropertyValue::from("*"),
        ),
        (
            "service.beta.kubernetes.io/aws-load-balancer-backend-protocol",
            PropertyValue::from("http"),
        ),
    ]);

    let values = PropertyValue::map([
        (
            "logs",
            PropertyValue::literal(json!({
                "general": { "level": "INFO" },
                "access": { "enabled": true },
            })),
        ),
        (
            "service",
            PropertyValue::map([
                ("annotations", annotations),
                (
                    "spec",
                    PropertyValue::literal(json!({ "externalTrafficPolicy": "Local" })),
                ),
            ]),
        ),
    ]);

    let chart = builder.declare(
        HELM_CHART,
        "traefik",
        properties([
            ("cluster", on_cluster()),
            ("namespace", PropertyValue::from("default")),
            ("chart", PropertyValue::from("traefik")),
            ("repo", PropertyValue::from("https://helm.traefik.io/traefik")),
            (
                "version",
                PropertyValue::from(config.traefik_chart_version.clone()),
            ),
            ("values", values),
        ]),
    )?;

    let service = builder.declare(
        SERVICE_LOOKUP,
        "traefik",
        properties([
            ("cluster", on_cluster()),
            ("namespace", PropertyValue::from("default")),
            ("name", PropertyValue::from("traefik")),
            ("release", PropertyValue::reference(&chart, "id")),
        ]),
    )?;

    // Lets the NLB reach the traefik NodePort on the cluster's own security group
    builder.add_node(
        ResourceNode::new(
            SECURITY_GROUP_RULE,
            "traefik",
            properties([
                (
                    "security_group_id",
                    PropertyValue::reference(
                        &cluster.cluster,
                        "vpc_config.cluster_security_group_id",
                    ),
                ),
                (
                    "source_security_group_id",
                    PropertyValue::reference(&cluster.security_group, "id"),
                ),
                ("type", PropertyValue::from("ingress")),
                ("protocol", PropertyValue::from("tcp")),
                ("from_port", PropertyValue::from(TRAEFIK_NODE_PORT)),
                ("to_port", PropertyValue::from(TRAEFIK_NODE_PORT)),
            ]),
        )
        .depends_on(&cluster.cluster)
        .depends_on(&cluster.security_group),
    )?;

    // Middleware CRDs ship with the chart
    builder.add_node(
        ResourceNode::new(
            CONFIG_GROUP,
            "traefik-middlewares",
            properties([
                ("cluster", on_cluster()),
                (
                    "files",
                    PropertyValue::literal(json!(["strip-prefix-path.yaml"])),
                ),
            ]),
        )
        .depends_on(&chart),
    )?;

    Ok(Ingress { chart, service })
}
