//! EKS cluster, its worker node role and the load balancer security group

use anyhow::Result;
use declarative::{GraphBuilder, PropertyValue, ResourceId, properties};
use serde_json::json;

use super::catalog::{EKS_CLUSTER, IAM_ROLE, ROLE_POLICY_ATTACHMENT, SECURITY_GROUP, SECURITY_GROUP_RULE};
use super::network::Network;
use crate::config::StackConfig;

/// Managed policies every worker node needs
const NODE_POLICIES: [&str; 3] = [
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

#[derive(Debug, Clone)]
pub struct Cluster {
    pub cluster: ResourceId,
    /// Instance role of the worker nodes
    pub node_role: ResourceId,
    /// Security group the load balancer sits in
    pub security_group: ResourceId,
}

pub fn declare(builder: &mut GraphBuilder, config: &StackConfig, network: &Network) -> Result<Cluster> {
    let deployment = config.deployment_name();

    let node_role = builder.declare(
        IAM_ROLE,
        "cluster-ng-role",
        properties([(
            "assume_role_policy",
            PropertyValue::literal(json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": "sts:AssumeRole",
                    "Principal": { "Service": "ec2.amazonaws.com" },
                }],
            })),
        )]),
    )?;

    for (index, policy_arn) in NODE_POLICIES.iter().enumerate() {
        builder.declare(
            ROLE_POLICY_ATTACHMENT,
            &format!("my-cluster-ng-role-policy-{index}"),
            properties([
                ("role", PropertyValue::reference(&node_role, "name")),
                ("policy_arn", PropertyValue::from(*policy_arn)),
            ]),
        )?;
    }

    let security_group = builder.declare(
        SECURITY_GROUP,
        "default-eks-sg",
        properties([
            ("vpc_id", PropertyValue::reference(&network.vpc, "id")),
            // Health checks from the instances back to the NLB
            (
                "egress",
                PropertyValue::literal(json!([
                    { "protocol": "tcp", "from_port": 0, "to_port": 65535, "cidr_blocks": ["0.0.0.0/0"] },
                    { "protocol": "udp", "from_port": 0, "to_port": 65535, "cidr_blocks": ["0.0.0.0/0"] },
                ])),
            ),
        ]),
    )?;

    let subnet_refs = |ids: &[ResourceId]| {
        PropertyValue::list(ids.iter().map(|id| PropertyValue::reference(id, "id")))
    };

    let cluster = builder.declare(
        EKS_CLUSTER,
        &deployment,
        properties([
            ("name", PropertyValue::from(deployment.clone())),
            ("version", PropertyValue::from(config.kubernetes_version.clone())),
            ("vpc_id", PropertyValue::reference(&network.vpc, "id")),
            ("public_subnet_ids", subnet_refs(&network.public_subnets)),
            ("private_subnet_ids", subnet_refs(&network.private_subnets)),
            (
                "instance_role_arns",
                PropertyValue::list([PropertyValue::reference(&node_role, "arn")]),
            ),
            // Nodes come from the autoscaled managed node group instead
            ("skip_default_node_group", true.into()),
            ("create_oidc_provider", true.into()),
            ("tags", PropertyValue::literal(json!({ "Name": deployment }))),
        ]),
    )?;

    for (name, port, protocol) in [("https-access", 443u32, "https"), ("http-access", 80, "http")] {
        builder.declare(
            SECURITY_GROUP_RULE,
            name,
            properties([
                ("security_group_id", PropertyValue::reference(&security_group, "id")),
                ("type", PropertyValue::from("ingress")),
                ("protocol", PropertyValue::from("tcp")),
                ("from_port", PropertyValue::from(port)),
                ("to_port", PropertyValue::from(port)),
                ("cidr_blocks", PropertyValue::literal(json!(["0.0.0.0/0"]))),
                ("description", PropertyValue::from(format!("allow {protocol} access"))),
            ]),
        )?;
    }

    Ok(Cluster {
        cluster,
        node_role,
        security_group,
    })
}
