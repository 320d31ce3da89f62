//! Autoscaled managed node group and the cluster-autoscaler chart
//!
//! The autoscaler runs under its own IAM role, assumed through the cluster's
//! OIDC provider by the `cluster-autoscaler` service account.

use anyhow::Result;
use declarative::{
    GraphBuilder, PropertyValue, Reference, ResourceId, ResourceNode, Segment, properties,
};
use serde_json::json;

use super::catalog::{HELM_CHART, IAM_POLICY, IAM_ROLE, NAMESPACE, NODE_GROUP, ROLE_POLICY_ATTACHMENT};
use super::cluster::Cluster;
use super::network::Network;
use crate::config::StackConfig;

const NAMESPACE_NAME: &str = "cluster-autoscaler";
const SERVICE_ACCOUNT: &str = "cluster-autoscaler";

#[derive(Debug, Clone)]
pub struct Autoscaling {
    pub node_group: ResourceId,
    pub chart: ResourceId,
}

/// Permissions the autoscaler needs to inspect and resize node groups
fn autoscaler_policy() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": [
                "autoscaling:DescribeAutoScalingGroups",
                "autoscaling:DescribeAutoScalingInstances",
                "autoscaling:DescribeLaunchConfigurations",
                "autoscaling:DescribeTags",
                "autoscaling:SetDesiredCapacity",
                "autoscaling:TerminateInstanceInAutoScalingGroup",
                "ec2:DescribeLaunchTemplateVersions",
            ],
            "Resource": "*",
        }],
    })
}

/// Web-identity trust policy for the autoscaler's service account
fn trust_policy(cluster: &ResourceId) -> PropertyValue {
    let subject = PropertyValue::format([
        Segment::Ref(Reference::new(cluster, "oidc_provider.issuer")),
        Segment::Text(":sub".to_string()),
    ]);

    PropertyValue::map([(
        "statements",
        PropertyValue::list([PropertyValue::map([
            (
                "actions",
                PropertyValue::literal(json!(["sts:AssumeRoleWithWebIdentity"])),
            ),
            ("effect", PropertyValue::from("Allow")),
            (
                "conditions",
                PropertyValue::list([PropertyValue::map([
                    ("test", PropertyValue::from("StringEquals")),
                    ("variable", subject),
                    (
                        "values",
                        PropertyValue::literal(json!([format!(
                            "system:serviceaccount:{NAMESPACE_NAME}:{SERVICE_ACCOUNT}"
                        )])),
                    ),
                ])]),
            ),
            (
                "principals",
                PropertyValue::list([PropertyValue::map([
                    ("type", PropertyValue::from("Federated")),
                    (
                        "identifiers",
                        PropertyValue::list([PropertyValue::reference(cluster, "oidc_provider.arn")]),
                    ),
                ])]),
            ),
        ])]),
    )])
}

pub fn declare(
    builder: &mut GraphBuilder,
    config: &StackConfig,
    network: &Network,
    cluster: &Cluster,
) -> Result<Autoscaling> {
    let deployment = config.deployment_name();
    let on_cluster = || PropertyValue::reference(&cluster.cluster, "name");

    let namespace = builder.declare(
        NAMESPACE,
        NAMESPACE_NAME,
        properties([
            ("cluster", on_cluster()),
            ("name", PropertyValue::from(NAMESPACE_NAME)),
        ]),
    )?;

    let role = builder.declare(
        IAM_ROLE,
        "cluster-autoscaler",
        properties([("assume_role_policy", trust_policy(&cluster.cluster))]),
    )?;

    let policy = builder.declare(
        IAM_POLICY,
        "autoscaler-iam-policy",
        properties([("policy", PropertyValue::literal(autoscaler_policy()))]),
    )?;

    builder.declare(
        ROLE_POLICY_ATTACHMENT,
        "autoscaler-role-attach-policy",
        properties([
            ("policy_arn", PropertyValue::reference(&policy, "arn")),
            ("role", PropertyValue::reference(&role, "name")),
        ]),
    )?;

    let node_group = builder.declare(
        NODE_GROUP,
        "rpa-ng",
        properties([
            ("cluster_name", on_cluster()),
            ("node_group_name", PropertyValue::from("aws-managed-ng1")),
            ("node_role_arn", PropertyValue::reference(&cluster.node_role, "arn")),
            (
                "subnet_ids",
                PropertyValue::list(
                    network
                        .private_subnets
                        .iter()
                        .map(|id| PropertyValue::reference(id, "id")),
                ),
            ),
            (
                "instance_types",
                PropertyValue::literal(json!([config.instance_type])),
            ),
            (
                "labels",
                PropertyValue::literal(json!({ "ondemand": "true", "Environment": "development" })),
            ),
            (
                "scaling_config",
                PropertyValue::literal(json!({
                    "min_size": config.min_size,
                    "desired_size": config.desired_size,
                    "max_size": config.max_size,
                })),
            ),
        ]),
    )?;

    let values = PropertyValue::map([
        ("cloudProvider", PropertyValue::from("aws")),
        ("awsRegion", PropertyValue::from(config.region.clone())),
        (
            "autoDiscovery",
            PropertyValue::literal(json!({ "enabled": true, "clusterName": deployment })),
        ),
        (
            "rbac",
            PropertyValue::map([
                ("create", PropertyValue::from(true)),
                (
                    "serviceAccount",
                    PropertyValue::map([
                        ("create", PropertyValue::from(true)),
                        ("name", PropertyValue::from(SERVICE_ACCOUNT)),
                        (
                            "annotations",
                            PropertyValue::map([(
                                "eks.amazonaws.com/role-arn",
                                PropertyValue::reference(&role, "arn"),
                            )]),
                        ),
                    ]),
                ),
            ]),
        ),
    ]);

    let chart = builder.add_node(
        ResourceNode::new(
            HELM_CHART,
            "autoscaler",
            properties([
                ("cluster", on_cluster()),
                ("namespace", PropertyValue::reference(&namespace, "name")),
                ("chart", PropertyValue::from("cluster-autoscaler-chart")),
                (
                    "repo",
                    PropertyValue::from("https://kubernetes.github.io/autoscaler"),
                ),
                (
                    "version",
                    PropertyValue::from(config.autoscaler_chart_version.clone()),
                ),
                ("values", values),
            ]),
        )
        // Nothing to scale until the node group exists
        .depends_on(&node_group),
    )?;

    Ok(Autoscaling { node_group, chart })
}
