//! Resource types the stack uses and the policy the planner applies to them

use declarative::{Catalog, ResourceSchema};

pub const VPC: &str = "aws:ec2/vpc";
pub const SUBNET: &str = "aws:ec2/subnet";
pub const INTERNET_GATEWAY: &str = "aws:ec2/internet-gateway";
pub const SECURITY_GROUP: &str = "aws:ec2/security-group";
pub const SECURITY_GROUP_RULE: &str = "aws:ec2/security-group-rule";

pub const IAM_ROLE: &str = "aws:iam/role";
pub const IAM_POLICY: &str = "aws:iam/policy";
pub const ROLE_POLICY_ATTACHMENT: &str = "aws:iam/role-policy-attachment";

pub const EKS_CLUSTER: &str = "aws:eks/cluster";
pub const NODE_GROUP: &str = "aws:eks/node-group";

pub const NAMESPACE: &str = "kubernetes:core/v1/namespace";
pub const SERVICE_LOOKUP: &str = "kubernetes:core/v1/service-lookup";
pub const HELM_CHART: &str = "kubernetes:helm/v3/chart";
pub const CONFIG_GROUP: &str = "kubernetes:yaml/config-group";

pub const ZONE_LOOKUP: &str = "aws:route53/zone-lookup";
pub const RECORD: &str = "aws:route53/record";
pub const CERTIFICATE: &str = "aws:acm/certificate";
pub const CERTIFICATE_VALIDATION: &str = "aws:acm/certificate-validation";

/// Schemas for every type the stack declares
pub fn catalog() -> Catalog {
    Catalog::new()
        // Network
        .with(
            ResourceSchema::new(VPC)
                .required(["cidr_block"])
                .immutable(["cidr_block"]),
        )
        .with(
            ResourceSchema::new(SUBNET)
                .required(["vpc_id", "cidr_block", "availability_zone"])
                .immutable([
                    "vpc_id",
                    "cidr_block",
                    "availability_zone",
                    "map_public_ip_on_launch",
                ]),
        )
        .with(ResourceSchema::new(INTERNET_GATEWAY).required(["vpc_id"]))
        .with(
            ResourceSchema::new(SECURITY_GROUP)
                .required(["vpc_id"])
                .immutable(["vpc_id", "description"]),
        )
        .with(
            ResourceSchema::new(SECURITY_GROUP_RULE)
                .required(["security_group_id", "type", "protocol", "from_port", "to_port"])
                .immutable([
                    "security_group_id",
                    "source_security_group_id",
                    "type",
                    "protocol",
                    "from_port",
                    "to_port",
                    "cidr_blocks",
                ]),
        )
        // Identity
        .with(ResourceSchema::new(IAM_ROLE).required(["assume_role_policy"]))
        .with(ResourceSchema::new(IAM_POLICY).required(["policy"]))
        .with(
            ResourceSchema::new(ROLE_POLICY_ATTACHMENT)
                .required(["role", "policy_arn"])
                .immutable(["role", "policy_arn"]),
        )
        // Cluster
        .with(
            ResourceSchema::new(EKS_CLUSTER)
                .required(["name", "vpc_id", "version"])
                .immutable(["name", "vpc_id", "public_subnet_ids", "private_subnet_ids"])
                .long_running(),
        )
        .with(
            ResourceSchema::new(NODE_GROUP)
                .required(["cluster_name", "node_role_arn", "scaling_config"])
                .immutable([
                    "cluster_name",
                    "node_group_name",
                    "node_role_arn",
                    "instance_types",
                    "subnet_ids",
                ])
                .long_running(),
        )
        // Kubernetes
        .with(
            ResourceSchema::new(NAMESPACE)
                .required(["cluster", "name"])
                .immutable(["cluster", "name"]),
        )
        .with(
            ResourceSchema::new(HELM_CHART)
                .required(["cluster", "chart", "version", "namespace"])
                .immutable(["cluster", "chart", "namespace"]),
        )
        .with(
            ResourceSchema::new(SERVICE_LOOKUP)
                .required(["cluster", "namespace", "name"])
                .data_source()
                .long_running(),
        )
        .with(
            ResourceSchema::new(CONFIG_GROUP)
                .required(["cluster", "files"])
                .immutable(["cluster"]),
        )
        // Domain
        .with(
            ResourceSchema::new(ZONE_LOOKUP)
                .required(["name"])
                .data_source(),
        )
        .with(
            ResourceSchema::new(CERTIFICATE)
                .required(["domain_name", "validation_method"])
                .immutable(["domain_name", "validation_method", "region"]),
        )
        .with(
            ResourceSchema::new(CERTIFICATE_VALIDATION)
                .required(["certificate_arn", "validation_record_fqdns"])
                .immutable(["certificate_arn", "validation_record_fqdns"])
                .long_running(),
        )
        .with(
            ResourceSchema::new(RECORD)
                .required(["name", "zone_id", "type"])
                .immutable(["name", "zone_id", "type"]),
        )
}
