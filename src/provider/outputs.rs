//! Fabricated provider outputs
//!
//! Every output is derived from a blake3 digest of the resource id and its
//! resolved inputs, so the same request always yields the same ids and a
//! replacement with different inputs yields new ones.

use declarative::{Outputs, ProviderRequest};
use serde_json::{Value, json};

use crate::stack::catalog::{
    CERTIFICATE, CERTIFICATE_VALIDATION, CONFIG_GROUP, EKS_CLUSTER, HELM_CHART, IAM_POLICY,
    IAM_ROLE, INTERNET_GATEWAY, NAMESPACE, NODE_GROUP, RECORD, ROLE_POLICY_ATTACHMENT,
    SECURITY_GROUP, SECURITY_GROUP_RULE, SERVICE_LOOKUP, SUBNET, VPC, ZONE_LOOKUP,
};

/// Account every fabricated ARN belongs to
pub const ACCOUNT_ID: &str = "123456789012";

/// Deterministic hex digest of a request
pub struct Token(blake3::Hash);

impl Token {
    pub fn of(request: &ProviderRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.id.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(Value::Object(request.inputs.clone()).to_string().as_bytes());
        Self(hasher.finalize())
    }

    /// First `len` hex digits of the digest, salted so fields differ
    pub fn hex(&self, salt: &str, len: usize) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.0.as_bytes());
        hasher.update(salt.as_bytes());
        let digest = hasher.finalize().to_hex();
        let digest = digest.as_str();
        digest[..len.min(digest.len())].to_string()
    }
}

fn input_str<'a>(inputs: &'a Outputs, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

/// Outputs a real provider would report after creating or reading `request`
///
/// Inputs are echoed back; provider-assigned fields are added on top.
pub fn fabricate(request: &ProviderRequest, region: &str) -> Outputs {
    let token = Token::of(request);
    let inputs = &request.inputs;
    let name = request.id.name.as_str();
    let region = input_str(inputs, "region").unwrap_or(region);

    let extra = match request.id.resource_type.as_str() {
        VPC => {
            let id = format!("vpc-{}", token.hex("id", 17));
            json!({ "arn": format!("arn:aws:ec2:{region}:{ACCOUNT_ID}:vpc/{id}"), "id": id })
        }
        SUBNET => json!({ "id": format!("subnet-{}", token.hex("id", 17)) }),
        INTERNET_GATEWAY => json!({ "id": format!("igw-{}", token.hex("id", 17)) }),
        SECURITY_GROUP => json!({ "id": format!("sg-{}", token.hex("id", 17)) }),
        SECURITY_GROUP_RULE => json!({ "id": format!("sgrule-{}", token.hex("id", 10)) }),
        IAM_ROLE => {
            let role = format!("{name}-{}", token.hex("name", 7));
            json!({
                "id": role,
                "name": role,
                "arn": format!("arn:aws:iam::{ACCOUNT_ID}:role/{role}"),
            })
        }
        IAM_POLICY => {
            let policy = format!("{name}-{}", token.hex("name", 7));
            let arn = format!("arn:aws:iam::{ACCOUNT_ID}:policy/{policy}");
            json!({ "id": arn, "arn": arn, "name": policy })
        }
        ROLE_POLICY_ATTACHMENT => {
            let role = input_str(inputs, "role").unwrap_or(name);
            json!({ "id": format!("{role}-{}", token.hex("id", 7)) })
        }
        EKS_CLUSTER => {
            let cluster = input_str(inputs, "name").unwrap_or(name);
            let oidc = token.hex("oidc", 32).to_uppercase();
            let issuer = format!("oidc.eks.{region}.amazonaws.com/id/{oidc}");
            json!({
                "id": cluster,
                "arn": format!("arn:aws:eks:{region}:{ACCOUNT_ID}:cluster/{cluster}"),
                "endpoint": format!(
                    "https://{}.gr7.{region}.eks.amazonaws.com",
                    token.hex("endpoint", 32).to_uppercase()
                ),
                "status": "ACTIVE",
                "vpc_config": {
                    "cluster_security_group_id": format!("sg-{}", token.hex("cluster-sg", 17)),
                },
                "oidc_provider": {
                    "issuer": issuer,
                    "url": format!("https://{issuer}"),
                    "arn": format!("arn:aws:iam::{ACCOUNT_ID}:oidc-provider/{issuer}"),
                },
            })
        }
        NODE_GROUP => {
            let cluster = input_str(inputs, "cluster_name").unwrap_or("cluster");
            let group = input_str(inputs, "node_group_name").unwrap_or(name);
            json!({
                "id": format!("{cluster}:{group}"),
                "arn": format!(
                    "arn:aws:eks:{region}:{ACCOUNT_ID}:nodegroup/{cluster}/{group}/{}",
                    token.hex("id", 8)
                ),
                "status": "ACTIVE",
            })
        }
        NAMESPACE => json!({ "id": input_str(inputs, "name").unwrap_or(name) }),
        HELM_CHART => {
            let namespace = input_str(inputs, "namespace").unwrap_or("default");
            json!({ "id": format!("{namespace}/{name}"), "status": "deployed" })
        }
        SERVICE_LOOKUP => {
            let namespace = input_str(inputs, "namespace").unwrap_or("default");
            let hostname = format!(
                "{}-{}.elb.{region}.amazonaws.com",
                token.hex("lb", 32),
                token.hex("lb-suffix", 16)
            );
            json!({
                "id": format!("{namespace}/{name}"),
                "status": { "load_balancer": { "ingress": [{ "hostname": hostname }] } },
            })
        }
        CONFIG_GROUP => json!({ "id": name }),
        ZONE_LOOKUP => {
            let zone_id = format!("Z{}", token.hex("zone", 13).to_uppercase());
            json!({ "id": zone_id, "zone_id": zone_id })
        }
        CERTIFICATE => {
            let domain = input_str(inputs, "domain_name").unwrap_or(name);
            let arn = format!(
                "arn:aws:acm:{region}:{ACCOUNT_ID}:certificate/{}-{}-{}-{}-{}",
                token.hex("a", 8),
                token.hex("b", 4),
                token.hex("c", 4),
                token.hex("d", 4),
                token.hex("e", 12)
            );
            json!({
                "id": arn,
                "arn": arn,
                "status": "PENDING_VALIDATION",
                "domain_validation_options": [{
                    "domain_name": domain,
                    "resource_record_name": format!("_{}.{domain}.", token.hex("record", 32)),
                    "resource_record_type": "CNAME",
                    "resource_record_value": format!("_{}.acm-validations.aws.", token.hex("value", 32)),
                }],
            })
        }
        CERTIFICATE_VALIDATION => {
            let arn = input_str(inputs, "certificate_arn").unwrap_or(name);
            json!({ "id": arn, "status": "ISSUED" })
        }
        RECORD => {
            let record = input_str(inputs, "name").unwrap_or(name);
            let zone = input_str(inputs, "zone_id").unwrap_or("zone");
            let kind = input_str(inputs, "type").unwrap_or("A");
            json!({
                "id": format!("{zone}_{record}_{kind}"),
                "fqdn": record.trim_end_matches('.'),
            })
        }
        _ => json!({ "id": format!("{name}-{}", token.hex("id", 8)) }),
    };

    let mut outputs = inputs.clone();
    if let Value::Object(fields) = extra {
        outputs.extend(fields);
    }
    outputs
}
