//! VPC with one public and one private subnet per availability zone

use anyhow::Result;
use declarative::{GraphBuilder, PropertyValue, ResourceId, properties};
use ipnetwork::Ipv4Network;
use serde_json::{Map, Value, json};
use std::net::Ipv4Addr;

use super::catalog::{INTERNET_GATEWAY, SUBNET, VPC};
use crate::config::{ConfigError, StackConfig};

/// Subnets are carved with a prefix this many bits longer than the VPC's
const SUBNET_BITS: u8 = 4;

/// Ids of the network resources later layers refer to
#[derive(Debug, Clone)]
pub struct Network {
    pub vpc: ResourceId,
    pub public_subnets: Vec<ResourceId>,
    pub private_subnets: Vec<ResourceId>,
}

/// Split `network` into `count` consecutive blocks of prefix + 4
pub fn carve_subnets(network: Ipv4Network, count: usize) -> Result<Vec<Ipv4Network>, ConfigError> {
    let prefix = network.prefix() + SUBNET_BITS;
    let available = 1usize << SUBNET_BITS;
    if prefix > 32 || count > available {
        return Err(ConfigError::Invalid {
            key: "stack.cidr_block",
            message: format!("{network} cannot hold {count} subnets of /{prefix}"),
        });
    }

    let size = 1u32 << (32 - u32::from(prefix));
    let base = u32::from(network.network());
    (0..count as u32)
        .map(|i| {
            Ipv4Network::new(Ipv4Addr::from(base + i * size), prefix).map_err(|e| {
                ConfigError::Invalid {
                    key: "stack.cidr_block",
                    message: e.to_string(),
                }
            })
        })
        .collect()
}

/// `us-east-1` -> `us-east-1a`, `us-east-1b`, ...
fn availability_zone(region: &str, index: usize) -> String {
    let letter = char::from(b'a' + index as u8);
    format!("{region}{letter}")
}

pub fn declare(builder: &mut GraphBuilder, config: &StackConfig) -> Result<Network> {
    let deployment = config.deployment_name();
    let network = config.network()?;
    let zones = usize::from(config.availability_zones);
    let blocks = carve_subnets(network, zones * 2)?;

    let vpc = builder.declare(
        VPC,
        "vpc",
        properties([
            ("cidr_block", PropertyValue::from(network.to_string())),
            ("enable_dns_hostnames", true.into()),
            ("enable_dns_support", true.into()),
            ("tags", PropertyValue::literal(json!({ "Name": deployment }))),
        ]),
    )?;

    // Tags the cluster autoscaler and the load balancer controller look for
    let mut tags = Map::new();
    tags.insert(format!("kubernetes.io/cluster/{deployment}"), json!("shared"));
    tags.insert("kubernetes.io/role/elb".to_string(), json!("1"));
    let discovery_tags = Value::Object(tags);

    let mut public_subnets = Vec::with_capacity(zones);
    let mut private_subnets = Vec::with_capacity(zones);
    for (tier, public, offset, ids) in [
        ("public", true, 0, &mut public_subnets),
        ("private", false, zones, &mut private_subnets),
    ] {
        for zone in 0..zones {
            let id = builder.declare(
                SUBNET,
                &format!("vpc-{tier}-{zone}"),
                properties([
                    ("vpc_id", PropertyValue::reference(&vpc, "id")),
                    (
                        "cidr_block",
                        PropertyValue::from(blocks[offset + zone].to_string()),
                    ),
                    (
                        "availability_zone",
                        PropertyValue::from(availability_zone(&config.region, zone)),
                    ),
                    ("map_public_ip_on_launch", public.into()),
                    ("tags", PropertyValue::literal(discovery_tags.clone())),
                ]),
            )?;
            ids.push(id);
        }
    }

    builder.declare(
        INTERNET_GATEWAY,
        "vpc",
        properties([
            ("vpc_id", PropertyValue::reference(&vpc, "id")),
            ("tags", PropertyValue::literal(json!({ "Name": deployment }))),
        ]),
    )?;

    Ok(Network {
        vpc,
        public_subnets,
        private_subnets,
    })
}
