//! Hosted zone lookup, DNS-validated ACM certificate and the alias record

use anyhow::Result;
use declarative::{GraphBuilder, PropertyValue, ResourceId, properties};

use super::catalog::{CERTIFICATE, CERTIFICATE_VALIDATION, RECORD, ZONE_LOOKUP};
use crate::config::StackConfig;

/// TTL of the validation record
const VALIDATION_TTL_SECS: u32 = 60 * 10;

#[derive(Debug, Clone)]
pub struct Certificate {
    pub zone: ResourceId,
    /// Finishes once ACM reports the certificate as issued
    pub validation: ResourceId,
}

pub fn declare_certificate(builder: &mut GraphBuilder, config: &StackConfig) -> Result<Certificate> {
    let parts = config.domain_parts()?;
    log::debug!("Certificate for {:?} under zone {}", parts.subdomain, parts.parent);
    let zone = builder.declare(
        ZONE_LOOKUP,
        &parts.parent,
        properties([("name", PropertyValue::from(parts.parent.clone()))]),
    )?;

    let certificate = builder.declare(
        CERTIFICATE,
        "certificate",
        properties([
            ("domain_name", PropertyValue::from(config.domain.clone())),
            ("validation_method", PropertyValue::from("DNS")),
            ("region", PropertyValue::from(config.region.clone())),
        ]),
    )?;

    let option = |field: &str| {
        PropertyValue::reference(&certificate, format!("domain_validation_options.0.{field}"))
    };
    let record = builder.declare(
        RECORD,
        &format!("{}-validation", config.domain),
        properties([
            ("name", option("resource_record_name")),
            ("zone_id", PropertyValue::reference(&zone, "zone_id")),
            ("type", option("resource_record_type")),
            ("records", PropertyValue::list([option("resource_record_value")])),
            ("ttl", PropertyValue::from(VALIDATION_TTL_SECS)),
        ]),
    )?;

    let validation = builder.declare(
        CERTIFICATE_VALIDATION,
        "certificate-validation",
        properties([
            ("certificate_arn", PropertyValue::reference(&certificate, "arn")),
            (
                "validation_record_fqdns",
                PropertyValue::list([PropertyValue::reference(&record, "fqdn")]),
            ),
            ("region", PropertyValue::from(config.region.clone())),
        ]),
    )?;

    Ok(Certificate { zone, validation })
}

/// A record aliasing the domain to the ingress load balancer
pub fn declare_alias(
    builder: &mut GraphBuilder,
    config: &StackConfig,
    zone: &ResourceId,
    load_balancer: &ResourceId,
) -> Result<ResourceId> {
    let alias = builder.declare(
        RECORD,
        &config.domain,
        properties([
            ("name", PropertyValue::from(config.domain.clone())),
            ("zone_id", PropertyValue::reference(zone, "zone_id")),
            ("type", PropertyValue::from("A")),
            (
                "aliases",
                PropertyValue::list([PropertyValue::map([
                    (
                        "name",
                        PropertyValue::reference(load_balancer, super::LOAD_BALANCER_HOSTNAME),
                    ),
                    (
                        "zone_id",
                        PropertyValue::from(config.elb_hosted_zone_id.clone()),
                    ),
                    ("evaluate_target_health", PropertyValue::from(true)),
                ])]),
            ),
        ]),
    )?;
    Ok(alias)
}
