//! Stack configuration (`keel.toml`)
//!
//! The configuration is parsed once, validated, and then passed explicitly
//! into stack construction and the executor. Nothing here is global.

use anyhow::{Context, Result};
use declarative::{ExecuteOptions, ResourceId, RetryConfig};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Problems with the configuration itself, reported before any planning
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    pub stack: StackConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

// ============================================================================
// [stack]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    #[serde(default = "default_stack_name")]
    pub name: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// Overrides the `{service}-{name}` default
    #[serde(default)]
    pub deployment_name: Option<String>,
    /// Fully qualified name served by the ingress; its parent needs a hosted zone
    pub domain: String,
    #[serde(default = "default_cidr_block")]
    pub cidr_block: String,
    #[serde(default = "default_availability_zones")]
    pub availability_zones: u8,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default = "default_desired_size")]
    pub desired_size: u32,
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_elb_hosted_zone_id")]
    pub elb_hosted_zone_id: String,
    #[serde(default = "default_traefik_chart_version")]
    pub traefik_chart_version: String,
    #[serde(default = "default_autoscaler_chart_version")]
    pub autoscaler_chart_version: String,
}

fn default_stack_name() -> String {
    "dev".to_string()
}

fn default_service() -> String {
    "my-service".to_string()
}

fn default_cidr_block() -> String {
    "10.90.0.0/16".to_string()
}

fn default_availability_zones() -> u8 {
    2
}

fn default_instance_type() -> String {
    "r5.2xlarge".to_string()
}

fn default_min_size() -> u32 {
    1
}

fn default_max_size() -> u32 {
    10
}

fn default_desired_size() -> u32 {
    2
}

fn default_kubernetes_version() -> String {
    "1.18".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_elb_hosted_zone_id() -> String {
    "Z26RNL4JYFTOTI".to_string()
}

fn default_traefik_chart_version() -> String {
    "9.8.2".to_string()
}

fn default_autoscaler_chart_version() -> String {
    "1.0.3".to_string()
}

/// A domain split into its first label and the zone that should hold it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParts {
    /// Empty when the domain is its own zone
    pub subdomain: String,
    /// Zone name, canonicalized with a trailing dot when derived
    pub parent: String,
}

/// Split `app.example.com` into `app` and `example.com.`
///
/// A two-label domain is its own parent; a single label has no TLD.
pub fn split_domain(domain: &str) -> Result<DomainParts, ConfigError> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(ConfigError::invalid(
            "stack.domain",
            format!("No TLD found on {domain}"),
        ));
    }

    if labels.len() == 2 {
        return Ok(DomainParts {
            subdomain: String::new(),
            parent: domain.to_string(),
        });
    }

    Ok(DomainParts {
        subdomain: labels[0].to_string(),
        parent: format!("{}.", labels[1..].join(".")),
    })
}

impl StackConfig {
    pub fn deployment_name(&self) -> String {
        self.deployment_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.service, self.name))
    }

    pub fn domain_parts(&self) -> Result<DomainParts, ConfigError> {
        split_domain(&self.domain)
    }

    /// The VPC block, normalized to its network address
    pub fn network(&self) -> Result<Ipv4Network, ConfigError> {
        let parsed: Ipv4Network = self.cidr_block.parse().map_err(|e| {
            ConfigError::invalid("stack.cidr_block", format!("{}: {e}", self.cidr_block))
        })?;
        Ipv4Network::new(parsed.network(), parsed.prefix())
            .map_err(|e| ConfigError::invalid("stack.cidr_block", e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("stack.name", "must not be empty"));
        }
        // Names a state file and the cluster, so no separators or dots
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::invalid(
                "stack.name",
                format!(
                    "{:?} may only contain letters, digits, '-' and '_'",
                    self.name
                ),
            ));
        }
        self.domain_parts()?;

        let network = self.network()?;
        if network.prefix() > 24 {
            return Err(ConfigError::invalid(
                "stack.cidr_block",
                format!(
                    "prefix /{} leaves no room for /{} subnets",
                    network.prefix(),
                    network.prefix() + 4
                ),
            ));
        }

        if !(1..=8).contains(&self.availability_zones) {
            return Err(ConfigError::invalid(
                "stack.availability_zones",
                format!("{} is outside 1..=8", self.availability_zones),
            ));
        }

        if self.min_size > self.desired_size || self.desired_size > self.max_size {
            return Err(ConfigError::invalid(
                "stack.desired_size",
                format!(
                    "expected min_size <= desired_size <= max_size, got {} <= {} <= {}",
                    self.min_size, self.desired_size, self.max_size
                ),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// [engine]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub jobs: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            poll_interval_ms: 2_000,
            poll_timeout_secs: 30 * 60,
        }
    }
}

impl EngineConfig {
    /// Executor options, with `--jobs` taking precedence over the file
    pub fn execute_options(&self, jobs: Option<usize>) -> ExecuteOptions {
        ExecuteOptions {
            jobs: jobs.unwrap_or(self.jobs).max(1),
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                backoff_factor: self.backoff_factor,
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::invalid("engine.jobs", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "engine.max_attempts",
                "must be at least 1",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "engine.backoff_factor",
                format!("{} must be a finite number >= 1.0", self.backoff_factor),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// [sandbox]
// ============================================================================

/// Knobs of the local sandbox provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Delay added to every provider call
    pub latency_ms: u64,
    /// Polls a long-running operation answers `Pending` before finishing
    pub pending_polls: u32,
    /// Transient failures of each lookup before it succeeds
    pub transient_failures: u32,
    /// Resource ids (`type::name`) that fail permanently
    pub fail: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            pending_polls: 2,
            transient_failures: 1,
            fail: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn failing_ids(&self) -> Result<BTreeSet<ResourceId>, ConfigError> {
        self.fail
            .iter()
            .map(|raw| {
                raw.parse()
                    .map_err(|e: declarative::Error| ConfigError::invalid("sandbox.fail", e.to_string()))
            })
            .collect()
    }
}

// ============================================================================
// Loading
// ============================================================================

impl KeelConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        log::debug!(
            "Loaded stack {} from {}",
            config.stack.name,
            path.display()
        );
        Ok(config)
    }

    /// Replace the stack name (from `--stack`) and re-check it
    pub fn with_stack_name(mut self, name: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(name) = name {
            self.stack.name = name.to_string();
            self.stack.validate()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stack.validate()?;
        self.engine.validate()?;
        self.sandbox.failing_ids()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[stack]
domain = "app.example.com"
"#;

    #[test]
    fn test_defaults_follow_minimal_file() {
        let config = KeelConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.stack.name, "dev");
        assert_eq!(config.stack.deployment_name(), "my-service-dev");
        assert_eq!(config.stack.cidr_block, "10.90.0.0/16");
        assert_eq!(config.stack.availability_zones, 2);
        assert_eq!(config.engine.jobs, 4);
        assert!(config.sandbox.fail.is_empty());
    }

    #[test]
    fn test_deployment_name_override() {
        let config = KeelConfig::from_toml(
            r#"
[stack]
domain = "app.example.com"
deployment_name = "edge"
"#,
        )
        .unwrap();
        assert_eq!(config.stack.deployment_name(), "edge");
    }

    #[test]
    fn test_split_domain() {
        let parts = split_domain("app.example.com").unwrap();
        assert_eq!(parts.subdomain, "app");
        assert_eq!(parts.parent, "example.com.");

        let apex = split_domain("example.com").unwrap();
        assert_eq!(apex.subdomain, "");
        assert_eq!(apex.parent, "example.com");

        let deep = split_domain("api.eu.example.com").unwrap();
        assert_eq!(deep.subdomain, "api");
        assert_eq!(deep.parent, "eu.example.com.");
    }

    #[test]
    fn test_domain_without_tld_is_rejected() {
        let err = split_domain("localhost").unwrap_err();
        assert!(err.to_string().contains("No TLD found on localhost"));
        assert!(split_domain("app..com").is_err());
    }

    #[test]
    fn test_cidr_validation() {
        let config = |cidr: &str| {
            KeelConfig::from_toml(&format!(
                "[stack]\ndomain = \"app.example.com\"\ncidr_block = \"{cidr}\"\n"
            ))
        };
        assert!(config("10.0.0.0/16").is_ok());
        assert!(config("10.0.0.0/24").is_ok());
        assert!(config("10.0.0.0/25").is_err());
        assert!(config("not-a-cidr").is_err());
    }

    #[test]
    fn test_network_is_normalized() {
        let mut config = KeelConfig::from_toml(MINIMAL).unwrap();
        config.stack.cidr_block = "10.90.7.1/16".to_string();
        assert_eq!(config.stack.network().unwrap().to_string(), "10.90.0.0/16");
    }

    #[test]
    fn test_scaling_bounds() {
        let err = KeelConfig::from_toml(
            r#"
[stack]
domain = "app.example.com"
min_size = 3
desired_size = 2
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "stack.desired_size",
                ..
            }
        ));
    }

    #[test]
    fn test_availability_zone_bounds() {
        for zones in [0, 9] {
            let result = KeelConfig::from_toml(&format!(
                "[stack]\ndomain = \"app.example.com\"\navailability_zones = {zones}\n"
            ));
            assert!(result.is_err(), "{zones} zones should be rejected");
        }
    }

    #[test]
    fn test_engine_validation() {
        let zero_jobs = "[stack]\ndomain = \"a.b\"\n[engine]\njobs = 0\n";
        assert!(KeelConfig::from_toml(zero_jobs).is_err());

        let zero_attempts = "[stack]\ndomain = \"a.b\"\n[engine]\nmax_attempts = 0\n";
        assert!(KeelConfig::from_toml(zero_attempts).is_err());
    }

    #[test]
    fn test_execute_options() {
        let config = KeelConfig::from_toml(MINIMAL).unwrap();
        let opts = config.engine.execute_options(None);
        assert_eq!(opts.jobs, 4);
        assert_eq!(opts.retry.max_attempts, 5);
        assert_eq!(opts.poll_interval, Duration::from_secs(2));

        let opts = config.engine.execute_options(Some(1));
        assert_eq!(opts.jobs, 1);
    }

    #[test]
    fn test_sandbox_fail_ids() {
        let config = KeelConfig::from_toml(
            r#"
[stack]
domain = "app.example.com"

[sandbox]
fail = ["aws:acm/certificate::certificate"]
"#,
        )
        .unwrap();
        let ids = config.sandbox.failing_ids().unwrap();
        assert!(ids.contains(&ResourceId::new("aws:acm/certificate", "certificate")));

        let bad = "[stack]\ndomain = \"a.b\"\n[sandbox]\nfail = [\"nope\"]\n";
        assert!(KeelConfig::from_toml(bad).is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = KeelConfig::from_toml("[stack]\ndomain = \"a.b\"\nclusterName = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_stack_override() {
        let config = KeelConfig::from_toml(MINIMAL)
            .unwrap()
            .with_stack_name(Some("prod"))
            .unwrap();
        assert_eq!(config.stack.name, "prod");
        assert_eq!(config.stack.deployment_name(), "my-service-prod");
    }

    #[test]
    fn test_stack_name_cannot_leave_state_dir() {
        for name in ["../../tmp/x", "a/b", "..", "prod.old", r"a\b"] {
            let result = KeelConfig::from_toml(MINIMAL)
                .unwrap()
                .with_stack_name(Some(name));
            assert!(result.is_err(), "{name} was accepted");
        }

        let toml = "[stack]\ndomain = \"app.example.com\"\nname = \"../x\"\n";
        assert!(KeelConfig::from_toml(toml).is_err());
    }
}
