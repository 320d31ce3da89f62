//! Local provider that fabricates cloud responses
//!
//! Behaves like a slow, eventually consistent cloud API without talking to
//! one: long-running types answer `Pending` a configurable number of times,
//! lookups fail transiently before the data shows up, and selected ids fail
//! permanently.

use async_trait::async_trait;
use declarative::{
    Catalog, OperationKind, Outputs, Provider, ProviderError, ProviderRequest, ProviderResponse,
    ResourceId,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::outputs::{Token, fabricate};
use crate::config::{ConfigError, SandboxConfig};

pub struct SandboxProvider {
    catalog: Arc<Catalog>,
    region: String,
    latency: Duration,
    pending_polls: u32,
    transient_failures: u32,
    fail: BTreeSet<ResourceId>,
    /// Lookup attempts per data source
    lookups: Mutex<HashMap<ResourceId, u32>>,
    /// Polls seen per pending operation
    operations: Mutex<HashMap<String, u32>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SandboxProvider {
    pub fn new(
        config: &SandboxConfig,
        catalog: Arc<Catalog>,
        region: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            catalog,
            region: region.into(),
            latency: Duration::from_millis(config.latency_ms),
            pending_polls: config.pending_polls,
            transient_failures: config.transient_failures,
            fail: config.failing_ids()?,
            lookups: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
        })
    }

    fn is_long_running(&self, request: &ProviderRequest) -> bool {
        request.kind != OperationKind::Delete
            && self
                .catalog
                .get(&request.id.resource_type)
                .is_some_and(|schema| schema.long_running)
    }

    /// Data that is not visible yet on the first few reads
    fn check_visibility(&self, request: &ProviderRequest) -> Result<(), ProviderError> {
        if request.kind != OperationKind::Read || self.transient_failures == 0 {
            return Ok(());
        }

        let mut lookups = locked(&self.lookups);
        let attempts = lookups.entry(request.id.clone()).or_insert(0);
        *attempts += 1;
        if *attempts <= self.transient_failures {
            return Err(ProviderError::transient(format!(
                "{} not found yet (attempt {attempts})",
                request.id.name
            )));
        }
        Ok(())
    }

    fn complete(&self, request: &ProviderRequest) -> Outputs {
        match (request.kind, &request.prior_outputs) {
            // Updates keep provider-assigned ids and pick up the new inputs
            (OperationKind::Update, Some(prior)) => {
                let mut outputs = prior.clone();
                outputs.extend(request.inputs.clone());
                outputs
            }
            _ => fabricate(request, &self.region),
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Provider for SandboxProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.delay().await;
        log::debug!("sandbox: {} {}", request.kind, request.id);

        if request.kind != OperationKind::Delete && self.fail.contains(&request.id) {
            return Err(ProviderError::permanent(format!(
                "{} {} rejected by sandbox",
                request.kind, request.id
            )));
        }
        if request.kind == OperationKind::Delete {
            return Ok(ProviderResponse::Done(Outputs::new()));
        }
        self.check_visibility(request)?;

        if self.is_long_running(request) && self.pending_polls > 0 {
            let operation = format!("op-{}", Token::of(request).hex(&request.kind.to_string(), 12));
            locked(&self.operations).insert(operation.clone(), 0);
            return Ok(ProviderResponse::Pending { operation });
        }

        Ok(ProviderResponse::Done(self.complete(request)))
    }

    async fn poll(
        &self,
        request: &ProviderRequest,
        operation: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        self.delay().await;

        let finished = {
            let mut operations = locked(&self.operations);
            let Some(polls) = operations.get_mut(operation) else {
                return Err(ProviderError::permanent(format!(
                    "unknown operation {operation}"
                )));
            };
            *polls += 1;
            log::trace!("sandbox: poll {} of {operation}", polls);
            let finished = *polls >= self.pending_polls;
            if finished {
                operations.remove(operation);
            }
            finished
        };

        if finished {
            Ok(ProviderResponse::Done(self.complete(request)))
        } else {
            Ok(ProviderResponse::Pending {
                operation: operation.to_string(),
            })
        }
    }
}
