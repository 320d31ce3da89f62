//! Execution engine - applies a change set with bounded parallelism
//!
//! Every change expands into one or two steps. Creates and updates are a
//! single create-side step, deletes a single delete-side step, and a replace
//! is a delete-side step followed by a create-side step. Each step carries a
//! counting gate:
//!
//! - a create-side step waits for the create-side steps of the node's desired
//!   dependencies and for its own delete-side step;
//! - a delete-side step waits for the delete-side steps of the node's
//!   dependents recorded in state, and for the updates of those dependents
//!   that no longer need the node.
//!
//! The coordinator loop below is the only writer of the graph and the state
//! snapshot. Worker tasks get owned, resolved inputs and only talk to the
//! provider.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::{ApplyContext, ConfirmCallback, ProgressCallback};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::planner::{Change, ChangeSet};
use crate::provider::{OperationKind, Provider, ProviderError, ProviderRequest, ProviderResponse};
use crate::retry::{cancellable, pause, with_retry};
use crate::state::{StateRecord, StateSnapshot, StateStore};
use crate::types::{
    Action, ApplyResult, ExecuteOptions, ExecuteSummary, NodeStatus, Outputs, ResourceId,
};

/// Outcome of one change of the change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeResult {
    pub id: ResourceId,
    pub action: Action,
    pub result: ApplyResult,
    /// Provider invocations made, retries included
    pub attempts: u32,
}

/// Per-node results of an apply run, in change-set order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub results: Vec<NodeResult>,
    pub summary: ExecuteSummary,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&NodeResult> {
        self.results.iter().find(|r| &r.id == id)
    }

    fn from_results(results: Vec<NodeResult>) -> Self {
        let mut summary = ExecuteSummary::default();
        for r in &results {
            summary.add_result(&r.result);
        }
        Self { results, summary }
    }
}

/// Confirm, then apply a change set
///
/// Returns an empty report when there is nothing to do and reports every
/// change as skipped when the user declines.
pub async fn execute<C: ConfirmCallback>(
    graph: &mut Graph,
    changes: &ChangeSet,
    store: &mut dyn StateStore,
    snapshot: &mut StateSnapshot,
    opts: &ExecuteOptions,
    ctx: ApplyContext<'_>,
    confirm: &mut C,
) -> Result<ApplyReport> {
    if changes.is_empty() {
        return Ok(ApplyReport::default());
    }

    let prompt = format!("Apply {} changes?", changes.len());
    if !confirm.confirm(&prompt).map_err(Error::Confirm)? {
        let results = changes
            .iter()
            .map(|change| NodeResult {
                id: change.id.clone(),
                action: change.action,
                result: ApplyResult::Skipped {
                    reason: "declined".to_string(),
                },
                attempts: 0,
            })
            .collect();
        return Ok(ApplyReport::from_results(results));
    }

    apply(graph, changes, store, snapshot, opts, ctx).await
}

/// Apply a change set, saving state after every successful step
///
/// Node failures do not make this return an error: they are reported per
/// node. An error is returned only when state could not be saved, in which
/// case the run is cancelled first.
pub async fn apply(
    graph: &mut Graph,
    changes: &ChangeSet,
    store: &mut dyn StateStore,
    snapshot: &mut StateSnapshot,
    opts: &ExecuteOptions,
    ctx: ApplyContext<'_>,
) -> Result<ApplyReport> {
    restore_unchanged(graph, changes, snapshot);
    let steps = expand(graph, changes, snapshot);

    let ApplyContext {
        provider,
        progress,
        cancel,
    } = ctx;

    let run = Run {
        graph,
        changes: changes.changes(),
        store,
        snapshot,
        opts,
        provider,
        progress,
        cancel: cancel.child_token(),
        steps,
        outcomes: vec![None; changes.len()],
        attempts: vec![0; changes.len()],
        inputs: HashMap::new(),
        ready: BTreeSet::new(),
        state_error: None,
    };
    run.execute().await
}

/// Nodes without a create-side change keep the outputs recorded in state
fn restore_unchanged(graph: &mut Graph, changes: &ChangeSet, snapshot: &StateSnapshot) {
    let unchanged: Vec<ResourceId> = graph
        .nodes()
        .map(|node| node.id().clone())
        .filter(|id| changes.get(id).is_none_or(|c| !c.action.creates()))
        .collect();

    for id in unchanged {
        if let Some(record) = snapshot.get(&id) {
            graph.restore(&id, record.outputs.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Delete,
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Waiting,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug)]
struct Step {
    change: usize,
    phase: Phase,
    /// Gates still closed
    waits: usize,
    /// Steps gated on this one
    unblocks: Vec<usize>,
    state: StepState,
}

impl Step {
    fn new(change: usize, phase: Phase) -> Self {
        Self {
            change,
            phase,
            waits: 0,
            unblocks: Vec::new(),
            state: StepState::Waiting,
        }
    }
}

/// Expand changes into steps and wire their gates
fn expand(graph: &Graph, changes: &ChangeSet, snapshot: &StateSnapshot) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut delete_steps: HashMap<&ResourceId, usize> = HashMap::new();
    let mut create_steps: HashMap<&ResourceId, usize> = HashMap::new();

    for (index, change) in changes.iter().enumerate() {
        if change.action.deletes() {
            delete_steps.insert(&change.id, steps.len());
            steps.push(Step::new(index, Phase::Delete));
        }
        if change.action.creates() {
            create_steps.insert(&change.id, steps.len());
            steps.push(Step::new(index, Phase::Create));
        }
    }

    let mut gates: Vec<(usize, usize)> = Vec::new();
    for (&id, &step) in &create_steps {
        for dependency in graph.dependencies(id) {
            if let Some(&before) = create_steps.get(&dependency) {
                gates.push((before, step));
            }
        }
        if let Some(&before) = delete_steps.get(id) {
            gates.push((before, step));
        }
    }
    for (&id, &step) in &delete_steps {
        for dependent in snapshot.dependents_of(id) {
            if let Some(&before) = delete_steps.get(&dependent) {
                gates.push((before, step));
            }
        }
    }

    let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for &(before, after) in &gates {
        unblocks[before].push(after);
    }

    // A live dependent that is updated away from a deleted node lets go of it
    // before the delete runs, unless its update needs the node's replacement
    for change in changes {
        let Some(&delete) = delete_steps.get(&change.id) else {
            continue;
        };
        for dependent in snapshot.dependents_of(&change.id) {
            let Some(&update) = create_steps.get(&dependent) else {
                continue;
            };
            if changes.get(&dependent).is_none_or(|c| c.action != Action::Update) {
                continue;
            }
            if reaches(&unblocks, delete, update) {
                log::debug!("{dependent} is updated after {} is deleted", change.id);
                continue;
            }
            unblocks[update].push(delete);
            gates.push((update, delete));
        }
    }

    gates.sort_unstable();
    gates.dedup();
    for (before, after) in gates {
        steps[before].unblocks.push(after);
        steps[after].waits += 1;
    }
    steps
}

/// Whether `to` is transitively gated on `from`
fn reaches(unblocks: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; unblocks.len()];
    let mut queue = VecDeque::from([from]);
    while let Some(step) = queue.pop_front() {
        if step == to {
            return true;
        }
        if std::mem::replace(&mut seen[step], true) {
            continue;
        }
        queue.extend(unblocks[step].iter().copied());
    }
    false
}

enum Prepared {
    Call(ProviderRequest),
    /// Nothing to ask the provider (data-source delete)
    Local,
    /// Inputs match the applied instance; only the record changes
    Refresh(Outputs),
}

struct Run<'a> {
    graph: &'a mut Graph,
    changes: &'a [Change],
    store: &'a mut dyn StateStore,
    snapshot: &'a mut StateSnapshot,
    opts: &'a ExecuteOptions,
    provider: Arc<dyn Provider>,
    progress: &'a mut dyn ProgressCallback,
    cancel: CancellationToken,
    steps: Vec<Step>,
    outcomes: Vec<Option<ApplyResult>>,
    attempts: Vec<u32>,
    /// Resolved inputs of running create-side steps
    inputs: HashMap<usize, Outputs>,
    /// Open steps, lowest index (change-set order) first
    ready: BTreeSet<usize>,
    state_error: Option<crate::error::StateError>,
}

type StepOutput = (u32, std::result::Result<Outputs, ProviderError>);

impl Run<'_> {
    async fn execute(mut self) -> Result<ApplyReport> {
        self.progress.on_apply_start(self.steps.len());

        let semaphore = Arc::new(Semaphore::new(self.opts.jobs.max(1)));
        let mut tasks: JoinSet<StepOutput> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, usize> = HashMap::new();

        self.ready = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.waits == 0)
            .map(|(index, _)| index)
            .collect();

        loop {
            while !self.cancel.is_cancelled() {
                let Some(&index) = self.ready.first() else {
                    break;
                };
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    log::debug!("all {} worker slots busy", self.opts.jobs.max(1));
                    break;
                };
                self.ready.remove(&index);
                self.begin(index)?;

                match self.prepare(index) {
                    Ok(Prepared::Local) => {
                        drop(permit);
                        self.succeed(index, Outputs::new(), 0)?;
                    }
                    Ok(Prepared::Refresh(outputs)) => {
                        drop(permit);
                        self.succeed(index, outputs, 0)?;
                    }
                    Ok(Prepared::Call(request)) => {
                        let provider = Arc::clone(&self.provider);
                        let opts = self.opts.clone();
                        let cancel = self.cancel.clone();
                        let handle = tasks.spawn(async move {
                            let _permit = permit;
                            run_step(provider.as_ref(), &request, &opts, &cancel).await
                        });
                        running.insert(handle.id(), index);
                    }
                    Err(error) => {
                        drop(permit);
                        self.fail(index, &error, 0)?;
                    }
                }
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((task, (attempts, outcome))) => {
                    let Some(index) = running.remove(&task) else {
                        continue;
                    };
                    match outcome {
                        Ok(outputs) => self.succeed(index, outputs, attempts)?,
                        Err(error) => self.fail(index, &error, attempts)?,
                    }
                }
                Err(join_error) => {
                    let Some(index) = running.remove(&join_error.id()) else {
                        continue;
                    };
                    let error = ProviderError::permanent(format!("worker task failed: {join_error}"));
                    self.fail(index, &error, 0)?;
                }
            }
        }

        self.finish()
    }

    fn begin(&mut self, index: usize) -> Result<()> {
        self.steps[index].state = StepState::Running;
        let change = &self.changes[self.steps[index].change];
        let id = change.id.clone();
        let action = match self.steps[index].phase {
            Phase::Delete => Action::Delete,
            Phase::Create => change.action,
        };

        log::info!("{} {}", action, id);
        if self
            .graph
            .node(&id)
            .is_some_and(|node| node.status() == NodeStatus::Pending)
        {
            self.graph.transition(&id, NodeStatus::Applying)?;
        }
        self.progress.on_step_start(&id, action);
        Ok(())
    }

    fn prepare(&mut self, index: usize) -> std::result::Result<Prepared, ProviderError> {
        let changes = self.changes;
        let change = &changes[self.steps[index].change];
        let id = change.id.clone();
        let data_source = self.graph.catalog().is_data_source(&id.resource_type);

        match self.steps[index].phase {
            Phase::Delete => {
                if data_source {
                    log::debug!("{id} is a data source, nothing to delete");
                    return Ok(Prepared::Local);
                }
                let prior = change.prior.as_ref();
                Ok(Prepared::Call(ProviderRequest {
                    id,
                    kind: OperationKind::Delete,
                    inputs: prior.map(|r| r.inputs.clone()).unwrap_or_default(),
                    prior_outputs: prior.map(|r| r.outputs.clone()),
                }))
            }
            Phase::Create => {
                let kind = match change.action {
                    _ if data_source => OperationKind::Read,
                    Action::Update => OperationKind::Update,
                    _ => OperationKind::Create,
                };
                let prior_outputs = match change.action {
                    Action::Update => change.prior.as_ref().map(|r| r.outputs.clone()),
                    _ => None,
                };

                let graph = &*self.graph;
                let node = graph.node(&id).ok_or_else(|| {
                    ProviderError::permanent(format!("{id} is not part of the desired graph"))
                })?;
                let inputs = node
                    .resolve_inputs(&|reference| graph.lookup(reference))
                    .map_err(|e| ProviderError::permanent(e.to_string()))?;

                if change.action == Action::Update
                    && let Some(prior) = change.prior.as_ref()
                    && prior.inputs == inputs
                {
                    log::debug!("{id}: inputs unchanged, refreshing its record only");
                    self.inputs.insert(index, inputs);
                    return Ok(Prepared::Refresh(prior.outputs.clone()));
                }

                self.inputs.insert(index, inputs.clone());
                Ok(Prepared::Call(ProviderRequest {
                    id,
                    kind,
                    inputs,
                    prior_outputs,
                }))
            }
        }
    }

    fn succeed(&mut self, index: usize, outputs: Outputs, attempts: u32) -> Result<()> {
        let changes = self.changes;
        let change_index = self.steps[index].change;
        let change = &changes[change_index];
        let id = change.id.clone();
        self.steps[index].state = StepState::Succeeded;
        self.attempts[change_index] += attempts;

        let result = match self.steps[index].phase {
            Phase::Create => {
                let inputs = self.inputs.remove(&index).unwrap_or_default();
                self.graph.set_outputs(&id, outputs.clone());
                self.graph.transition(&id, NodeStatus::Applied)?;

                if let Some(node) = self.graph.node(&id) {
                    let record =
                        StateRecord::from_node(node, inputs, outputs, self.graph.dependencies(&id));
                    self.snapshot.upsert(record);
                }
                ApplyResult::for_action(change.action)
            }
            Phase::Delete => {
                self.snapshot.remove(&id);
                ApplyResult::Deleted
            }
        };
        self.persist();

        log::info!("{id}: {}", describe(&result));
        if self.steps[index].phase == Phase::Create || change.action == Action::Delete {
            self.outcomes[change_index] = Some(result.clone());
        }
        self.progress.on_step_complete(&id, &result);

        for next in self.steps[index].unblocks.clone() {
            let step = &mut self.steps[next];
            step.waits = step.waits.saturating_sub(1);
            if step.waits == 0 && step.state == StepState::Waiting {
                log::debug!("gate open for step {next}");
                self.ready.insert(next);
            }
        }
        Ok(())
    }

    fn fail(&mut self, index: usize, error: &ProviderError, attempts: u32) -> Result<()> {
        let change_index = self.steps[index].change;
        let id = self.changes[change_index].id.clone();
        self.steps[index].state = StepState::Failed;
        self.attempts[change_index] += attempts;
        self.inputs.remove(&index);

        if self
            .graph
            .node(&id)
            .is_some_and(|node| node.status() == NodeStatus::Applying)
        {
            self.graph.transition(&id, NodeStatus::Failed)?;
        }

        log::error!("{id}: {error}");
        let result = ApplyResult::Failed {
            error: error.to_string(),
        };
        self.outcomes[change_index].get_or_insert(result.clone());
        self.progress.on_step_complete(&id, &result);

        self.skip_dependents(index);
        Ok(())
    }

    /// Skip every step transitively gated on the failed step
    fn skip_dependents(&mut self, failed: usize) {
        let failed_change = self.steps[failed].change;
        let reason = format!("dependency {} failed", self.changes[failed_change].id);
        let mut queue: VecDeque<usize> = self.steps[failed].unblocks.iter().copied().collect();

        while let Some(index) = queue.pop_front() {
            if self.steps[index].state != StepState::Waiting {
                continue;
            }
            self.steps[index].state = StepState::Skipped;
            self.ready.remove(&index);
            queue.extend(self.steps[index].unblocks.iter().copied());

            let change_index = self.steps[index].change;
            if change_index == failed_change {
                continue;
            }
            let id = self.changes[change_index].id.clone();
            log::warn!("skipping {id}: {reason}");
            let result = ApplyResult::Skipped {
                reason: reason.clone(),
            };
            self.outcomes[change_index].get_or_insert(result.clone());
            self.progress.on_step_complete(&id, &result);
        }
    }

    /// Seal and save the snapshot; a failed save cancels the run
    fn persist(&mut self) {
        if self.state_error.is_some() {
            return;
        }
        self.snapshot.seal();
        if let Err(e) = self.store.save(&*self.snapshot) {
            log::error!("saving state failed, cancelling apply: {e}");
            self.state_error = Some(e);
            self.cancel.cancel();
        }
    }

    fn finish(mut self) -> Result<ApplyReport> {
        let reason = if self.cancel.is_cancelled() {
            "cancelled"
        } else {
            "not started"
        };

        for index in 0..self.steps.len() {
            if self.steps[index].state != StepState::Waiting {
                continue;
            }
            self.steps[index].state = StepState::Skipped;
            let change_index = self.steps[index].change;
            if self.outcomes[change_index].is_some() {
                continue;
            }
            let id = self.changes[change_index].id.clone();
            log::warn!("skipping {id}: {reason}");
            let result = ApplyResult::Skipped {
                reason: reason.to_string(),
            };
            self.outcomes[change_index] = Some(result.clone());
            self.progress.on_step_complete(&id, &result);
        }

        let results = self
            .changes
            .iter()
            .enumerate()
            .map(|(index, change)| NodeResult {
                id: change.id.clone(),
                action: change.action,
                result: self.outcomes[index].clone().unwrap_or(ApplyResult::Skipped {
                    reason: reason.to_string(),
                }),
                attempts: self.attempts[index],
            })
            .collect();

        let report = ApplyReport::from_results(results);
        self.progress.on_apply_complete(&report.summary);

        match self.state_error {
            Some(e) => Err(Error::State(e)),
            None => Ok(report),
        }
    }
}

fn describe(result: &ApplyResult) -> &'static str {
    match result {
        ApplyResult::Created => "created",
        ApplyResult::Updated => "updated",
        ApplyResult::Replaced => "replaced",
        ApplyResult::Deleted => "deleted",
        ApplyResult::Failed { .. } => "failed",
        ApplyResult::Skipped { .. } => "skipped",
    }
}

/// Invoke with retries, then poll if the provider answered `Pending`
async fn run_step(
    provider: &dyn Provider,
    request: &ProviderRequest,
    opts: &ExecuteOptions,
    cancel: &CancellationToken,
) -> StepOutput {
    let label = format!("{} {}", request.kind, request.id);
    let mut attempts = 0;

    let response = with_retry(&opts.retry, cancel, &label, || {
        attempts += 1;
        provider.invoke(request)
    })
    .await;

    let outcome = match response {
        Ok(ProviderResponse::Done(outputs)) => Ok(outputs),
        Ok(ProviderResponse::Pending { operation }) => {
            poll_until_done(provider, request, operation, opts, cancel).await
        }
        Err(e) => Err(e),
    };
    (attempts, outcome)
}

async fn poll_until_done(
    provider: &dyn Provider,
    request: &ProviderRequest,
    mut operation: String,
    opts: &ExecuteOptions,
    cancel: &CancellationToken,
) -> std::result::Result<Outputs, ProviderError> {
    let deadline = tokio::time::Instant::now() + opts.poll_timeout;
    log::debug!("{}: waiting on operation {operation}", request.id);

    loop {
        pause(cancel, opts.poll_interval).await?;

        match cancellable(cancel, provider.poll(request, &operation)).await {
            Ok(ProviderResponse::Done(outputs)) => return Ok(outputs),
            Ok(ProviderResponse::Pending { operation: next }) => operation = next,
            Err(e) if e.is_retryable() => {
                log::debug!("{}: poll of {operation} failed: {e}", request.id);
            }
            Err(e) => return Err(e),
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(ProviderError::permanent(format!(
                "operation {operation} did not finish within {:?}",
                opts.poll_timeout
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline, NoProgress};
    use crate::error::StateError;
    use crate::graph::GraphBuilder;
    use crate::planner::{plan, plan_destroy};
    use crate::resource::{PropertyBag, PropertyValue, ResourceNode, properties};
    use crate::retry::RetryConfig;
    use crate::schema::{Catalog, ResourceSchema};
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockProvider {
        calls: Mutex<Vec<(OperationKind, ResourceId)>>,
        fail: HashSet<ResourceId>,
        transient: Mutex<HashMap<ResourceId, u32>>,
        pending: HashSet<ResourceId>,
        never_done: bool,
        /// Cancel the run from inside the call for this node, then hang
        cancel_during: Option<(ResourceId, CancellationToken)>,
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockProvider {
        fn calls(&self) -> Vec<(OperationKind, ResourceId)> {
            self.calls.lock().unwrap().clone()
        }

        fn position(&self, kind: OperationKind, id: &ResourceId) -> usize {
            self.calls()
                .iter()
                .position(|(k, i)| *k == kind && i == id)
                .unwrap_or_else(|| panic!("{kind} {id} was not called"))
        }
    }

    fn outputs_for(request: &ProviderRequest) -> Outputs {
        let mut outputs = request.inputs.clone();
        outputs.insert("id".into(), json!(format!("{}-id", request.id.name)));
        outputs
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn invoke(
            &self,
            request: &ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.kind, request.id.clone()));

            if let Some((target, token)) = &self.cancel_during
                && target == &request.id
            {
                token.cancel();
                tokio::time::sleep(Duration::from_secs(30)).await;
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&request.id) {
                return Err(ProviderError::permanent("quota exceeded"));
            }
            let throttled = {
                let mut transient = self.transient.lock().unwrap();
                match transient.get_mut(&request.id) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if throttled {
                return Err(ProviderError::transient("throttled"));
            }
            if self.pending.contains(&request.id) && request.kind != OperationKind::Delete {
                return Ok(ProviderResponse::Pending {
                    operation: format!("op-{}", request.id.name),
                });
            }
            Ok(ProviderResponse::Done(outputs_for(request)))
        }

        async fn poll(
            &self,
            request: &ProviderRequest,
            operation: &str,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            if self.never_done {
                return Ok(ProviderResponse::Pending {
                    operation: operation.to_string(),
                });
            }
            Ok(ProviderResponse::Done(outputs_for(request)))
        }
    }

    struct BrokenStore;

    impl StateStore for BrokenStore {
        fn load(&self) -> std::result::Result<StateSnapshot, StateError> {
            Ok(StateSnapshot::new())
        }

        fn save(&mut self, _snapshot: &StateSnapshot) -> std::result::Result<(), StateError> {
            Err(StateError::Io {
                path: "state.json".into(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::new()
                .with(ResourceSchema::new("vpc").immutable(["cidr_block"]))
                .with(ResourceSchema::new("cluster").immutable(["vpc_id"]))
                .with(ResourceSchema::new("certificate"))
                .with(ResourceSchema::new("record"))
                .with(ResourceSchema::new("zone").data_source()),
        )
    }

    fn id(resource_type: &str, name: &str) -> ResourceId {
        ResourceId::new(resource_type, name)
    }

    fn vpc(cidr: &str) -> ResourceNode {
        ResourceNode::new("vpc", "main", properties([("cidr_block", cidr)]))
    }

    fn scenario(cidr: &str) -> Vec<ResourceNode> {
        vec![
            vpc(cidr),
            ResourceNode::new(
                "cluster",
                "main",
                properties([("vpc_id", PropertyValue::reference(&id("vpc", "main"), "id"))]),
            ),
            ResourceNode::new("certificate", "app", properties([("domain", "app.example.com")])),
            ResourceNode::new(
                "record",
                "app",
                properties([
                    (
                        "alias",
                        PropertyValue::reference(&id("cluster", "main"), "id"),
                    ),
                    (
                        "cert",
                        PropertyValue::reference(&id("certificate", "app"), "id"),
                    ),
                ]),
            ),
        ]
    }

    fn graph(nodes: Vec<ResourceNode>) -> Graph {
        let mut builder = GraphBuilder::new(catalog());
        for node in nodes {
            builder.add_node(node).unwrap();
        }
        builder.finish().unwrap()
    }

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            jobs: 4,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(1),
            },
            poll_interval: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(50),
        }
    }

    async fn run(
        graph: &mut Graph,
        store: &mut MemoryStateStore,
        provider: Arc<MockProvider>,
        opts: &ExecuteOptions,
    ) -> ApplyReport {
        let mut snapshot = store.load().unwrap();
        let changes = plan(graph, &snapshot).unwrap();
        let mut progress = NoProgress;
        let ctx = ApplyContext::new(provider, &mut progress);
        apply(graph, &changes, store, &mut snapshot, opts, ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_applies_in_dependency_order_and_saves_each_step() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        let mut desired = graph(scenario("10.0.0.0/16"));

        let report = run(&mut desired, &mut store, Arc::clone(&provider), &options()).await;

        assert!(report.is_success());
        assert_eq!(report.summary.created, 4);
        assert_eq!(store.saves(), 4);

        let create = OperationKind::Create;
        assert!(provider.position(create, &id("vpc", "main")) < provider.position(create, &id("cluster", "main")));
        assert_eq!(provider.position(create, &id("record", "app")), 3);

        let record = store.snapshot().unwrap().get(&id("record", "app")).unwrap();
        assert_eq!(record.inputs["alias"], json!("main-id"));
        assert_eq!(record.inputs["cert"], json!("app-id"));
        assert_eq!(
            desired.node(&id("record", "app")).unwrap().status(),
            NodeStatus::Applied
        );
    }

    #[tokio::test]
    async fn test_second_apply_is_empty() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        run(&mut graph(scenario("10.0.0.0/16")), &mut store, Arc::clone(&provider), &options()).await;

        let snapshot = store.load().unwrap();
        let changes = plan(&graph(scenario("10.0.0.0/16")), &snapshot).unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let provider = Arc::new(MockProvider {
            fail: HashSet::from([id("vpc", "main")]),
            ..MockProvider::default()
        });
        let mut store = MemoryStateStore::new();
        let mut desired = graph(scenario("10.0.0.0/16"));

        let report = run(&mut desired, &mut store, provider, &options()).await;

        assert!(matches!(
            report.get(&id("vpc", "main")).unwrap().result,
            ApplyResult::Failed { .. }
        ));
        assert_eq!(
            report.get(&id("cluster", "main")).unwrap().result,
            ApplyResult::Skipped {
                reason: "dependency vpc::main failed".into()
            }
        );
        assert!(matches!(
            report.get(&id("record", "app")).unwrap().result,
            ApplyResult::Skipped { .. }
        ));
        assert_eq!(
            report.get(&id("certificate", "app")).unwrap().result,
            ApplyResult::Created
        );
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 2);
        assert_eq!(desired.node(&id("vpc", "main")).unwrap().status(), NodeStatus::Failed);
        assert_eq!(desired.node(&id("cluster", "main")).unwrap().status(), NodeStatus::Pending);
    }

    #[tokio::test]
    async fn test_replace_deletes_before_recreating() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        run(&mut graph(scenario("10.0.0.0/16")), &mut store, Arc::clone(&provider), &options()).await;

        let second = Arc::new(MockProvider::default());
        let mut replaced = graph(scenario("10.1.0.0/16"));
        let report = run(&mut replaced, &mut store, Arc::clone(&second), &options()).await;

        assert!(report.is_success());
        assert_eq!(report.get(&id("vpc", "main")).unwrap().result, ApplyResult::Replaced);
        assert_eq!(report.get(&id("cluster", "main")).unwrap().result, ApplyResult::Replaced);
        assert_eq!(report.get(&id("record", "app")).unwrap().result, ApplyResult::Updated);

        let (vpc_id, cluster_id) = (id("vpc", "main"), id("cluster", "main"));
        assert!(second.position(OperationKind::Delete, &cluster_id) < second.position(OperationKind::Delete, &vpc_id));
        assert!(second.position(OperationKind::Delete, &vpc_id) < second.position(OperationKind::Create, &vpc_id));
        assert!(second.position(OperationKind::Create, &vpc_id) < second.position(OperationKind::Create, &cluster_id));

        let record = store.snapshot().unwrap().get(&vpc_id).unwrap();
        assert_eq!(record.inputs["cidr_block"], json!("10.1.0.0/16"));
        assert_eq!(replaced.node(&vpc_id).unwrap().status(), NodeStatus::Applied);
    }

    #[tokio::test]
    async fn test_destroy_deletes_dependents_first() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        run(&mut graph(scenario("10.0.0.0/16")), &mut store, Arc::clone(&provider), &options()).await;

        let teardown = Arc::new(MockProvider::default());
        let mut snapshot = store.load().unwrap();
        let changes = plan_destroy(&snapshot, catalog()).unwrap();
        let mut empty = Graph::empty(catalog());
        let mut progress = NoProgress;
        let ctx = ApplyContext::new(Arc::clone(&teardown) as Arc<dyn Provider>, &mut progress);
        let report = apply(&mut empty, &changes, &mut store, &mut snapshot, &options(), ctx)
            .await
            .unwrap();

        assert_eq!(report.summary.deleted, 4);
        assert!(store.snapshot().unwrap().is_empty());
        let delete = OperationKind::Delete;
        assert!(teardown.position(delete, &id("record", "app")) < teardown.position(delete, &id("cluster", "main")));
        assert!(teardown.position(delete, &id("cluster", "main")) < teardown.position(delete, &id("vpc", "main")));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(MockProvider {
            transient: Mutex::new(HashMap::from([(id("certificate", "app"), 2)])),
            ..MockProvider::default()
        });
        let mut store = MemoryStateStore::new();
        let report = run(&mut graph(scenario("10.0.0.0/16")), &mut store, provider, &options()).await;

        assert!(report.is_success());
        assert_eq!(report.get(&id("certificate", "app")).unwrap().attempts, 3);
        assert_eq!(report.get(&id("vpc", "main")).unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_pending_operation_is_polled() {
        let provider = Arc::new(MockProvider {
            pending: HashSet::from([id("certificate", "app")]),
            ..MockProvider::default()
        });
        let mut store = MemoryStateStore::new();
        let report = run(&mut graph(scenario("10.0.0.0/16")), &mut store, provider, &options()).await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_poll_timeout_fails_node() {
        let provider = Arc::new(MockProvider {
            pending: HashSet::from([id("certificate", "app")]),
            never_done: true,
            ..MockProvider::default()
        });
        let mut store = MemoryStateStore::new();
        let report = run(&mut graph(scenario("10.0.0.0/16")), &mut store, provider, &options()).await;

        match &report.get(&id("certificate", "app")).unwrap().result {
            ApplyResult::Failed { error } => assert!(error.contains("did not finish")),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            report.get(&id("record", "app")).unwrap().result,
            ApplyResult::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        let mut desired = graph(scenario("10.0.0.0/16"));
        let mut snapshot = store.load().unwrap();
        let changes = plan(&desired, &snapshot).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut progress = NoProgress;
        let ctx = ApplyContext::new(Arc::clone(&provider) as Arc<dyn Provider>, &mut progress)
            .with_cancel(cancel);
        let report = apply(&mut desired, &changes, &mut store, &mut snapshot, &options(), ctx)
            .await
            .unwrap();

        assert_eq!(report.summary.skipped, 4);
        assert!(provider.calls().is_empty());
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_applied_steps() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(MockProvider {
            cancel_during: Some((id("cluster", "main"), cancel.clone())),
            ..MockProvider::default()
        });
        let mut store = MemoryStateStore::new();
        let mut desired = graph(scenario("10.0.0.0/16"));
        let mut snapshot = store.load().unwrap();
        let changes = plan(&desired, &snapshot).unwrap();

        let mut progress = NoProgress;
        let ctx = ApplyContext::new(Arc::clone(&provider) as Arc<dyn Provider>, &mut progress)
            .with_cancel(cancel);
        let opts = ExecuteOptions {
            jobs: 1,
            ..options()
        };
        let report = apply(&mut desired, &changes, &mut store, &mut snapshot, &opts, ctx)
            .await
            .unwrap();

        match &report.get(&id("cluster", "main")).unwrap().result {
            ApplyResult::Failed { error } => assert!(error.contains("cancelled")),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            report.get(&id("record", "app")).unwrap().result,
            ApplyResult::Skipped { .. }
        ));
        assert_eq!(report.get(&id("vpc", "main")).unwrap().result, ApplyResult::Created);
        assert_eq!(report.get(&id("certificate", "app")).unwrap().result, ApplyResult::Created);
        assert_eq!(desired.node(&id("cluster", "main")).unwrap().status(), NodeStatus::Failed);

        // Finished steps stay recorded and nothing is rolled back
        let saved = store.snapshot().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.contains(&id("vpc", "main")));
        assert!(saved.contains(&id("certificate", "app")));
        assert!(!saved.contains(&id("cluster", "main")));
        assert_eq!(store.saves(), 2);
        assert!(provider.calls().iter().all(|(kind, _)| *kind == OperationKind::Create));
        assert!(!provider.calls().contains(&(OperationKind::Create, id("record", "app"))));
    }

    #[tokio::test]
    async fn test_definition_only_update_skips_provider() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        run(&mut graph(scenario("10.0.0.0/16")), &mut store, Arc::clone(&provider), &options()).await;

        let (certificate, cluster) = (id("certificate", "app"), id("cluster", "main"));
        let nodes: Vec<ResourceNode> = scenario("10.0.0.0/16")
            .into_iter()
            .map(|node| {
                if node.id() == &certificate {
                    node.protected()
                } else if node.id() == &cluster {
                    node.depends_on(&certificate)
                } else {
                    node
                }
            })
            .collect();

        let second = Arc::new(MockProvider::default());
        let mut desired = graph(nodes);
        let report = run(&mut desired, &mut store, Arc::clone(&second), &options()).await;

        assert_eq!(report.summary.updated, 2);
        assert!(second.calls().is_empty());

        let saved = store.snapshot().unwrap();
        assert!(saved.get(&certificate).unwrap().protect);
        assert!(saved.get(&cluster).unwrap().dependencies.contains(&certificate));
        assert_eq!(saved.get(&cluster).unwrap().outputs["id"], json!("main-id"));
        assert!(plan(&desired, saved).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_bound_concurrency() {
        let nodes: Vec<ResourceNode> = (0..6)
            .map(|i| ResourceNode::new("certificate", format!("c{i}"), PropertyBag::new()))
            .collect();
        let provider = Arc::new(MockProvider {
            latency: Duration::from_millis(5),
            ..MockProvider::default()
        });
        let mut store = MemoryStateStore::new();
        let opts = ExecuteOptions {
            jobs: 2,
            ..options()
        };

        let report = run(&mut graph(nodes), &mut store, Arc::clone(&provider), &opts).await;
        assert_eq!(report.summary.created, 6);
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_data_source_delete_skips_provider() {
        let zone = ResourceNode::new("zone", "example.com.", properties([("name", "example.com.")]));
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        let report = run(&mut graph(vec![zone]), &mut store, Arc::clone(&provider), &options()).await;
        assert_eq!(provider.calls(), vec![(OperationKind::Read, id("zone", "example.com."))]);
        assert_eq!(report.summary.created, 1);

        let teardown = Arc::new(MockProvider::default());
        let report = run(&mut graph(vec![]), &mut store, Arc::clone(&teardown), &options()).await;
        assert_eq!(report.summary.deleted, 1);
        assert!(teardown.calls().is_empty());
    }

    #[tokio::test]
    async fn test_state_save_failure_aborts() {
        let provider = Arc::new(MockProvider::default());
        let mut desired = graph(scenario("10.0.0.0/16"));
        let mut snapshot = StateSnapshot::new();
        let changes = plan(&desired, &snapshot).unwrap();
        let mut progress = NoProgress;
        let ctx = ApplyContext::new(provider as Arc<dyn Provider>, &mut progress);

        let err = apply(&mut desired, &changes, &mut BrokenStore, &mut snapshot, &options(), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn test_execute_declined_skips_all() {
        let provider = Arc::new(MockProvider::default());
        let mut store = MemoryStateStore::new();
        let mut desired = graph(scenario("10.0.0.0/16"));
        let mut snapshot = StateSnapshot::new();
        let changes = plan(&desired, &snapshot).unwrap();
        let mut progress = NoProgress;

        let ctx = ApplyContext::new(Arc::clone(&provider) as Arc<dyn Provider>, &mut progress);
        let report = execute(
            &mut desired,
            &changes,
            &mut store,
            &mut snapshot,
            &options(),
            ctx,
            &mut AutoDecline,
        )
        .await
        .unwrap();
        assert_eq!(report.summary.skipped, 4);
        assert!(provider.calls().is_empty());

        let ctx = ApplyContext::new(provider as Arc<dyn Provider>, &mut progress);
        let report = execute(
            &mut desired,
            &changes,
            &mut store,
            &mut snapshot,
            &options(),
            ctx,
            &mut AutoConfirm,
        )
        .await
        .unwrap();
        assert_eq!(report.summary.created, 4);
    }
}
