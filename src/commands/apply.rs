//! `keel apply` and `keel destroy`

use anyhow::Result;
use declarative::{
    ApplyContext, ApplyReport, AutoConfirm, ChangeSet, Graph, StateSnapshot, execute, plan,
    plan_destroy,
};

use super::{Interrupt, Outcome, Session};
use crate::Context;
use crate::stack::StackOutput;
use crate::ui::{self, ApplyProgress, DialoguerConfirm};

pub struct ApplyArgs {
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Override `[engine].jobs`
    pub jobs: Option<usize>,
}

pub async fn run(ctx: &Context, args: ApplyArgs) -> Result<Outcome> {
    let mut session = Session::open(ctx)?;
    let stack = session.stack()?;
    let mut snapshot = session.load_state()?;

    let changes = plan(&stack.graph, &snapshot)?;
    if !ctx.quiet {
        ui::header(&format!("Apply stack {}", session.stack_name()));
    }
    ui::print_plan(&changes, &stack.graph, ctx.verbose > 0);

    let mut graph = stack.graph;
    let outcome = if changes.is_empty() {
        Outcome::Success
    } else {
        let report = reconcile(ctx, &mut session, &mut graph, &changes, &mut snapshot, &args).await?;
        ui::print_report(&report);
        Outcome::from_report(&report)
    };

    print_outputs(&stack.outputs, &snapshot);
    Ok(outcome)
}

pub async fn destroy(ctx: &Context, args: ApplyArgs) -> Result<Outcome> {
    let mut session = Session::open(ctx)?;
    let mut snapshot = session.load_state()?;

    if !ctx.quiet {
        ui::header(&format!("Destroy stack {}", session.stack_name()));
    }
    let changes = plan_destroy(&snapshot, session.catalog.clone())?;
    let mut graph = Graph::empty(session.catalog.clone());
    ui::print_plan(&changes, &graph, ctx.verbose > 0);
    if changes.is_empty() {
        return Ok(Outcome::Success);
    }

    let report = reconcile(ctx, &mut session, &mut graph, &changes, &mut snapshot, &args).await?;
    ui::print_report(&report);
    if report.is_success() {
        ui::success(&format!("Stack {} destroyed", session.stack_name()));
    }
    Ok(Outcome::from_report(&report))
}

/// Confirm and execute a change set, cancelling on Ctrl-C
async fn reconcile(
    ctx: &Context,
    session: &mut Session,
    graph: &mut Graph,
    changes: &ChangeSet,
    snapshot: &mut StateSnapshot,
    args: &ApplyArgs,
) -> Result<ApplyReport> {
    let opts = session.config.engine.execute_options(args.jobs);
    let provider = session.provider()?;
    let interrupt = Interrupt::listen();
    let mut progress = ApplyProgress::new(ctx.quiet, ctx.verbose > 0);
    let apply_ctx = ApplyContext::new(provider, &mut progress).with_cancel(interrupt.token());

    log::info!(
        "Applying {} changes with {} jobs",
        changes.len(),
        opts.jobs
    );
    let store = &mut session.store;
    let report = if args.yes {
        execute(graph, changes, store, snapshot, &opts, apply_ctx, &mut AutoConfirm).await?
    } else {
        execute(graph, changes, store, snapshot, &opts, apply_ctx, &mut DialoguerConfirm).await?
    };
    Ok(report)
}

fn print_outputs(outputs: &[StackOutput], snapshot: &StateSnapshot) {
    let resolved: Vec<_> = outputs
        .iter()
        .map(|output| (output.name, output.resolve(snapshot)))
        .collect();
    ui::print_outputs(&resolved);
}
