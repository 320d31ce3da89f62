//! `keel plan`

use anyhow::Result;
use declarative::plan;

use super::{Outcome, Session};
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let stack = session.stack()?;
    let snapshot = session.load_state()?;

    let changes = plan(&stack.graph, &snapshot)?;
    if !ctx.quiet {
        ui::header(&format!("Plan for stack {}", session.stack_name()));
        ui::dim(&format!(
            "{} declared, {} tracked",
            stack.graph.len(),
            snapshot.len()
        ));
    }
    ui::print_plan(&changes, &stack.graph, ctx.verbose > 0);

    Ok(Outcome::Success)
}
