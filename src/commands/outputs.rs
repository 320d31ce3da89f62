//! `keel outputs`

use anyhow::{Context as AnyhowContext, Result};
use serde_json::{Map, Value};

use super::{Outcome, Session};
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, json: bool) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let stack = session.stack()?;
    let snapshot = session.load_state()?;

    let resolved: Vec<_> = stack
        .outputs
        .iter()
        .map(|output| (output.name, output.resolve(&snapshot)))
        .collect();

    if json {
        let object: Map<String, Value> = resolved
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.unwrap_or(Value::Null)))
            .collect();
        let text = serde_json::to_string_pretty(&Value::Object(object))
            .context("Could not render outputs")?;
        println!("{text}");
    } else {
        ui::print_outputs(&resolved);
    }
    Ok(Outcome::Success)
}
