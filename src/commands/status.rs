//! `keel status`

use anyhow::Result;
use colored::Colorize;
use declarative::StateRecord;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Outcome, Session};
use crate::Context;
use crate::stack::Stack;
use crate::ui;

/// How a tracked record compares to the current declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drift {
    InSync,
    Changed,
    Undeclared,
}

fn drift(record: &StateRecord, stack: &Stack) -> Drift {
    match stack.graph.node(&record.id) {
        None => Drift::Undeclared,
        Some(node) if node.definition_checksum() == record.checksum => Drift::InSync,
        Some(_) => Drift::Changed,
    }
}

pub fn run(ctx: &Context) -> Result<Outcome> {
    let session = Session::open(ctx)?;
    let snapshot = session.load_state()?;

    ui::header(&format!("Stack {}", session.stack_name()));
    ui::kv("State", &session.store.path().display().to_string());
    if snapshot.is_empty() {
        ui::info("No resources tracked. Run `keel apply` to create the stack.");
        return Ok(Outcome::Success);
    }
    ui::kv("Serial", &snapshot.serial.to_string());
    ui::kv("Updated", &snapshot.updated_at.to_rfc3339());

    let stack = session.stack()?;
    let mut by_type: BTreeMap<&str, Vec<&StateRecord>> = BTreeMap::new();
    for record in snapshot.records() {
        by_type
            .entry(record.id.resource_type.as_str())
            .or_default()
            .push(record);
    }

    let mut pending = 0;
    for (resource_type, records) in by_type {
        ui::section(ui::type_label(resource_type));
        for record in records {
            let state = drift(record, &stack);
            let icon = match state {
                Drift::InSync => "✓".green(),
                Drift::Changed => "~".yellow(),
                Drift::Undeclared => "-".red(),
            };
            if state != Drift::InSync {
                pending += 1;
            }
            let id = record
                .outputs
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("-");
            println!("  {} {:<40} {}", icon, record.id.name.bold(), id.dimmed());
            if ctx.verbose > 0 {
                ui::dim(&format!("    applied {}", record.applied_at.to_rfc3339()));
            }
        }
    }

    println!();
    if pending == 0 {
        ui::success(&format!("{} resources in sync", snapshot.len()));
    } else {
        ui::warn(&format!(
            "{pending} of {} resources differ from the configuration (run `keel plan`)",
            snapshot.len()
        ));
    }
    Ok(Outcome::Success)
}
