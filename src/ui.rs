use colored::Colorize;
use declarative::{
    Action, ApplyReport, ApplyResult, ChangeSet, ConfirmCallback, ExecuteSummary, Graph,
    ProgressCallback, PropertyValue, ResourceId, Segment, diff_properties, group_by_type,
};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plan Display
// ============================================================================

/// Colored plan symbol for an action
pub fn action_symbol(action: Action) -> colored::ColoredString {
    match action {
        Action::Create => action.symbol().green(),
        Action::Update => action.symbol().yellow(),
        Action::Replace => action.symbol().magenta(),
        Action::Delete => action.symbol().red(),
    }
}

/// Human label for a resource type
pub fn type_label(resource_type: &str) -> &str {
    match resource_type {
        "aws:ec2/vpc" => "VPCs",
        "aws:ec2/subnet" => "Subnets",
        "aws:ec2/internet-gateway" => "Internet gateways",
        "aws:ec2/security-group" => "Security groups",
        "aws:ec2/security-group-rule" => "Security group rules",
        "aws:iam/role" => "IAM roles",
        "aws:iam/policy" => "IAM policies",
        "aws:iam/role-policy-attachment" => "IAM policy attachments",
        "aws:eks/cluster" => "EKS clusters",
        "aws:eks/node-group" => "EKS node groups",
        "aws:route53/zone-lookup" => "Hosted zones (lookup)",
        "aws:route53/record" => "DNS records",
        "aws:acm/certificate" => "Certificates",
        "aws:acm/certificate-validation" => "Certificate validations",
        "kubernetes:core/v1/namespace" => "Namespaces",
        "kubernetes:core/v1/service-lookup" => "Services (lookup)",
        "kubernetes:helm/v3/chart" => "Helm charts",
        "kubernetes:yaml/config-group" => "Manifests",
        _ => resource_type,
    }
}

/// Compact rendering of a desired value, references shown as `${id.path}`
pub fn render_value(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Literal(Value::String(s)) => format!("{s:?}"),
        PropertyValue::Literal(v) => v.to_string(),
        PropertyValue::Ref(r) => format!("${{{}.{}}}", r.target, r.output),
        PropertyValue::List(items) => {
            let items: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        PropertyValue::Map(entries) => {
            let entries: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{k}: {}", render_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        PropertyValue::Format(segments) => {
            let text: String = segments
                .iter()
                .map(|segment| match segment {
                    Segment::Text(text) => text.clone(),
                    Segment::Ref(r) => format!("${{{}.{}}}", r.target, r.output),
                })
                .collect();
            format!("{text:?}")
        }
    }
}

/// One-line description of why a change happens
fn change_detail(action: Action, changed: &[String], reason: Option<&str>) -> String {
    if let Some(reason) = reason {
        return format!("({reason})");
    }
    match action {
        Action::Create => String::new(),
        Action::Delete => "(no longer declared)".to_string(),
        Action::Update | Action::Replace if changed.is_empty() => String::new(),
        Action::Update | Action::Replace => format!("changed: {}", changed.join(", ")),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Print a change set grouped by resource type
///
/// With `verbose`, updates and replacements list every property diff.
pub fn print_plan(changes: &ChangeSet, graph: &Graph, verbose: bool) {
    if changes.is_empty() {
        println!();
        println!("  {} No changes. Infrastructure is up to date.", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for (resource_type, type_changes) in group_by_type(changes) {
        println!("│ {}", type_label(resource_type).bold());

        for change in type_changes {
            let detail = change_detail(change.action, &change.changed, change.reason.as_deref());
            println!(
                "│   {:<3} {:<40} {}",
                action_symbol(change.action),
                change.id.name,
                detail.dimmed()
            );

            if !verbose {
                continue;
            }
            let (Some(prior), Some(node)) = (&change.prior, graph.node(&change.id)) else {
                continue;
            };
            for diff in diff_properties(&prior.properties, node.properties()) {
                let before = diff.before.as_ref().map_or("(none)".into(), render_value);
                let after = diff.after.as_ref().map_or("(none)".into(), render_value);
                println!(
                    "│         {}: {} → {}",
                    diff.key,
                    truncate(&before, 60).red(),
                    truncate(&after, 60).green()
                );
            }
        }
        println!("│");
    }

    let summary = changes.summary();
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to delete",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().magenta(),
        summary.deletes.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

// ============================================================================
// Apply Progress
// ============================================================================

/// Progress bar fed by the executor's callbacks
pub struct ApplyProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map(|style| style.progress_chars("=>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar, verbose }
    }
}

fn result_symbol(result: &ApplyResult) -> colored::ColoredString {
    match result {
        ApplyResult::Created | ApplyResult::Updated | ApplyResult::Replaced => "✓".green(),
        ApplyResult::Deleted => "✓".red(),
        ApplyResult::Failed { .. } => "✗".red(),
        ApplyResult::Skipped { .. } => "⊘".yellow(),
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_apply_start(&mut self, steps: usize) {
        self.bar.set_length(steps as u64);
    }

    fn on_step_start(&mut self, id: &ResourceId, action: Action) {
        self.bar.set_message(format!("{action} {}", id.name));
    }

    fn on_step_complete(&mut self, id: &ResourceId, result: &ApplyResult) {
        self.bar.inc(1);
        let line = match result {
            ApplyResult::Failed { error } => Some(format!("{} {id}: {error}", result_symbol(result))),
            _ if self.verbose => Some(format!("{} {id}", result_symbol(result))),
            _ => None,
        };
        if let Some(line) = line {
            self.bar.suspend(|| println!("  {line}"));
        }
    }

    fn on_apply_complete(&mut self, _summary: &ExecuteSummary) {
        self.bar.finish_and_clear();
    }
}

// ============================================================================
// Confirmation
// ============================================================================

/// Interactive yes/no prompt on the terminal
pub struct DialoguerConfirm;

impl ConfirmCallback for DialoguerConfirm {
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(std::io::Error::other)
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Print the per-node failures and the final summary of an apply
pub fn print_report(report: &ApplyReport) {
    let failures: Vec<_> = report
        .results
        .iter()
        .filter(|r| !r.result.is_success())
        .collect();

    if !failures.is_empty() {
        section("Problems");
        for node in failures {
            let detail = match &node.result {
                ApplyResult::Failed { error } => error.clone(),
                ApplyResult::Skipped { reason } => reason.clone(),
                _ => String::new(),
            };
            println!(
                "  {} {} {} {}",
                result_symbol(&node.result),
                node.action,
                node.id,
                format!("({detail})").dimmed()
            );
        }
    }

    let summary = &report.summary;
    println!();
    if summary.is_success() {
        println!(
            "  {} Apply complete! {} changes made",
            "✓".green().bold(),
            summary.total_changes()
        );
    } else {
        println!("  {} Apply finished with problems", "⚠".yellow().bold());
    }

    for (count, label) in [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.skipped, "skipped"),
    ] {
        if count > 0 {
            println!("    • {count} resources {label}");
        }
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

/// Print stack outputs, marking the unresolved ones
pub fn print_outputs(outputs: &[(&str, Option<Value>)]) {
    section("Outputs");
    for (name, value) in outputs {
        match value {
            Some(Value::String(s)) => kv(name, s),
            Some(value) => kv(name, &value.to_string()),
            None => kv(name, &"(not available)".dimmed().to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
