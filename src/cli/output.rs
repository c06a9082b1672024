//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans,
//! run reports, and observed state to the user in various formats.

use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::engine::ActionOutcome;
use crate::planner::{ActionKind, Plan};
use crate::reconciler::{DriftReport, ReconciliationReport};
use crate::resource::{ObservedState, ResourceId, ResourceStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Observed resource row for table display.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Attributes")]
    attributes: usize,
}

/// Action result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Polls")]
    polls: u32,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result for display.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Human => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Manifest is valid.", "ok".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Manifest has {} error(s):",
                        "error:".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && result.warning_count() > 0 {
                    let _ = writeln!(output, "\n{} Warnings:", "warning:".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Human => Self::format_plan_human(plan, detailed),
        }
    }

    fn format_plan_human(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - state is converged.\n",
                "ok".green()
            );
        }

        let mut output = String::new();

        let _ = writeln!(output, "\nPlan");
        let _ = writeln!(
            output,
            "   Desired hash: {}\n",
            &plan.desired_hash[..8.min(plan.desired_hash.len())]
        );

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_kind(a.kind),
                resource: a.resource.to_string(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();

        let table = Table::new(rows).to_string();
        output.push_str(&table);
        output.push('\n');

        if detailed {
            for action in &plan.actions {
                if action.attribute_diffs.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "\n   {}:", action.resource);
                for diff in &action.attribute_diffs {
                    let old = diff
                        .old
                        .as_ref()
                        .map_or_else(|| String::from("(absent)"), ToString::to_string);
                    let new = diff
                        .new
                        .as_ref()
                        .map_or_else(|| String::from("(absent)"), ToString::to_string);
                    let _ = writeln!(output, "     {} {old} -> {new}", diff.attribute);
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.count_of(ActionKind::Create).to_string().green(),
            plan.count_of(ActionKind::Update).to_string().yellow(),
            plan.count_of(ActionKind::Delete).to_string().red()
        );

        output
    }

    /// Formats a reconciliation report.
    #[must_use]
    pub fn format_report(&self, report: &ReconciliationReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Human => Self::format_report_human(report),
        }
    }

    fn format_report_human(report: &ReconciliationReport) -> String {
        let status = if report.success {
            format!("{} Run {} successful", "ok".green(), report.run_id)
        } else {
            format!("{} Run {} failed", "error:".red(), report.run_id)
        };

        let mut output = format!("{status}\n\n");

        if !report.actions.is_empty() {
            let rows: Vec<ResultRow> = report
                .actions
                .iter()
                .map(|a| ResultRow {
                    resource: a.resource.to_string(),
                    action: Self::format_action_kind(a.kind),
                    outcome: Self::format_outcome(a.outcome),
                    attempts: a.attempts,
                    polls: a.polls,
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let _ = writeln!(output, "\n   Created: {}", report.created);
        let _ = writeln!(output, "   Updated: {}", report.updated);
        let _ = writeln!(output, "   Replaced: {}", report.replaced);
        let _ = writeln!(output, "   Deleted: {}", report.deleted);
        let _ = writeln!(output, "   Unchanged: {}", report.unchanged);

        if !report.errors.is_empty() {
            let _ = writeln!(output, "\n{} Errors:", "warning:".yellow());
            for error in &report.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        output
    }

    /// Formats observed state and drift for the status command.
    #[must_use]
    pub fn format_status(
        &self,
        project: &str,
        environment: &str,
        observed: &BTreeMap<ResourceId, ObservedState>,
        drift: &DriftReport,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "project": project,
                    "environment": environment,
                    "observed": observed,
                    "drift": drift,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Human => Self::format_status_human(project, environment, observed, drift),
        }
    }

    fn format_status_human(
        project: &str,
        environment: &str,
        observed: &BTreeMap<ResourceId, ObservedState>,
        drift: &DriftReport,
    ) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nProject: {project}/{environment}\n\n");

        if observed.is_empty() {
            output.push_str("   No resources observed.\n");
        } else {
            let rows: Vec<StatusRow> = observed
                .values()
                .map(|state| StatusRow {
                    resource: state.id.to_string(),
                    status: Self::format_resource_status(state.status),
                    remote_id: state
                        .remote_id
                        .clone()
                        .unwrap_or_else(|| String::from("-")),
                    attributes: state.attributes.len(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if drift.is_converged() {
            let _ = write!(
                output,
                "\n{} {}/{} declared resource(s) converged.\n",
                "ok".green(),
                drift.total_declared,
                drift.total_declared
            );
        } else {
            let _ = writeln!(output, "\n{} Drift detected:", "warning:".yellow());
            for resource in &drift.drifted_resources {
                let _ = writeln!(output, "   - {resource}");
            }
        }

        output
    }

    /// Formats an action kind with color.
    fn format_action_kind(kind: ActionKind) -> String {
        match kind {
            ActionKind::Create => "+create".green().to_string(),
            ActionKind::Update => "~update".yellow().to_string(),
            ActionKind::Delete => "-delete".red().to_string(),
        }
    }

    /// Formats an action outcome with color.
    fn format_outcome(outcome: ActionOutcome) -> String {
        match outcome {
            ActionOutcome::Succeeded => "succeeded".green().to_string(),
            ActionOutcome::Failed => "failed".red().to_string(),
            ActionOutcome::Skipped => "skipped".yellow().to_string(),
            ActionOutcome::Cancelled => "cancelled".dimmed().to_string(),
        }
    }

    /// Formats a resource status with color.
    fn format_resource_status(status: ResourceStatus) -> String {
        match status {
            ResourceStatus::Running => "running".green().to_string(),
            ResourceStatus::Pending => "pending".yellow().to_string(),
            ResourceStatus::Stopped | ResourceStatus::Terminated => "stopped".red().to_string(),
            ResourceStatus::Unknown => "unknown".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum length, cutting only on a
    /// character boundary.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            return s.to_string();
        }
        let mut cut = max_len.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanBuilder;

    #[test]
    fn test_empty_plan_renders_converged() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let plan = PlanBuilder::empty("abc123");
        let text = formatter.format_plan(&plan, false);
        assert!(text.contains("No changes required"));
    }

    #[test]
    fn test_json_plan_is_parseable() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let plan = PlanBuilder::empty("abc123");
        let text = formatter.format_plan(&plan, false);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["desired_hash"], "abc123");
    }

    #[test]
    fn test_truncate_keeps_short_strings() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(
            OutputFormatter::truncate("a-much-longer-string", 10),
            "a-much-..."
        );
    }

    #[test]
    fn test_truncate_cuts_on_char_boundary() {
        let reason = "é".repeat(20);
        let out = OutputFormatter::truncate(&reason, 10);
        assert!(out.ends_with("..."));
        assert_eq!(out, format!("{}...", "é".repeat(3)));
    }
}
