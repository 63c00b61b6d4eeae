//! Run summary output (text, JSON).

use serde::Serialize;

use crate::reconcile::Summary;
use crate::utils::{format_count_with_separator as sep, truncate};

/// Invalid tokens listed in the text report
const INVALID_SAMPLE: usize = 5;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Report data structure for JSON serialization
#[derive(Debug, Serialize)]
struct Report<'a> {
    version: &'static str,
    elapsed_seconds: f64,
    #[serde(flatten)]
    summary: &'a Summary,
}

/// Render a summary in the requested format.
pub fn render(summary: &Summary, elapsed_seconds: f64, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => format_text(summary, elapsed_seconds),
        ReportFormat::Json => format_json(summary, elapsed_seconds),
    }
}

fn format_json(summary: &Summary, elapsed_seconds: f64) -> String {
    let report = Report {
        version: env!("CARGO_PKG_VERSION"),
        elapsed_seconds: (elapsed_seconds * 100.0).round() / 100.0,
        summary,
    };
    serde_json::to_string_pretty(&report).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

fn format_text(summary: &Summary, elapsed_seconds: f64) -> String {
    let tally = &summary.tally;
    let mut out = String::new();

    out.push_str("══════════════════════════════════════════════════════════════════\n");
    out.push_str(" AUTOBLOCK DENY-LIST UPDATE\n");
    out.push_str("══════════════════════════════════════════════════════════════════\n");
    out.push_str(&format!(
        " Single IPs parsed:         {:>16}\n",
        sep(summary.single_addresses as u128)
    ));
    out.push_str(&format!(
        " CIDR networks admitted:    {:>16}  ({} IPs)\n",
        sep(summary.admitted_networks as u128),
        sep(tally.admitted_addresses)
    ));
    if tally.rejected_networks > 0 {
        out.push_str(&format!(
            " CIDR networks too large:   {:>16}  ({} IPs skipped)\n",
            sep(tally.rejected_networks as u128),
            sep(tally.rejected_addresses)
        ));
    }
    out.push_str(&format!(
        " Invalid entries:           {:>16}\n",
        sep(tally.invalid_tokens as u128)
    ));
    if !summary.invalid.is_empty() {
        let sample: Vec<String> = summary
            .invalid
            .iter()
            .take(INVALID_SAMPLE)
            .map(|t| truncate(t, 40))
            .collect();
        let more = summary.invalid.len().saturating_sub(INVALID_SAMPLE);
        out.push_str(&format!("   {}", sample.join(", ")));
        if more > 0 {
            out.push_str(&format!(" (+{} more)", more));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        " Total potential IPs:       {:>16}\n",
        sep(summary.total_to_apply())
    ));
    out.push_str(" ────────────────────────────────────────────────────────────────\n");

    if !summary.store_available {
        out.push_str(" No database access. No changes were made to the database\n");
    } else {
        if let Some(outcome) = summary.expired_removed {
            out.push_str(&format!(
                " Expired entries removed:   {:>16}  ({} batches)\n",
                sep(outcome.rows_deleted as u128),
                outcome.batches
            ));
        }
        if let Some(outcome) = summary.cleared {
            out.push_str(&format!(
                " Deny entries cleared:      {:>16}  ({} batches)\n",
                sep(outcome.rows_deleted as u128),
                outcome.batches
            ));
        }
        if let Some(before) = summary.denied_before {
            out.push_str(&format!(
                " Deny IPs before:           {:>16}\n",
                sep(before as u128)
            ));
        }
        if let Some(after) = summary.denied_after {
            let change = summary
                .net_change()
                .map(|c| format!("  ({:+} net)", c))
                .unwrap_or_default();
            out.push_str(&format!(
                " Deny IPs after:            {:>16}{}\n",
                sep(after as u128),
                change
            ));
        }
        if !summary.dry_run {
            out.push_str(&format!(
                " IPs written:               {:>16}\n",
                sep(summary.applied_addresses)
            ));
        }
        if summary.skipped_networks > 0 || summary.skipped_addresses > 0 {
            out.push_str(&format!(
                " Not applied:               {:>16}  ({} CIDR networks)\n",
                sep(summary.skipped_addresses),
                summary.skipped_networks
            ));
        }
        if let Some(ref failure) = summary.failure {
            out.push_str(&format!(" Error: {}\n", failure));
        }
        if summary.dry_run {
            out.push_str(" Dry run mode. No changes were made to the database\n");
        }
    }

    out.push_str(&format!(" Elapsed time: {:.2} seconds\n", elapsed_seconds));
    out.push_str("══════════════════════════════════════════════════════════════════\n");
    out
}
