//! Output formatters for scenario results
//!
//! Provides JSON, table and one-line summary output.

use std::io::Write;
use std::path::Path;

use anyhow::Context;

use crate::models::{CheckResult, CheckStatus, ScenarioSummary};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_str(&self, status: CheckStatus) -> &'static str {
        match (status, self.colorize) {
            (CheckStatus::Pass, true) => "\x1b[32m✓ PASS\x1b[0m",
            (CheckStatus::Fail, true) => "\x1b[31m✗ FAIL\x1b[0m",
            (CheckStatus::Error, true) => "\x1b[31m! ERROR\x1b[0m",
            (CheckStatus::Pass, false) => "✓ PASS",
            (CheckStatus::Fail, false) => "✗ FAIL",
            (CheckStatus::Error, false) => "! ERROR",
        }
    }

    fn format_result_table(&self, result: &CheckResult) -> String {
        let mut line = format!(
            "{:4}  {:28} {} [{:>7}ms]",
            result.check.id(),
            result.check.name(),
            self.status_str(result.status),
            result.duration_ms
        );
        for probe in &result.probes {
            line.push_str(&format!(
                "\n        {} -> {} {}",
                probe.from_vmi,
                probe.to_ip,
                if probe.reachable { "ok" } else { "unreachable" }
            ));
        }
        if let Some(message) = &result.message {
            line.push_str(&format!("\n        {message}"));
        }
        line
    }

    /// Format a scenario summary
    pub fn format_summary(&self, summary: &ScenarioSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &ScenarioSummary) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " {} in {} (started {})\n",
            summary.scenario,
            summary.namespace,
            summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        for result in &summary.results {
            output.push_str(&format!(" {}\n", self.format_result_table(result)));
        }

        output.push_str(" ───────────────────────────────────────────────────────────\n");
        for phase in &summary.phases {
            output.push_str(&format!(" {:10} {:>8}ms\n", phase.name, phase.duration_ms));
        }
        output.push_str(" ───────────────────────────────────────────────────────────\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_count = summary.failed + summary.errors;
        let fail_str = if self.colorize && fail_count > 0 {
            format!("\x1b[31m{fail_count}\x1b[0m")
        } else {
            fail_count.to_string()
        };

        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.total,
            pass_str,
            fail_str,
            summary.pass_rate(),
            summary.total_duration_ms
        ));

        output
    }

    fn format_summary_brief(&self, summary: &ScenarioSummary) -> String {
        format!(
            "{}: {}/{} checks passed ({:.1}%) in {}ms",
            summary.scenario,
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.total_duration_ms
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a summary to a file, uncolored
pub fn write_summary_to_file(
    path: &Path,
    summary: &ScenarioSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_summary(summary);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
