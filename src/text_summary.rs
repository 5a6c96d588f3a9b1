//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for a finished run in text mode.

use crate::model::RunState;
use crate::orchestrator::RunReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a run report.
pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();

    let elapsed = humantime::format_duration(round_to_millis(report.duration));
    let headline = match report.outcome {
        RunState::Completed => format!("Simulation completed in {elapsed}"),
        RunState::Cancelled => format!("Simulation cancelled after {elapsed}"),
        _ => match report.failure.as_deref() {
            Some(reason) => format!("EnergyPlus failed: {reason}"),
            None => "EnergyPlus failed".to_string(),
        },
    };
    lines.push(headline);
    lines.push(format!("Input:   {}", report.input_file.display()));
    lines.push(format!("Weather: {}", report.weather_file.display()));
    lines.push(format!("Run directory: {}", report.run_dir.display()));
    if report.outcome == RunState::Failed && report.exit_code.is_some() {
        lines.push(
            "The error file in the run directory is the best place to start.".to_string(),
        );
    }

    if !report.stdout.trim().is_empty() {
        lines.push(String::new());
        lines.push("EnergyPlus Simulation Output:".to_string());
        lines.extend(report.stdout.lines().map(str::to_string));
    }

    TextSummary { lines }
}

fn round_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(d.as_millis() as u64)
}
