//! Post-run processing utilities.
//!
//! Turns a finished run into a serializable report and handles exports.

use crate::model::{RunOutcome, RunRequest, RunState};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Presentation-friendly record of one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default)]
    pub timestamp_utc: String,
    pub executable: PathBuf,
    pub input_file: PathBuf,
    pub weather_file: PathBuf,
    pub run_dir: PathBuf,
    pub outcome: RunState,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl RunReport {
    pub fn from_outcome(request: &RunRequest, outcome: &RunOutcome) -> Self {
        let output = outcome.output();
        let failure = match outcome {
            RunOutcome::Failed { reason, .. } => Some(reason.to_string()),
            _ => None,
        };
        Self {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            executable: request.executable.clone(),
            input_file: request.input_file.clone(),
            weather_file: request.weather_file.clone(),
            run_dir: output.run_dir.clone(),
            outcome: outcome.state(),
            exit_code: output.exit_code,
            failure,
            duration: output.duration,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Result of post-run processing, ready for presentation layers.
pub struct ProcessedRun {
    pub report: RunReport,
    pub export_messages: Vec<String>,
}

/// Process a completed run: build its report and write any requested export.
pub fn process_run_completion(
    request: &RunRequest,
    outcome: &RunOutcome,
    export_json: Option<&Path>,
) -> ProcessedRun {
    let report = RunReport::from_outcome(request, outcome);

    let mut export_messages = Vec::new();
    if let Some(export_path) = export_json {
        match export_report(export_path, &report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        report,
        export_messages,
    }
}

pub fn export_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
