use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to launch one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub executable: PathBuf,
    pub input_file: PathBuf,
    pub weather_file: PathBuf,
    /// Working directory for the child. When unset the child inherits ours and the
    /// run directory is taken to be the input file's folder.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(
        executable: impl Into<PathBuf>,
        input_file: impl Into<PathBuf>,
        weather_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            input_file: input_file.into(),
            weather_file: weather_file.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Folder a caller should open to inspect the run's output files.
    pub fn run_dir(&self) -> PathBuf {
        if let Some(dir) = &self.working_dir {
            return dir.clone();
        }
        let parent = match self.input_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if parent.is_absolute() {
            parent
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&parent))
                .unwrap_or(parent)
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Events emitted by a run and consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Status(StatusEvent),
    Finished {
        // Box to keep RunEvent small; the outcome carries the captured output.
        outcome: Box<RunOutcome>,
    },
}

/// Structured status notifications emitted before the terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEvent {
    Started { pid: Option<u32> },
    CancelRequested,
    StillCancelling,
    ProcessExited { code: Option<i32> },
}

impl StatusEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            StatusEvent::Started { .. } => "started".to_string(),
            StatusEvent::CancelRequested => "cancelling".to_string(),
            StatusEvent::StillCancelling => "still cancelling, forcing termination".to_string(),
            StatusEvent::ProcessExited { code: Some(code) } => {
                format!("process exited with code {}", code)
            }
            StatusEvent::ProcessExited { code: None } => {
                "process terminated by signal".to_string()
            }
        }
    }
}

/// Output captured from a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub run_dir: PathBuf,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The executable could not be launched at all.
    Spawn(String),
    /// The process ran and exited unsuccessfully. `None` means it died from a
    /// signal nobody here sent.
    ExitCode(Option<i32>),
    /// The background task went away without reporting, e.g. runtime shutdown.
    Interrupted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Spawn(msg) => write!(f, "failed to start: {}", msg),
            FailureReason::ExitCode(Some(code)) => write!(f, "exited with code {}", code),
            FailureReason::ExitCode(None) => write!(f, "terminated by signal"),
            FailureReason::Interrupted => write!(f, "run supervisor stopped unexpectedly"),
        }
    }
}

/// Terminal result of a run. Exactly one is produced per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunOutput),
    Failed {
        output: RunOutput,
        reason: FailureReason,
    },
    Cancelled(RunOutput),
}

impl RunOutcome {
    pub fn output(&self) -> &RunOutput {
        match self {
            RunOutcome::Completed(output)
            | RunOutcome::Cancelled(output)
            | RunOutcome::Failed { output, .. } => output,
        }
    }

    pub fn into_output(self) -> RunOutput {
        match self {
            RunOutcome::Completed(output)
            | RunOutcome::Cancelled(output)
            | RunOutcome::Failed { output, .. } => output,
        }
    }

    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::Failed { .. } => RunState::Failed,
            RunOutcome::Cancelled(_) => RunState::Cancelled,
        }
    }
}

/// One directory considered during a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationCandidate {
    pub root: PathBuf,
    pub version: String,
    pub executable: Option<PathBuf>,
}

impl InstallationCandidate {
    pub fn is_valid(&self) -> bool {
        self.executable.is_some()
    }
}

/// Result of resolving an installation. `valid == false` is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInstallation {
    pub valid: bool,
    pub root: PathBuf,
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ResolvedInstallation {
    pub fn invalid(root: impl Into<PathBuf>) -> Self {
        Self {
            valid: false,
            root: root.into(),
            executable: None,
            version: None,
        }
    }

    /// Human-readable version label, e.g. for a status bar.
    pub fn descriptor(&self) -> String {
        match (self.valid, self.version.as_deref()) {
            (true, Some(v)) if !v.is_empty() => format!("EnergyPlus {}", v.replace('-', ".")),
            (true, _) => "EnergyPlus (unknown version)".to_string(),
            (false, _) => "EnergyPlus not found".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_defaults_to_input_parent() {
        let req = RunRequest::new("/opt/ep/energyplus", "/data/models/in.idf", "/w/a.epw");
        assert_eq!(req.run_dir(), PathBuf::from("/data/models"));
    }

    #[test]
    fn run_dir_prefers_working_dir() {
        let req = RunRequest::new("ep", "/data/in.idf", "/w/a.epw").with_working_dir("/tmp/out");
        assert_eq!(req.run_dir(), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn bare_input_name_runs_in_cwd() {
        let req = RunRequest::new("ep", "in.idf", "a.epw");
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(req.run_dir(), cwd.join("."));
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Starting.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
    }

    #[test]
    fn descriptor_formats_version() {
        let resolved = ResolvedInstallation {
            valid: true,
            root: PathBuf::from("/usr/local/bin/EnergyPlus-9-6-0"),
            executable: Some(PathBuf::from("/usr/local/bin/EnergyPlus-9-6-0/energyplus")),
            version: Some("9-6-0".into()),
        };
        assert_eq!(resolved.descriptor(), "EnergyPlus 9.6.0");
        assert_eq!(
            ResolvedInstallation::invalid("/nowhere").descriptor(),
            "EnergyPlus not found"
        );
    }

    #[test]
    fn started_status_message() {
        assert_eq!(StatusEvent::Started { pid: Some(1) }.to_message(), "started");
    }
}
