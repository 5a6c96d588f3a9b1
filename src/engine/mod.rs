mod process;
mod process_tree;

use crate::model::{
    FailureReason, RunEvent, RunOutcome, RunOutput, RunRequest, RunState, StatusEvent,
};
use process::SimulationProcess;
use process_tree::{Delivery, TreeSignal};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Terminate the simulation and its workers
    Cancel,
}

/// Publishes a run's progress to whoever is listening.
///
/// Consuming `finish` guarantees a single terminal event per run.
pub(crate) struct RunReporter {
    event_tx: mpsc::UnboundedSender<RunEvent>,
    state_tx: watch::Sender<RunState>,
    outcome_tx: oneshot::Sender<RunOutcome>,
}

impl RunReporter {
    pub(crate) fn new(
        event_tx: mpsc::UnboundedSender<RunEvent>,
        state_tx: watch::Sender<RunState>,
        outcome_tx: oneshot::Sender<RunOutcome>,
    ) -> Self {
        Self {
            event_tx,
            state_tx,
            outcome_tx,
        }
    }

    fn state(&self, state: RunState) {
        self.state_tx.send_replace(state);
    }

    fn status(&self, status: StatusEvent) {
        tracing::debug!("run status: {}", status.to_message());
        let _ = self.event_tx.send(RunEvent::Status(status));
    }

    /// The event is queued before the state turns terminal, and the state turns
    /// terminal before waiters are woken, so no new run can be accepted ahead of
    /// this run's terminal event.
    fn finish(self, outcome: RunOutcome) {
        let state = outcome.state();
        tracing::info!(?state, exit_code = ?outcome.output().exit_code, "run finished");
        let _ = self.event_tx.send(RunEvent::Finished {
            outcome: Box::new(outcome.clone()),
        });
        self.state_tx.send_replace(state);
        let _ = self.outcome_tx.send(outcome);
    }
}

pub struct SimulationEngine {
    request: RunRequest,
    kill_grace: Option<Duration>,
}

impl SimulationEngine {
    pub fn new(request: RunRequest, kill_grace: Option<Duration>) -> Self {
        Self {
            request,
            kill_grace,
        }
    }

    /// Spawn the simulation and hand it to a background supervisor.
    ///
    /// Returns the control channel for the running process, or `None` when the
    /// executable could not be launched (the failure has already been reported).
    pub(crate) fn start(
        self,
        reporter: RunReporter,
    ) -> Option<mpsc::UnboundedSender<EngineControl>> {
        let started = Instant::now();
        let run_dir = self.request.run_dir();

        let process = match SimulationProcess::spawn(&self.request) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    "failed to launch {}: {}",
                    self.request.executable.display(),
                    e
                );
                reporter.finish(RunOutcome::Failed {
                    output: RunOutput {
                        run_dir,
                        duration: started.elapsed(),
                        ..Default::default()
                    },
                    reason: FailureReason::Spawn(e.to_string()),
                });
                return None;
            }
        };

        tracing::info!(pid = ?process.pid(), "simulation started");
        reporter.state(RunState::Running);
        reporter.status(StatusEvent::Started { pid: process.pid() });

        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
        tokio::spawn(self.supervise(process, ctrl_rx, reporter, run_dir, started));
        Some(ctrl_tx)
    }

    async fn supervise(
        self,
        mut process: SimulationProcess,
        mut ctrl_rx: mpsc::UnboundedReceiver<EngineControl>,
        reporter: RunReporter,
        run_dir: std::path::PathBuf,
        started: Instant,
    ) {
        let output = process.take_output();
        tokio::pin!(output);

        let mut exit = None;
        let mut captured = None;
        let mut cancelled = false;
        let mut control_open = true;
        let mut escalate_at: Option<Instant> = None;

        // The run is over once the leader has exited AND both pipes are closed;
        // workers that inherited the pipes keep them open after the leader dies.
        while exit.is_none() || captured.is_none() {
            tokio::select! {
                status = process.wait(), if exit.is_none() => {
                    let code = status.as_ref().ok().and_then(|s| s.code());
                    reporter.status(StatusEvent::ProcessExited { code });
                    exit = Some(status);
                }
                out = &mut output, if captured.is_none() => {
                    captured = Some(out);
                }
                msg = ctrl_rx.recv(), if control_open => match msg {
                    Some(EngineControl::Cancel) => {
                        if cancelled {
                            continue;
                        }
                        if exit.is_some() || process.has_exited() {
                            // Lost the race with a natural exit; report that instead.
                            // Stragglers still holding the pipes are cleared out.
                            tracing::debug!("cancel arrived after the simulation exited");
                            let _ = process.signal(TreeSignal::Terminate).await;
                            continue;
                        }
                        match process.signal(TreeSignal::Terminate).await {
                            Ok(Delivery::Signalled) => {
                                cancelled = true;
                                reporter.status(StatusEvent::CancelRequested);
                                escalate_at =
                                    self.kill_grace.map(|grace| Instant::now() + grace);
                            }
                            Ok(Delivery::AlreadyExited) => {
                                tracing::debug!("process group already gone");
                            }
                            Err(e) => tracing::warn!("failed to signal simulation: {}", e),
                        }
                    }
                    None => control_open = false,
                },
                // Cancel watchdog: escalate if the group ignores the termination request.
                _ = async {
                    match escalate_at {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => futures::future::pending().await,
                    }
                }, if escalate_at.is_some() => {
                    escalate_at = None;
                    reporter.status(StatusEvent::StillCancelling);
                    if let Err(e) = process.signal(TreeSignal::Kill).await {
                        tracing::warn!("failed to kill simulation: {}", e);
                    }
                }
            }
        }

        let (stdout, stderr) = captured.unwrap_or_default();
        let status = match exit {
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => {
                tracing::warn!("failed to wait for simulation: {}", e);
                None
            }
            None => None,
        };
        let output = RunOutput {
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            run_dir,
            duration: started.elapsed(),
        };

        let outcome = if cancelled {
            RunOutcome::Cancelled(output)
        } else if status.map(|s| s.success()).unwrap_or(false) {
            RunOutcome::Completed(output)
        } else {
            let code = output.exit_code;
            RunOutcome::Failed {
                output,
                reason: FailureReason::ExitCode(code),
            }
        };
        reporter.finish(outcome);
    }
}
