//! Run lifecycle controller.
//!
//! Owns start/cancel orchestration for one simulation at a time and emits events
//! for presentation layers. Nothing here blocks: the process is supervised by a
//! background task and its progress arrives over channels.

use super::callbacks::{dispatch, RunCallbacks};
use crate::engine::{EngineControl, RunReporter, SimulationEngine};
use crate::error::ControllerError;
use crate::model::{FailureReason, RunEvent, RunOutcome, RunOutput, RunRequest, RunState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long a cancelled simulation may take to exit before its process group
    /// is killed outright. `None` waits indefinitely.
    #[serde(default, with = "humantime_serde")]
    pub kill_grace: Option<Duration>,
}

/// Internal handle for the current run.
struct RunCtx {
    ctrl_tx: Option<UnboundedSender<EngineControl>>,
    state_rx: watch::Receiver<RunState>,
    /// Callback delivery task; finishes only after the terminal sink returned.
    dispatcher: Option<JoinHandle<()>>,
}

impl RunCtx {
    fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    fn is_live(&self) -> bool {
        let state = self.state();
        let undelivered = self
            .dispatcher
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        (!state.is_terminal() && state != RunState::Idle) || undelivered
    }
}

/// Launches simulations one at a time.
///
/// Not meant to be shared between threads; the owning presentation layer calls
/// `start` and `cancel` from its own context. Must be used inside a tokio runtime.
pub struct RunController {
    cfg: ControllerConfig,
    run_ctx: Option<RunCtx>,
}

impl RunController {
    pub fn new(cfg: ControllerConfig) -> Self {
        Self { cfg, run_ctx: None }
    }

    /// State of the most recent run, or `Idle` if none was ever started.
    pub fn state(&self) -> RunState {
        self.run_ctx
            .as_ref()
            .map(RunCtx::state)
            .unwrap_or(RunState::Idle)
    }

    /// Whether a new `start` would be rejected: a run is still live, or a run
    /// started with callbacks has not delivered its terminal callback yet.
    pub fn is_running(&self) -> bool {
        self.run_ctx.as_ref().is_some_and(RunCtx::is_live)
    }

    /// Launch a simulation.
    ///
    /// Progress and the single terminal event are sent on `event_tx`. A spawn
    /// failure is not an error here: it is reported as a `Failed` outcome on the
    /// channel before this returns. The only error is an attempt to start while a
    /// previous run is still live.
    pub fn start(
        &mut self,
        request: RunRequest,
        event_tx: UnboundedSender<RunEvent>,
    ) -> Result<RunHandle, ControllerError> {
        if self.is_running() {
            return Err(ControllerError::RunInProgress);
        }

        let (state_tx, state_rx) = watch::channel(RunState::Starting);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let reporter = RunReporter::new(event_tx, state_tx, outcome_tx);

        tracing::info!(
            executable = %request.executable.display(),
            input = %request.input_file.display(),
            weather = %request.weather_file.display(),
            "starting simulation"
        );
        // Replaces the previous (terminal) run, if any.
        let engine = SimulationEngine::new(request, self.cfg.kill_grace);
        let ctrl_tx = engine.start(reporter);

        self.run_ctx = Some(RunCtx {
            ctrl_tx: ctrl_tx.clone(),
            state_rx: state_rx.clone(),
            dispatcher: None,
        });
        Ok(RunHandle {
            ctrl_tx,
            state_rx,
            outcome_rx,
        })
    }

    /// Launch a simulation and drive `callbacks` from its events.
    ///
    /// Callbacks run on a background task, not on the caller's thread; redispatch
    /// onto whatever owns UI state. The run counts as live, and [`RunHandle::wait`]
    /// stays pending, until the terminal callback has returned.
    pub fn start_with_callbacks(
        &mut self,
        request: RunRequest,
        callbacks: RunCallbacks,
    ) -> Result<RunHandle, ControllerError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
        let mut handle = self.start(request, event_tx)?;

        // The dispatcher, not the engine, resolves the handle.
        let (outcome_tx, outcome_rx) = oneshot::channel();
        handle.outcome_rx = outcome_rx;
        let task = dispatch(event_rx, callbacks, Some(outcome_tx));
        if let Some(ctx) = self.run_ctx.as_mut() {
            ctx.dispatcher = Some(task);
        }
        Ok(handle)
    }

    /// Request termination of the current run's whole process tree.
    ///
    /// No-op when idle or when the run already finished; safe to call repeatedly.
    /// Returns immediately; the `Cancelled` outcome arrives once the process exits.
    pub fn cancel(&self) {
        if let Some(ctx) = &self.run_ctx {
            request_cancel(ctx.ctrl_tx.as_ref(), ctx.state());
        }
    }
}

impl Default for RunController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

fn request_cancel(ctrl_tx: Option<&UnboundedSender<EngineControl>>, state: RunState) {
    if state.is_terminal() {
        return;
    }
    if let Some(tx) = ctrl_tx {
        tracing::info!("cancelling simulation");
        let _ = tx.send(EngineControl::Cancel);
    }
}

/// Caller-side view of one run.
pub struct RunHandle {
    ctrl_tx: Option<UnboundedSender<EngineControl>>,
    state_rx: watch::Receiver<RunState>,
    outcome_rx: oneshot::Receiver<RunOutcome>,
}

impl RunHandle {
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Same as [`RunController::cancel`], scoped to this run.
    pub fn cancel(&self) {
        request_cancel(self.ctrl_tx.as_ref(), self.state());
    }

    /// Wait for the run's terminal outcome.
    pub async fn wait(self) -> RunOutcome {
        match self.outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome::Failed {
                output: RunOutput::default(),
                reason: FailureReason::Interrupted,
            },
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::StatusEvent;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::time::timeout;

    const LIMIT: Duration = Duration::from_secs(20);

    /// Runs `/bin/sh <script> <weather>` so no freshly written file is exec'd.
    fn script_request(dir: &Path, body: &str) -> RunRequest {
        let script = dir.join("sim.sh");
        std::fs::write(&script, body).unwrap();
        let weather = dir.join("weather.epw");
        std::fs::write(&weather, "").unwrap();
        RunRequest::new("/bin/sh", script, weather)
    }

    async fn collect(
        mut rx: mpsc::UnboundedReceiver<RunEvent>,
    ) -> (Vec<StatusEvent>, Vec<RunOutcome>) {
        let mut statuses = Vec::new();
        let mut finished = Vec::new();
        while let Some(ev) = rx.recv().await {
            match ev {
                RunEvent::Status(s) => statuses.push(s),
                RunEvent::Finished { outcome } => finished.push(*outcome),
            }
        }
        (statuses, finished)
    }

    #[tokio::test]
    async fn cancel_on_idle_controller_is_noop() {
        let controller = RunController::default();
        controller.cancel();
        controller.cancel();
        assert_eq!(controller.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn successful_run_captures_stdout() {
        let tmp = TempDir::new().unwrap();
        let req = script_request(tmp.path(), "echo ok\necho weather=\"$1\" >&2\n");
        let weather = req.weather_file.clone();

        let mut controller = RunController::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = controller.start(req, tx).unwrap();
        assert_eq!(handle.state(), RunState::Running);

        let outcome = timeout(LIMIT, handle.wait()).await.unwrap();
        let RunOutcome::Completed(output) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(output.stdout, b"ok\n");
        assert_eq!(
            String::from_utf8_lossy(&output.stderr).trim(),
            format!("weather={}", weather.display())
        );
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.run_dir, tmp.path());
        assert_eq!(controller.state(), RunState::Completed);

        drop(controller);
        let (statuses, finished) = timeout(LIMIT, collect(rx)).await.unwrap();
        assert!(matches!(statuses.first(), Some(StatusEvent::Started { pid: Some(_) })));
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let tmp = TempDir::new().unwrap();
        let req = script_request(tmp.path(), "echo partial\nexit 3\n");
        let mut controller = RunController::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = timeout(LIMIT, controller.start(req, tx).unwrap().wait())
            .await
            .unwrap();
        match outcome {
            RunOutcome::Failed { output, reason } => {
                assert_eq!(reason, FailureReason::ExitCode(Some(3)));
                assert_eq!(output.stdout, b"partial\n");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_executable_fails_before_running() {
        let tmp = TempDir::new().unwrap();
        let req = RunRequest::new(
            tmp.path().join("no-such-energyplus"),
            tmp.path().join("in.idf"),
            tmp.path().join("w.epw"),
        );
        let mut controller = RunController::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = controller.start(req, tx).unwrap();
        assert_eq!(controller.state(), RunState::Failed);

        let outcome = handle.wait().await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                reason: FailureReason::Spawn(_),
                ..
            }
        ));

        drop(controller);
        let (statuses, finished) = collect(rx).await;
        assert!(statuses.is_empty(), "never reached Running: {statuses:?}");
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let tmp = TempDir::new().unwrap();
        let req = script_request(tmp.path(), "sleep 30\n");
        let mut controller = RunController::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = controller.start(req.clone(), tx.clone()).unwrap();

        assert_eq!(
            controller.start(req.clone(), tx.clone()).err(),
            Some(ControllerError::RunInProgress)
        );

        controller.cancel();
        let outcome = timeout(LIMIT, handle.wait()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled(_)));

        // Terminal runs give way to a new one.
        let quick = script_request(tmp.path(), "exit 0\n");
        let next = controller.start(quick, tx).unwrap();
        assert!(matches!(
            timeout(LIMIT, next.wait()).await.unwrap(),
            RunOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn cancel_terminates_forked_workers() {
        let tmp = TempDir::new().unwrap();
        // The background worker inherits stdout; if only the leader died, the
        // pipe would stay open for 60s.
        let req = script_request(tmp.path(), "sleep 60 &\nsleep 60 &\nwait\n");
        let mut controller = RunController::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = controller.start(req, tx).unwrap();

        controller.cancel();
        controller.cancel();
        let outcome = timeout(LIMIT, handle.wait()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled(_)), "{outcome:?}");

        controller.cancel();
        drop(controller);
        let (statuses, finished) = timeout(LIMIT, collect(rx)).await.unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == StatusEvent::CancelRequested)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_grace() {
        let tmp = TempDir::new().unwrap();
        let req = script_request(tmp.path(), "trap '' TERM\nwhile :; do sleep 1; done\n");
        let mut controller = RunController::new(ControllerConfig {
            kill_grace: Some(Duration::from_millis(300)),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = controller.start(req, tx).unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();

        let outcome = timeout(LIMIT, handle.wait()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled(_)));

        drop(controller);
        let (statuses, _) = timeout(LIMIT, collect(rx)).await.unwrap();
        assert!(statuses.contains(&StatusEvent::StillCancelling));
    }

    #[tokio::test]
    async fn cancel_after_exit_keeps_natural_outcome() {
        let tmp = TempDir::new().unwrap();
        let req = script_request(tmp.path(), "exit 0\n");
        let mut controller = RunController::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = controller.start(req, tx).unwrap();
        let mut state = handle.state_rx.clone();
        timeout(LIMIT, state.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();

        controller.cancel();
        assert!(matches!(handle.wait().await, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn callbacks_fire_once_in_order() {
        let tmp = TempDir::new().unwrap();
        let req = script_request(tmp.path(), "echo ok\n");
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel::<PathBuf>();

        let status_log = log.clone();
        let success_log = log.clone();
        let failure_log = log.clone();
        let cancel_log = log.clone();
        let callbacks = RunCallbacks::new()
            .on_status(move |msg| status_log.lock().unwrap().push(format!("status:{msg}")))
            .on_success(move |output| {
                success_log
                    .lock()
                    .unwrap()
                    .push(format!("success:{}", String::from_utf8_lossy(&output.stdout)));
                let _ = done_tx.send(output.run_dir);
            })
            .on_failure(move |_, _| failure_log.lock().unwrap().push("failure".into()))
            .on_cancelled(move |_| cancel_log.lock().unwrap().push("cancelled".into()));

        let mut controller = RunController::default();
        controller.start_with_callbacks(req, callbacks).unwrap();
        let run_dir = timeout(LIMIT, done_rx).await.unwrap().unwrap();
        assert_eq!(run_dir, tmp.path());

        let log = log.lock().unwrap().clone();
        assert_eq!(log.first().map(String::as_str), Some("status:started"));
        assert_eq!(log.last().map(String::as_str), Some("success:ok\n"));
        assert_eq!(log.iter().filter(|l| !l.starts_with("status:")).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn next_start_waits_for_terminal_callback() {
        let tmp = TempDir::new().unwrap();
        let missing = RunRequest::new(
            tmp.path().join("no-such-energyplus"),
            tmp.path().join("in.idf"),
            tmp.path().join("w.epw"),
        );
        let failures = Arc::new(Mutex::new(0usize));
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let seen = failures.clone();
        let callbacks = RunCallbacks::new().on_failure(move |_, reason| {
            // Hold the terminal callback until the test lets go.
            let _ = release_rx.recv_timeout(LIMIT);
            assert!(matches!(reason, FailureReason::Spawn(_)));
            *seen.lock().unwrap() += 1;
        });

        let mut controller = RunController::default();
        let handle = controller
            .start_with_callbacks(missing.clone(), callbacks)
            .unwrap();
        assert_eq!(controller.state(), RunState::Failed);
        assert!(controller.is_running());
        assert_eq!(
            controller
                .start_with_callbacks(missing.clone(), RunCallbacks::new())
                .err(),
            Some(ControllerError::RunInProgress)
        );
        assert_eq!(*failures.lock().unwrap(), 0);

        release_tx.send(()).unwrap();
        let outcome = timeout(LIMIT, handle.wait()).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                reason: FailureReason::Spawn(_),
                ..
            }
        ));
        assert_eq!(*failures.lock().unwrap(), 1);

        timeout(LIMIT, async {
            while controller.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let next = controller.start_with_callbacks(missing, RunCallbacks::new());
        assert!(next.is_ok());
    }
}
