//! Callback adapter over the run event channel.
//!
//! For presentation layers that prefer four sinks (status, success, failure,
//! cancelled) over consuming [`RunEvent`]s directly. Every sink is invoked from
//! a background task.

use crate::model::{FailureReason, RunEvent, RunOutcome, RunOutput};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type StatusSink = Box<dyn FnMut(&str) + Send>;
type OutputSink = Box<dyn FnOnce(RunOutput) + Send>;
type FailureSink = Box<dyn FnOnce(RunOutput, FailureReason) + Send>;

pub struct RunCallbacks {
    on_status: StatusSink,
    on_success: OutputSink,
    on_failure: FailureSink,
    on_cancelled: OutputSink,
}

impl RunCallbacks {
    /// All sinks start out as no-ops.
    pub fn new() -> Self {
        Self {
            on_status: Box::new(|_: &str| {}),
            on_success: Box::new(|_| {}),
            on_failure: Box::new(|_, _| {}),
            on_cancelled: Box::new(|_| {}),
        }
    }

    pub fn on_status(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_status = Box::new(f);
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(RunOutput) + Send + 'static) -> Self {
        self.on_success = Box::new(f);
        self
    }

    pub fn on_failure(
        mut self,
        f: impl FnOnce(RunOutput, FailureReason) + Send + 'static,
    ) -> Self {
        self.on_failure = Box::new(f);
        self
    }

    pub fn on_cancelled(mut self, f: impl FnOnce(RunOutput) + Send + 'static) -> Self {
        self.on_cancelled = Box::new(f);
        self
    }

    fn finish(self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Completed(output) => (self.on_success)(output),
            RunOutcome::Failed { output, reason } => (self.on_failure)(output, reason),
            RunOutcome::Cancelled(output) => (self.on_cancelled)(output),
        }
    }
}

impl Default for RunCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed a run's events into `callbacks` until its terminal event.
pub fn spawn_dispatcher(
    event_rx: UnboundedReceiver<RunEvent>,
    callbacks: RunCallbacks,
) -> JoinHandle<()> {
    dispatch(event_rx, callbacks, None)
}

/// Like [`spawn_dispatcher`], also handing the outcome to `delivered` once the
/// terminal sink has returned.
pub(crate) fn dispatch(
    mut event_rx: UnboundedReceiver<RunEvent>,
    mut callbacks: RunCallbacks,
    delivered: Option<oneshot::Sender<RunOutcome>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                RunEvent::Status(status) => (callbacks.on_status)(status.to_message().as_str()),
                RunEvent::Finished { outcome } => {
                    let outcome = *outcome;
                    match delivered {
                        Some(tx) => {
                            callbacks.finish(outcome.clone());
                            let _ = tx.send(outcome);
                        }
                        None => callbacks.finish(outcome),
                    }
                    return;
                }
            }
        }
        tracing::warn!("run event channel closed before a terminal event");
    })
}
