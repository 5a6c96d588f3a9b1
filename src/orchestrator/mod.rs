//! Application-level orchestration utilities.
//!
//! This module owns run lifecycle control (start/cancel), the callback adapter for
//! presentation layers, and post-run processing such as reports and exports. UI/CLI
//! layers call into this module to keep responsibilities separated.

mod callbacks;
mod controller;
mod post_process;

pub use callbacks::{spawn_dispatcher, RunCallbacks};
pub use controller::{ControllerConfig, RunController, RunHandle};
pub use post_process::{export_report, process_run_completion, ProcessedRun, RunReport};
