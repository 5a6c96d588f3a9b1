//! Launch EnergyPlus simulations and pick which installation runs them.
//!
//! Two independent pieces:
//! - [`install`] finds a usable EnergyPlus executable, either in an explicitly
//!   configured directory or by scanning for the newest `EnergyPlus-*` folder.
//! - [`orchestrator::RunController`] starts a simulation in the background,
//!   streams [`model::RunEvent`]s, and cancels the whole process tree on request.
//!
//! [`cli`] is a thin presentation layer wiring the two together.

pub mod cli;
pub mod engine;
pub mod error;
pub mod install;
pub mod model;
pub mod orchestrator;
pub mod settings;
mod text_summary;

pub use error::{ControllerError, ResolveError, SettingsError};
pub use install::{InstallationResolver, ResolverConfig, VersionOrdering};
pub use model::{
    FailureReason, ResolvedInstallation, RunEvent, RunOutcome, RunOutput, RunRequest, RunState,
};
pub use orchestrator::{ControllerConfig, RunCallbacks, RunController, RunHandle};
