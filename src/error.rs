//! Error types for the resolver, the run controller, and the settings store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving an EnergyPlus installation.
///
/// "Nothing usable found" is not an error; it is reported as an invalid
/// [`ResolvedInstallation`](crate::model::ResolvedInstallation).
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("installation root not found or unreadable: {path}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned synchronously by [`RunController`](crate::orchestrator::RunController).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("a simulation run is already in progress")]
    RunInProgress,
}

/// Errors produced by the settings store.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}
