//! EnergyPlus installation discovery.
//!
//! A resolution pass either validates one explicitly configured installation
//! directory, or scans a root for `EnergyPlus-*` folders and picks the newest
//! one that actually contains an executable. Every call rescans the disk.

mod version;

pub use version::{
    parse_version_banner, version_token, VersionOrdering, PRODUCT_NAME, PRODUCT_PREFIX_LEN,
};

use crate::error::ResolveError;
use crate::model::{InstallationCandidate, ResolvedInstallation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

/// How long `<executable> --version` may run before the version probe gives up.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Executable names accepted inside an installation directory, in lookup order.
#[cfg(not(windows))]
pub const EXECUTABLE_NAMES: &[&str] = &["energyplus", "EnergyPlus"];
#[cfg(windows)]
pub const EXECUTABLE_NAMES: &[&str] = &[
    "energyplus.exe",
    "EnergyPlus.exe",
    "energyplus",
    "EnergyPlus",
];

/// Where installations live when no root is configured.
pub fn platform_install_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("/usr/local/bin")
    } else {
        PathBuf::from("/Applications")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Directory scanned when no explicit installation is given.
    pub default_root: PathBuf,
    pub ordering: VersionOrdering,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_root: platform_install_root(),
            ordering: VersionOrdering::default(),
        }
    }
}

pub struct InstallationResolver {
    cfg: ResolverConfig,
}

impl InstallationResolver {
    pub fn new(cfg: ResolverConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.cfg
    }

    /// Resolve an installation.
    ///
    /// A non-empty `root` names one installation directory and is validated
    /// as-is. Otherwise the configured default root is scanned. Finding nothing
    /// usable yields `valid == false`; only an unreadable default root is an
    /// error.
    pub fn resolve(&self, root: Option<&Path>) -> Result<ResolvedInstallation, ResolveError> {
        match root {
            Some(path) if !path.as_os_str().is_empty() => Ok(self.resolve_explicit(path)),
            _ => self.resolve_latest(),
        }
    }

    fn resolve_explicit(&self, path: &Path) -> ResolvedInstallation {
        let candidate = candidate_for(path);
        tracing::debug!(
            root = %path.display(),
            valid = candidate.is_valid(),
            "validated explicit installation"
        );
        into_resolved(candidate)
    }

    fn resolve_latest(&self) -> Result<ResolvedInstallation, ResolveError> {
        let root = &self.cfg.default_root;
        let mut valid = self.scan(root)?;
        if valid.is_empty() {
            tracing::info!(root = %root.display(), "no EnergyPlus installation found");
            return Ok(ResolvedInstallation::invalid(root));
        }

        let ordering = self.cfg.ordering;
        valid.sort_by(|a, b| {
            ordering
                .compare(&a.version, &b.version)
                .then_with(|| a.root.cmp(&b.root))
        });
        let newest = valid.pop().map(into_resolved);
        Ok(newest.unwrap_or_else(|| ResolvedInstallation::invalid(root)))
    }

    /// All valid candidates directly under `root`, in directory order.
    pub fn scan(&self, root: &Path) -> Result<Vec<InstallationCandidate>, ResolveError> {
        let entries = std::fs::read_dir(root).map_err(|source| ResolveError::NotFound {
            path: root.to_path_buf(),
            source,
        })?;

        let mut found = Vec::new();
        for entry in entries {
            // Entries that vanish or error mid-scan are just skipped.
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if version_token(name).is_none() {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let candidate = candidate_for(&path);
            if candidate.is_valid() {
                tracing::debug!(
                    root = %candidate.root.display(),
                    version = %candidate.version,
                    "found installation"
                );
                found.push(candidate);
            }
        }
        Ok(found)
    }

    /// Version token of an installation directory, from its final path component.
    pub fn version_from_path(&self, path: &Path) -> Option<String> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(version_token)
    }

    /// Installation directory a given version token would live in.
    pub fn path_for_version(&self, version: &str) -> PathBuf {
        self.cfg
            .default_root
            .join(format!("{}-{}", PRODUCT_NAME, version))
    }
}

impl Default for InstallationResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

/// Ask an executable for its version by running `<executable> --version`.
///
/// Best effort: a launch failure, a timeout or an unrecognised banner all
/// yield `None`.
pub async fn probe_version(executable: &Path) -> Option<String> {
    let mut cmd = tokio::process::Command::new(executable);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(VERSION_PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!("version probe of {} failed: {}", executable.display(), e);
            return None;
        }
        Err(_) => {
            tracing::debug!("version probe of {} timed out", executable.display());
            return None;
        }
    };
    parse_version_banner(&String::from_utf8_lossy(&output.stdout))
}

/// Fill in a valid installation's version from its executable when the
/// directory name did not carry one.
pub async fn label_installation(resolved: &mut ResolvedInstallation) {
    if !resolved.valid || resolved.version.is_some() {
        return;
    }
    if let Some(exe) = resolved.executable.as_deref() {
        resolved.version = probe_version(exe).await;
    }
}

fn candidate_for(root: &Path) -> InstallationCandidate {
    let version = root
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(version_token)
        .unwrap_or_default();
    InstallationCandidate {
        root: root.to_path_buf(),
        version,
        executable: find_executable(root),
    }
}

/// First accepted executable name present in `dir`.
///
/// Only existence is checked, not the execute bit; a non-runnable file
/// surfaces later as a spawn failure.
fn find_executable(dir: &Path) -> Option<PathBuf> {
    if !dir.exists() {
        return None;
    }
    EXECUTABLE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.exists())
}

fn into_resolved(candidate: InstallationCandidate) -> ResolvedInstallation {
    let version = Some(candidate.version).filter(|v| !v.is_empty());
    ResolvedInstallation {
        valid: candidate.executable.is_some(),
        root: candidate.root,
        executable: candidate.executable,
        version,
    }
}
