//! Persisted launcher settings.
//!
//! A small JSON document under the user's config directory. Loading never fails:
//! a missing or unreadable file just yields defaults. Saving writes to a temp
//! file and renames it into place.

use crate::error::SettingsError;
use crate::install::VersionOrdering;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Installation directory to use as-is. Empty means "scan for the newest".
    #[serde(default)]
    pub install_root: String,
    #[serde(default)]
    pub last_input: Option<PathBuf>,
    #[serde(default)]
    pub last_weather: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub kill_grace: Option<Duration>,
    #[serde(default)]
    pub version_ordering: VersionOrdering,
}

impl Settings {
    /// The configured installation directory, if any.
    pub fn install_root(&self) -> Option<&Path> {
        let root = self.install_root.trim();
        (!root.is_empty()).then(|| Path::new(root))
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/eplaunch-lite/settings.json` for the current user.
    pub fn default_location() -> Result<Self, SettingsError> {
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::new(dir.join("eplaunch-lite").join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Settings {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
            Err(e) => {
                tracing::warn!("failed to read settings {}: {}", self.path.display(), e);
                return Settings::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(
                    "ignoring malformed settings {}: {}",
                    self.path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(settings)?;
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        tracing::debug!("saved settings to {}", self.path.display());
        Ok(())
    }
}
