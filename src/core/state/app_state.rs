use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{HostError, HostResult};
use crate::core::version::{DEFAULT_DOWNLOAD_BASE, DEFAULT_MANIFEST_URL};

const APP_DIR_NAME: &str = "PaperHost";
const SETTINGS_FILE: &str = "host_settings.json";
const SERVER_DIR_NAME: &str = "papermc_server";
const ARTIFACT_FILE: &str = "paper_server.jar";

/// Overrides the platform data directory.
pub const DATA_DIR_ENV: &str = "PAPER_HOST_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub manifest_url: String,
    /// Prefix of every artifact URL derived from the catalog.
    pub download_base_url: String,
    /// Java binary; `java` from `PATH` when unset.
    pub java_path: Option<PathBuf>,
    /// Seconds to wait after sending `stop` before killing the server.
    /// `null` kills immediately.
    pub graceful_stop_secs: Option<u64>,
    pub console_capacity: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            download_base_url: DEFAULT_DOWNLOAD_BASE.to_string(),
            java_path: None,
            graceful_stop_secs: Some(10),
            console_capacity: 5000,
        }
    }
}

impl HostSettings {
    pub fn java_binary(&self) -> PathBuf {
        self.java_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("java"))
    }

    pub fn graceful_stop(&self) -> Option<Duration> {
        self.graceful_stop_secs.map(Duration::from_secs)
    }

    /// Read settings from the data directory. A missing or unreadable file
    /// yields defaults.
    pub fn load(paths: &HostPaths) -> Self {
        let Ok(path) = paths.settings_path() else {
            return Self::default();
        };
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!("No settings at {:?}, using defaults", path);
                return Self::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring malformed settings {:?}: {}", path, e);
            Self::default()
        })
    }

    pub fn save(&self, paths: &HostPaths) -> HostResult<()> {
        let path = paths.settings_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| HostError::io(&path, e))
    }
}

/// On-disk layout, rooted at an application-private directory:
///
/// - `host_settings.json`
/// - `papermc_server/paper_server.jar`
/// - `papermc_server/server.properties`
/// - `papermc_server/eula.txt`
#[derive(Debug, Clone)]
pub struct HostPaths {
    data_dir: Option<PathBuf>,
}

impl HostPaths {
    /// `$PAPER_HOST_DATA_DIR`, else the platform data dir. Either may be
    /// missing, in which case storage is unavailable.
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR_NAME)));
        Self { data_dir }
    }

    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
        }
    }

    pub fn unavailable() -> Self {
        Self { data_dir: None }
    }

    pub fn data_dir(&self) -> HostResult<&Path> {
        self.data_dir.as_deref().ok_or(HostError::StorageUnavailable)
    }

    pub fn settings_path(&self) -> HostResult<PathBuf> {
        Ok(self.data_dir()?.join(SETTINGS_FILE))
    }

    pub fn server_dir(&self) -> HostResult<PathBuf> {
        Ok(self.data_dir()?.join(SERVER_DIR_NAME))
    }

    pub fn artifact_path(&self) -> HostResult<PathBuf> {
        Ok(self.server_dir()?.join(ARTIFACT_FILE))
    }

    pub fn artifact_present(&self) -> bool {
        self.artifact_path().map(|p| p.is_file()).unwrap_or(false)
    }
}
