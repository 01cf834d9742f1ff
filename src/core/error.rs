use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the server host backend.
/// Every module returns `Result<T, HostError>`.
#[derive(Debug, Error)]
pub enum HostError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Storage not accessible")]
    StorageUnavailable,

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed version manifest: {0}")]
    ManifestShape(String),

    // ── Launch ──────────────────────────────────────────
    #[error("Server jar not found at {0:?}, please download first")]
    ArtifactMissing(PathBuf),

    #[error("Failed to start server: {0}")]
    Spawn(String),

    // ── Lifecycle ───────────────────────────────────────
    #[error("Cannot {operation} while {state}")]
    Rejected {
        operation: &'static str,
        state: String,
    },

    #[error("Unknown server version: {0}")]
    UnknownVersion(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Lifecycle controller is no longer running")]
    ControllerClosed,
}

/// Coarse classification surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Storage,
    Launch,
    UserInputRejected,
    Cancelled,
    Internal,
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Http(_)
            | HostError::DownloadFailed { .. }
            | HostError::Json(_)
            | HostError::ManifestShape(_) => ErrorKind::Network,
            HostError::Io { .. } | HostError::StorageUnavailable => ErrorKind::Storage,
            HostError::ArtifactMissing(_) | HostError::Spawn(_) => ErrorKind::Launch,
            HostError::Rejected { .. } | HostError::UnknownVersion(_) => {
                ErrorKind::UserInputRejected
            }
            HostError::Cancelled | HostError::ControllerClosed => ErrorKind::Cancelled,
            HostError::TaskFailed(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type HostResult<T> = Result<T, HostError>;

impl From<std::io::Error> for HostError {
    fn from(source: std::io::Error) -> Self {
        HostError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// Errors travel to the UI as their display string.
impl serde::Serialize for HostError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
