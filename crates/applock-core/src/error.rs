use thiserror::Error;

use crate::settings::Backend;

/// Why a detector could not start or stopped delivering events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("{backend} backend requires a permission that is not granted")]
    PermissionMissing { backend: Backend },
    #[error("privileged channel unavailable: {0}")]
    PrivilegeUnavailable(String),
    #[error("platform call failed: {0}")]
    Platform(String),
    #[error("detector already running")]
    AlreadyRunning,
}

impl DetectorError {
    /// Errors after which the backend cannot keep running and the supervisor
    /// must fall back.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectorError::PermissionMissing { .. } | DetectorError::PrivilegeUnavailable(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("fallback backend must differ from the active backend ({0})")]
    FallbackEqualsActive(Backend),
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("{backend} restarted {count} times, limit is {limit}")]
    RestartLimit {
        backend: Backend,
        count: u32,
        limit: u32,
    },
    #[error("{backend} failed to start: {source}")]
    StartFailed {
        backend: Backend,
        #[source]
        source: DetectorError,
    },
}
