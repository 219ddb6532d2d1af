//! Error taxonomy for reconciliation cycles

use std::path::PathBuf;

/// How far a failure reaches within a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The whole cycle is abandoned; the next tick starts over
    Cycle,
    /// Only the current container is skipped; the cycle continues
    Container,
}

/// Errors produced while reconciling the proxy configuration
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network resolution or container listing failed
    #[error("container discovery failed: {0}")]
    Discovery(String),

    /// The proxy container has no network and no fallback is configured
    #[error("proxy container '{0}' has no network attachment and no fallback network is configured")]
    NoNetworkAvailable(String),

    /// The container exposes no private port
    #[error("container '{0}' exposes no private port")]
    NoPortExposed(String),

    /// The container name cannot be used as an upstream name or location path
    #[error("container name '{0}' is not a valid upstream identifier")]
    InvalidServiceName(String),

    #[error("failed to read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document changed between read and write
    #[error("config file {} changed while an update was being prepared", .0.display())]
    ConfigConflict(PathBuf),

    /// The reload command failed or could not be started
    #[error("proxy reload failed: {0}")]
    Reload(String),
}

impl SyncError {
    /// Get the scope this error is contained to
    pub fn scope(&self) -> ErrorScope {
        match self {
            SyncError::Discovery(_) => ErrorScope::Cycle,
            SyncError::NoNetworkAvailable(_) => ErrorScope::Cycle,
            SyncError::NoPortExposed(_) => ErrorScope::Container,
            SyncError::InvalidServiceName(_) => ErrorScope::Container,
            SyncError::ConfigRead { .. } => ErrorScope::Container,
            SyncError::ConfigWrite { .. } => ErrorScope::Container,
            SyncError::ConfigConflict(_) => ErrorScope::Container,
            SyncError::Reload(_) => ErrorScope::Container,
        }
    }

    /// Short machine-readable code for log fields
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Discovery(_) => "DISCOVERY_FAILED",
            SyncError::NoNetworkAvailable(_) => "NO_NETWORK_AVAILABLE",
            SyncError::NoPortExposed(_) => "NO_PORT_EXPOSED",
            SyncError::InvalidServiceName(_) => "INVALID_SERVICE_NAME",
            SyncError::ConfigRead { .. } => "CONFIG_READ_FAILED",
            SyncError::ConfigWrite { .. } => "CONFIG_WRITE_FAILED",
            SyncError::ConfigConflict(_) => "CONFIG_CONFLICT",
            SyncError::Reload(_) => "RELOAD_FAILED",
        }
    }
}

impl From<bollard::errors::Error> for SyncError {
    fn from(e: bollard::errors::Error) -> Self {
        SyncError::Discovery(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
