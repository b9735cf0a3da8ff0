//! Typed error hierarchy for the taskboard sync engine.
//!
//! Only the port/bind variants are fatal. Everything else affects a single
//! read or a single viewer and is logged and absorbed where it happens.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the live-sync subsystems.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No available port found in range {min}-{max}")]
    NoPortAvailable { min: u16, max: u16 },

    #[error("Server failed to start after {attempts} bind attempts: {source}")]
    ServerStartupFailed {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Tasks file at {path} could not be read: {reason}")]
    SnapshotUnreadable { path: PathBuf, reason: String },

    #[error("Tasks file at {path} does not exist")]
    SnapshotMissing { path: PathBuf },

    #[error("Failed to watch {path}: {source}")]
    WatchFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Failed to deliver update to viewer {viewer}")]
    ViewerSendFailed { viewer: String },

    #[error("Tasks file not found at {path}")]
    InitialFetchNotFound { path: PathBuf },

    #[error("Failed to read tasks file at {path}: {reason}")]
    InitialFetchFailed { path: PathBuf, reason: String },
}

impl SyncError {
    /// Whether this error should terminate the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoPortAvailable { .. } | Self::ServerStartupFailed { .. }
        )
    }

    /// Map a watcher-side read failure onto the initial-fetch taxonomy.
    pub fn into_fetch_error(self) -> Self {
        match self {
            Self::SnapshotMissing { path } => Self::InitialFetchNotFound { path },
            Self::SnapshotUnreadable { path, reason } => Self::InitialFetchFailed { path, reason },
            other => other,
        }
    }
}
