use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier handed to callers for pause / resume / cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DownloadHandle(pub(crate) u64);

impl From<u64> for DownloadHandle {
    fn from(id: u64) -> Self {
        DownloadHandle(id)
    }
}

impl fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    Idle,
    InProgress,
    Paused,
    Completed,
    Failed,
    /// Abandoned through `cancel`; never persisted.
    Cancelled,
}

impl DownloadStatus {
    /// Completed, Failed and Cancelled downloads accept no further commands.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    /// Marker used in the progress record file.
    pub fn as_record_str(self) -> &'static str {
        match self {
            DownloadStatus::Idle => "idle",
            DownloadStatus::InProgress => "in-progress",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_record_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(DownloadStatus::Idle),
            "in-progress" => Some(DownloadStatus::InProgress),
            "paused" => Some(DownloadStatus::Paused),
            "completed" => Some(DownloadStatus::Completed),
            "failed" => Some(DownloadStatus::Failed),
            "cancelled" => Some(DownloadStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_record_str())
    }
}

/// Point-in-time view of one download.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadSnapshot {
    pub handle: DownloadHandle,
    pub url: String,
    pub destination: PathBuf,
    pub bytes_downloaded: u64,
    /// 0 while the server has not reported a length.
    pub total_bytes: u64,
    pub status: DownloadStatus,
}

/// One entry of the supervisor's event feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadEvent {
    pub handle: DownloadHandle,
    pub kind: DownloadEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadEventKind {
    Progress {
        bytes_downloaded: u64,
        /// 0 means the total is unknown; see [`crate::progress::percent`].
        total_bytes: u64,
    },
    Finished {
        path: PathBuf,
    },
    Failed {
        cause: String,
    },
    PauseStateChanged {
        paused: bool,
    },
}

/// Coarse classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    Transport,
    Filesystem,
    Request,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("progress storage unavailable at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("transfer ended early: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("cannot write destination {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid url {0:?}")]
    InvalidUrl(String),

    #[error("destination {} is already used by another download", .0.display())]
    DestinationInUse(PathBuf),

    #[error("unknown download handle {0}")]
    UnknownHandle(DownloadHandle),

    #[error("download {0} is still running or paused")]
    StillActive(DownloadHandle),

    #[error("malformed progress record: {0}")]
    MalformedRecord(String),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Storage { .. } | DownloadError::MalformedRecord(_) => ErrorKind::Storage,
            DownloadError::Network(_)
            | DownloadError::HttpStatus(_)
            | DownloadError::Truncated { .. } => ErrorKind::Transport,
            DownloadError::Filesystem { .. } => ErrorKind::Filesystem,
            DownloadError::InvalidUrl(_)
            | DownloadError::DestinationInUse(_)
            | DownloadError::UnknownHandle(_)
            | DownloadError::StillActive(_) => ErrorKind::Request,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
