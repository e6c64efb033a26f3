use std::path::PathBuf;

use hfs_core::HfsError;
use thiserror::Error;

use super::paths::PathError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("cannot upload {path:?}: {reason}")]
    InvalidTask { path: PathBuf, reason: String },
    #[error("transport failure: {0}")]
    Transport(#[source] HfsError),
    #[error("server error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error("access denied by server")]
    Authorization,
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("cannot create {path}: parent {parent} is missing on the server")]
    Structural { path: String, parent: String },
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn invalid_task(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SyncError::InvalidTask {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Api { status, .. } => *status,
            SyncError::Authorization => Some(401),
            _ => None,
        }
    }
}

impl From<HfsError> for SyncError {
    fn from(err: HfsError) -> Self {
        match err {
            HfsError::Unauthorized => SyncError::Authorization,
            HfsError::NotFound(path) => SyncError::NotFound(path),
            HfsError::Api { status, body } => SyncError::Api {
                status: Some(status.as_u16()),
                message: body,
            },
            HfsError::Json(err) => SyncError::Api {
                status: None,
                message: err.to_string(),
            },
            HfsError::InvalidResponse(message) => SyncError::Api {
                status: None,
                message,
            },
            other @ HfsError::Request(_) if other.is_transport() => SyncError::Transport(other),
            // A response arrived but its body could not be read or decoded.
            HfsError::Request(err) => SyncError::Api {
                status: err.status().map(|status| status.as_u16()),
                message: err.to_string(),
            },
            HfsError::Url(err) => SyncError::Api {
                status: None,
                message: format!("cannot build request url: {err}"),
            },
        }
    }
}
