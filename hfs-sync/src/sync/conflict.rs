use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hfs_core::{Existence, HfsError, UploadMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::oracle::RemoteExistenceOracle;

/// How an upload treats a file that is already on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Skip,
    Overwrite,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown conflict policy {0:?}, expected \"skip\" or \"overwrite\"")]
pub struct UnknownPolicy(pub String);

impl ConflictPolicy {
    pub fn upload_mode(self) -> UploadMode {
        match self {
            ConflictPolicy::Skip => UploadMode::Skip,
            ConflictPolicy::Overwrite => UploadMode::Overwrite,
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = UnknownPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            _ => Err(UnknownPolicy(value.to_string())),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.upload_mode().as_query_value())
    }
}

/// Whether a file with the given remote state should be sent.
pub fn decide(policy: ConflictPolicy, remote: &Existence) -> bool {
    match policy {
        ConflictPolicy::Overwrite => true,
        ConflictPolicy::Skip => !remote.is_present(),
    }
}

pub struct ConflictResolver {
    oracle: Arc<RemoteExistenceOracle>,
}

impl ConflictResolver {
    pub fn new(oracle: Arc<RemoteExistenceOracle>) -> Self {
        Self { oracle }
    }

    pub async fn should_upload(
        &self,
        remote_path: &str,
        policy: ConflictPolicy,
    ) -> Result<bool, HfsError> {
        if policy == ConflictPolicy::Overwrite {
            return Ok(true);
        }
        let remote = self.oracle.probe(remote_path).await?;
        let upload = decide(policy, &remote);
        debug!(path = remote_path, ?remote, upload, "conflict check");
        Ok(upload)
    }
}
