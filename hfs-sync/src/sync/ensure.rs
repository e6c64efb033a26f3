use std::sync::Arc;

use dashmap::DashMap;
use hfs_core::{CreateFolder, HfsClient, HfsError, Session};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::SyncError;
use super::oracle::RemoteExistenceOracle;
use super::paths::{join_remote, normalize_remote, remote_segments};

/// Creates missing remote folders, one segment at a time from the root down.
pub struct DirectoryEnsurer {
    client: HfsClient,
    session: Session,
    oracle: Arc<RemoteExistenceOracle>,
    // One lock per folder path so concurrent files never create the same
    // ancestor twice.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DirectoryEnsurer {
    pub fn new(client: HfsClient, session: Session, oracle: Arc<RemoteExistenceOracle>) -> Self {
        Self {
            client,
            session,
            oracle,
            locks: DashMap::new(),
        }
    }

    /// Makes sure every segment of `remote_dir` exists. Returns how many
    /// folders were created by this call.
    pub async fn ensure(&self, remote_dir: &str) -> Result<usize, SyncError> {
        let target = normalize_remote(remote_dir)?;
        let mut parent = String::from("/");
        let mut created = 0;

        for segment in remote_segments(&target) {
            let current = join_remote(&parent, segment);
            let lock = self.lock_for(&current);
            let _guard = lock.lock().await;

            if !self.segment_exists(&current).await? {
                match self.client.create_folder(&self.session, &parent, segment).await {
                    Ok(CreateFolder::Created) => {
                        debug!(path = %current, "created remote folder");
                        created += 1;
                    }
                    Ok(CreateFolder::AlreadyExists) => {
                        debug!(path = %current, "remote folder already exists");
                    }
                    Err(HfsError::NotFound(_)) => {
                        return Err(SyncError::Structural {
                            path: current,
                            parent,
                        });
                    }
                    Err(err) => return Err(err.into()),
                }
                self.oracle.invalidate(&current);
            }
            parent = current;
        }
        Ok(created)
    }

    async fn segment_exists(&self, path: &str) -> Result<bool, SyncError> {
        match self.oracle.exists(path).await {
            Ok(found) => Ok(found),
            Err(HfsError::Unauthorized) => Err(SyncError::Authorization),
            Err(err) => {
                // Creating an existing folder is harmless, so unknown means try.
                warn!(path, "existence check failed, attempting creation: {err}");
                Ok(false)
            }
        }
    }

    fn lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
