use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use hfs_core::{HfsClient, HfsError, Session};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::conflict::{ConflictPolicy, ConflictResolver};
use super::ensure::DirectoryEnsurer;
use super::error::SyncError;
use super::oracle::RemoteExistenceOracle;
use super::paths::{PathError, join_remote, map_to_remote, normalize_remote, split_parent};
use super::transfer::{OutcomeKind, ProgressObserver, SyncTask, TransferOutcome, UploadExecutor};
use super::walk::{WalkItem, spawn_local_walk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Files processed at once. 1 means strictly sequential.
    pub concurrency: usize,
    /// Map files under `remote_root/<local root name>`.
    pub nest_under_root_name: bool,
    /// List the remote root once before walking to warm the existence cache.
    pub prime_remote_root: bool,
    pub transport_errors_fatal: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            nest_under_root_name: false,
            prime_remote_root: true,
            transport_errors_fatal: true,
        }
    }
}

/// A run that stopped early. `outcomes` holds every file settled before the stop.
#[derive(Debug, Error)]
#[error("sync halted after {} file(s): {error}", .outcomes.len())]
pub struct SyncHalted {
    pub outcomes: Vec<TransferOutcome>,
    #[source]
    pub error: SyncError,
}

impl SyncHalted {
    fn before_start(error: impl Into<SyncError>) -> Self {
        Self {
            outcomes: Vec::new(),
            error: error.into(),
        }
    }
}

/// Mirrors a local directory tree onto an HFS server.
pub struct SyncEngine {
    client: HfsClient,
    session: Session,
    options: SyncOptions,
    progress: Option<Arc<dyn ProgressObserver>>,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(client: HfsClient, session: Session) -> Self {
        Self {
            client,
            session,
            options: SyncOptions::default(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Uploads every regular file under `local_root` to the matching path
    /// under `remote_root`, creating remote folders as needed.
    ///
    /// Outcomes come back in walk order. Authorization failures stop the run,
    /// as do transport failures unless configured otherwise; everything else
    /// is recorded as a failed outcome and the walk continues.
    pub async fn sync(
        &self,
        local_root: &Path,
        remote_root: &str,
        policy: ConflictPolicy,
    ) -> Result<Vec<TransferOutcome>, SyncHalted> {
        let local_root = match tokio::fs::canonicalize(local_root).await {
            Ok(root) if root.is_dir() => root,
            _ => {
                return Err(SyncHalted::before_start(PathError::NotADirectory(
                    local_root.to_path_buf(),
                )));
            }
        };
        let mut remote_root = normalize_remote(remote_root).map_err(SyncHalted::before_start)?;
        if self.options.nest_under_root_name
            && let Some(name) = local_root.file_name()
        {
            let name = name
                .to_str()
                .ok_or_else(|| SyncHalted::before_start(PathError::NonUtf8(local_root.clone())))?;
            remote_root = join_remote(&remote_root, name);
        }
        if self.cancel.is_cancelled() {
            return Err(SyncHalted::before_start(SyncError::Cancelled));
        }

        info!(
            local = %local_root.display(),
            remote = %remote_root,
            %policy,
            concurrency = self.options.concurrency,
            "sync started"
        );

        // Stops this run's remaining files on a fatal error without touching the caller's token.
        let run_cancel = self.cancel.child_token();
        let run = Arc::new(self.prepare_run(
            local_root.clone(),
            remote_root.clone(),
            policy,
            run_cancel.clone(),
        ));
        run.ensurer
            .ensure(&remote_root)
            .await
            .map_err(SyncHalted::before_start)?;
        if self.options.prime_remote_root {
            match run.oracle.prime(&remote_root).await {
                Ok(folders) => debug!(remote = %remote_root, folders, "primed existence cache"),
                Err(HfsError::Unauthorized) => {
                    return Err(SyncHalted::before_start(SyncError::Authorization));
                }
                Err(err) => warn!(remote = %remote_root, "could not list remote root: {err}"),
            }
        }

        let concurrency = self.options.concurrency.max(1);
        let cancel = run_cancel.clone();
        let files = stream::unfold(
            spawn_local_walk(local_root, concurrency * 4),
            move |mut rx| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        item = rx.recv() => item.map(|item| (item, rx)),
                    }
                }
            },
        );
        let steps = files
            .map(|item| {
                let run = Arc::clone(&run);
                async move { run.process(item).await }
            })
            .buffered(concurrency);
        let mut steps = std::pin::pin!(steps);

        let mut outcomes = Vec::new();
        while let Some(step) = steps.next().await {
            match step {
                FileStep::Done(outcome) => outcomes.push(outcome),
                FileStep::Interrupted => {}
                FileStep::Fatal(error) => {
                    run_cancel.cancel();
                    // Files already in flight still land on the server; keep their outcomes.
                    while let Some(step) = steps.next().await {
                        if let FileStep::Done(outcome) = step {
                            outcomes.push(outcome);
                        }
                    }
                    error!(settled = outcomes.len(), "sync stopped: {error}");
                    return Err(SyncHalted { outcomes, error });
                }
            }
        }

        if self.cancel.is_cancelled() {
            warn!(settled = outcomes.len(), "sync cancelled");
            return Err(SyncHalted {
                outcomes,
                error: SyncError::Cancelled,
            });
        }

        let count = |kind: OutcomeKind| outcomes.iter().filter(|o| o.kind == kind).count();
        info!(
            uploaded = count(OutcomeKind::Uploaded),
            skipped = count(OutcomeKind::Skipped),
            failed = count(OutcomeKind::Failed),
            "sync finished"
        );
        Ok(outcomes)
    }

    /// Uploads a single local file. Without a remote path it lands at
    /// `/<file name>` on the server; missing parent folders are created.
    pub async fn upload_file(
        &self,
        local_file: &Path,
        remote_path: Option<&str>,
        policy: ConflictPolicy,
    ) -> Result<TransferOutcome, SyncError> {
        let metadata = tokio::fs::metadata(local_file)
            .await
            .map_err(|err| SyncError::invalid_task(local_file, err))?;
        if !metadata.is_file() {
            return Err(SyncError::invalid_task(local_file, "not a regular file"));
        }
        let remote_path = match remote_path.map(str::trim).filter(|path| !path.is_empty()) {
            Some(path) => normalize_remote(path)?,
            None => {
                let name = local_file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| PathError::NonUtf8(local_file.to_path_buf()))?;
                join_remote("/", name)
            }
        };
        let Some((remote_parent, _)) = split_parent(&remote_path) else {
            return Err(SyncError::invalid_task(local_file, "remote path names no file"));
        };
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let local_parent = local_file.parent().unwrap_or(Path::new(".")).to_path_buf();
        let run = self.prepare_run(
            local_parent,
            remote_parent.to_string(),
            policy,
            self.cancel.clone(),
        );
        let task = SyncTask {
            local_path: local_file.to_path_buf(),
            remote_path,
            size_bytes: metadata.len(),
        };
        info!(
            local = %task.local_path.display(),
            remote = %task.remote_path,
            %policy,
            "upload started"
        );
        let outcome = run.transfer_one(&task).await?.ok_or(SyncError::Cancelled)?;
        info!(
            path = %task.remote_path,
            kind = ?outcome.kind,
            status = ?outcome.status_code,
            "upload finished"
        );
        Ok(outcome)
    }

    fn prepare_run(
        &self,
        local_root: PathBuf,
        remote_root: String,
        policy: ConflictPolicy,
        cancel: CancellationToken,
    ) -> RunContext {
        // A fresh oracle per run so no cached answer outlives the run.
        let oracle = Arc::new(RemoteExistenceOracle::new(
            self.client.clone(),
            self.session.clone(),
        ));
        let mut executor = UploadExecutor::new(self.client.clone(), self.session.clone());
        if let Some(observer) = &self.progress {
            executor = executor.with_progress(Arc::clone(observer));
        }
        RunContext {
            ensurer: DirectoryEnsurer::new(
                self.client.clone(),
                self.session.clone(),
                Arc::clone(&oracle),
            ),
            resolver: ConflictResolver::new(Arc::clone(&oracle)),
            oracle,
            executor,
            local_root,
            remote_root,
            policy,
            cancel,
            transport_errors_fatal: self.options.transport_errors_fatal,
        }
    }
}

enum FileStep {
    Done(TransferOutcome),
    /// Cancelled before the file finished; nothing is recorded for it.
    Interrupted,
    Fatal(SyncError),
}

struct RunContext {
    oracle: Arc<RemoteExistenceOracle>,
    ensurer: DirectoryEnsurer,
    resolver: ConflictResolver,
    executor: UploadExecutor,
    local_root: PathBuf,
    remote_root: String,
    policy: ConflictPolicy,
    cancel: CancellationToken,
    transport_errors_fatal: bool,
}

impl RunContext {
    async fn process(&self, item: WalkItem) -> FileStep {
        let file = match item {
            Ok(file) => file,
            Err(failure) => {
                let task = self.task_for(failure.path.clone(), 0);
                let err = SyncError::invalid_task(failure.path, failure.message);
                return self.settle(task, err);
            }
        };

        let remote_path = match map_to_remote(&self.local_root, &file.path, &self.remote_root) {
            Ok(remote_path) => remote_path,
            Err(err) => {
                let task = SyncTask {
                    local_path: file.path,
                    remote_path: String::new(),
                    size_bytes: file.size,
                };
                return self.settle(task, err.into());
            }
        };
        let task = SyncTask {
            local_path: file.path,
            remote_path,
            size_bytes: file.size,
        };

        match self.transfer_one(&task).await {
            Ok(Some(outcome)) => {
                debug!(
                    path = %task.remote_path,
                    kind = ?outcome.kind,
                    status = ?outcome.status_code,
                    "file settled"
                );
                if !outcome.success {
                    warn!(
                        path = %task.remote_path,
                        status = ?outcome.status_code,
                        "upload rejected: {}",
                        outcome.message
                    );
                }
                FileStep::Done(outcome)
            }
            Ok(None) => FileStep::Interrupted,
            Err(err) => self.settle(task, err),
        }
    }

    #[instrument(skip(self, task), fields(path = %task.remote_path))]
    async fn transfer_one(&self, task: &SyncTask) -> Result<Option<TransferOutcome>, SyncError> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some((parent, _)) = split_parent(&task.remote_path) {
            self.ensurer.ensure(parent).await?;
        }

        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        if !self.resolver.should_upload(&task.remote_path, self.policy).await? {
            debug!("already on server, skipping");
            return Ok(Some(TransferOutcome::skipped(task.clone())));
        }

        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        self.executor.upload(task, self.policy).await.map(Some)
    }

    fn settle(&self, task: SyncTask, err: SyncError) -> FileStep {
        match err {
            SyncError::Authorization | SyncError::Cancelled => FileStep::Fatal(err),
            SyncError::Transport(_) if self.transport_errors_fatal => FileStep::Fatal(err),
            err => {
                warn!(local = %task.local_path.display(), "file failed: {err}");
                FileStep::Done(TransferOutcome::from_error(task, &err))
            }
        }
    }

    fn task_for(&self, local_path: PathBuf, size_bytes: u64) -> SyncTask {
        let remote_path =
            map_to_remote(&self.local_root, &local_path, &self.remote_root).unwrap_or_default();
        SyncTask {
            local_path,
            remote_path,
            size_bytes,
        }
    }
}
