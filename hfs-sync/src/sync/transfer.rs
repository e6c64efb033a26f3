use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use hfs_core::{HfsClient, PutResponse, Session, UploadPayload};
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::conflict::ConflictPolicy;
use super::error::SyncError;

/// Files at or above this size are streamed as multipart.
pub const STREAM_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncTask {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Uploaded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub task: SyncTask,
    pub kind: OutcomeKind,
    pub status_code: Option<u16>,
    pub success: bool,
    pub message: String,
}

impl TransferOutcome {
    pub fn uploaded(task: SyncTask, status: u16) -> Self {
        Self {
            task,
            kind: OutcomeKind::Uploaded,
            status_code: Some(status),
            success: true,
            message: "uploaded".to_string(),
        }
    }

    pub fn skipped(task: SyncTask) -> Self {
        Self {
            task,
            kind: OutcomeKind::Skipped,
            status_code: None,
            success: true,
            message: "already on server".to_string(),
        }
    }

    pub fn failed(task: SyncTask, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            task,
            kind: OutcomeKind::Failed,
            status_code: status,
            success: false,
            message: message.into(),
        }
    }

    pub fn from_error(task: SyncTask, err: &SyncError) -> Self {
        Self::failed(task, err.status(), err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    InMemory,
    Streamed,
}

impl UploadStrategy {
    pub fn for_size(size: u64) -> Self {
        if size < STREAM_THRESHOLD {
            UploadStrategy::InMemory
        } else {
            UploadStrategy::Streamed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub remote_path: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Sends one local file to its remote path.
#[derive(Clone)]
pub struct UploadExecutor {
    client: HfsClient,
    session: Session,
    progress: Option<Arc<dyn ProgressObserver>>,
}

impl UploadExecutor {
    pub fn new(client: HfsClient, session: Session) -> Self {
        Self {
            client,
            session,
            progress: None,
        }
    }

    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    /// Non-2xx answers become failed outcomes. Only authorization and local
    /// precondition problems come back as errors.
    pub async fn upload(
        &self,
        task: &SyncTask,
        policy: ConflictPolicy,
    ) -> Result<TransferOutcome, SyncError> {
        let metadata = tokio::fs::metadata(&task.local_path)
            .await
            .map_err(|err| SyncError::invalid_task(&task.local_path, err))?;
        if !metadata.is_file() {
            return Err(SyncError::invalid_task(&task.local_path, "not a regular file"));
        }

        let size = metadata.len();
        let strategy = UploadStrategy::for_size(size);
        let payload = match strategy {
            UploadStrategy::InMemory => UploadPayload::Bytes(
                tokio::fs::read(&task.local_path)
                    .await
                    .map_err(|err| SyncError::invalid_task(&task.local_path, err))?,
            ),
            UploadStrategy::Streamed => UploadPayload::Multipart(self.multipart(task, size).await?),
        };
        debug!(path = %task.remote_path, size, ?strategy, "uploading");

        let PutResponse { status, body } = self
            .client
            .put_file(&self.session, &task.remote_path, payload, policy.upload_mode())
            .await?;
        if status.is_success() {
            Ok(TransferOutcome::uploaded(task.clone(), status.as_u16()))
        } else {
            Ok(TransferOutcome::failed(task.clone(), Some(status.as_u16()), body))
        }
    }

    async fn multipart(&self, task: &SyncTask, size: u64) -> Result<Form, SyncError> {
        let file = tokio::fs::File::open(&task.local_path)
            .await
            .map_err(|err| SyncError::invalid_task(&task.local_path, err))?;
        let file_name = task
            .local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let observer = self.progress.clone();
        let remote_path = task.remote_path.clone();
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            let Ok(bytes) = chunk else { return };
            sent += bytes.len() as u64;
            if let Some(observer) = &observer {
                observer.on_progress(&ProgressEvent {
                    remote_path: remote_path.clone(),
                    bytes_sent: sent,
                    total_bytes: size,
                });
            }
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), size).file_name(file_name);
        Ok(Form::new().part("file", part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use wiremock::matchers::{
        body_bytes, body_string_contains, header, header_regex, method, path, query_param,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor(server: &MockServer) -> UploadExecutor {
        let client = HfsClient::new(&server.uri()).unwrap();
        UploadExecutor::new(client, Session::from_cookie_header("hfs_http=abc"))
    }

    fn task(local_path: PathBuf, remote_path: &str) -> SyncTask {
        let size_bytes = std::fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
        SyncTask {
            local_path,
            remote_path: remote_path.to_string(),
            size_bytes,
        }
    }

    #[test]
    fn strategy_switches_at_one_mebibyte() {
        assert_eq!(UploadStrategy::for_size(0), UploadStrategy::InMemory);
        assert_eq!(
            UploadStrategy::for_size(STREAM_THRESHOLD - 1),
            UploadStrategy::InMemory
        );
        assert_eq!(
            UploadStrategy::for_size(STREAM_THRESHOLD),
            UploadStrategy::Streamed
        );
    }

    #[test]
    fn outcomes_serialize_with_lowercase_kind() {
        let outcome = TransferOutcome::skipped(SyncTask {
            local_path: PathBuf::from("/r/a.txt"),
            remote_path: "/dst/a.txt".into(),
            size_bytes: 3,
        });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["kind"], "skipped");
        assert_eq!(value["success"], true);
        assert_eq!(value["task"]["remote_path"], "/dst/a.txt");
    }

    #[tokio::test]
    async fn small_file_is_sent_as_plain_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/dst/a/file1.txt"))
            .and(query_param("existing", "skip"))
            .and(header("cookie", "hfs_http=abc"))
            .and(body_bytes(vec![b'a'; 500]))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local = dir.path().join("file1.txt");
        std::fs::write(&local, vec![b'a'; 500]).unwrap();

        let outcome = executor(&server)
            .upload(&task(local, "/dst/a/file1.txt"), ConflictPolicy::Skip)
            .await
            .unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Uploaded);
        assert_eq!(outcome.status_code, Some(201));
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn large_file_is_streamed_as_multipart_with_progress() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/dst/b/c/file2.txt"))
            .and(query_param("existing", "overwrite"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .and(body_string_contains(
                "name=\"file\"; filename=\"file2.txt\"",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local = dir.path().join("file2.txt");
        let total = 2 * STREAM_THRESHOLD;
        std::fs::write(&local, vec![b'x'; total as usize]).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let executor = executor(&server).with_progress(Arc::new(move |event: &ProgressEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        let outcome = executor
            .upload(&task(local, "/dst/b/c/file2.txt"), ConflictPolicy::Overwrite)
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Uploaded);

        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        assert!(
            events
                .windows(2)
                .all(|pair| pair[0].bytes_sent < pair[1].bytes_sent)
        );
        let last = events.last().unwrap();
        assert_eq!(last.bytes_sent, total);
        assert_eq!(last.total_bytes, total);
        assert_eq!(last.remote_path, "/dst/b/c/file2.txt");
    }

    #[tokio::test]
    async fn missing_local_file_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let err = executor(&server)
            .upload(
                &task(dir.path().join("gone.txt"), "/dst/gone.txt"),
                ConflictPolicy::Skip,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask { .. }));

        let err = executor(&server)
            .upload(&task(dir.path().to_path_buf(), "/dst/dir"), ConflictPolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask { .. }));
    }

    #[tokio::test]
    async fn unauthorized_upload_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"hello").unwrap();

        let err = executor(&server)
            .upload(&task(local, "/a.txt"), ConflictPolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Authorization));
    }

    #[tokio::test]
    async fn server_rejection_becomes_failed_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(507).set_body_string("disk full"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"hello").unwrap();

        let outcome = executor(&server)
            .upload(&task(local, "/a.txt"), ConflictPolicy::Skip)
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert_eq!(outcome.status_code, Some(507));
        assert_eq!(outcome.message, "disk full");
        assert!(!outcome.success);
    }
}
