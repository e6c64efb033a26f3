use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::trace;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub size: u64,
}

/// An entry the walker could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkFailure {
    pub path: PathBuf,
    pub message: String,
}

pub type WalkItem = Result<LocalFile, WalkFailure>;

/// Walks `root` on a blocking thread, yielding regular files in file-name
/// order. Symlinks are not followed and not reported. The walk stops early
/// once the receiver is dropped.
pub fn spawn_local_walk(root: PathBuf, buffer: usize) -> mpsc::Receiver<WalkItem> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::task::spawn_blocking(move || {
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        for entry in walker {
            let item = match entry {
                Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                    Ok(metadata) => Ok(LocalFile {
                        path: entry.into_path(),
                        size: metadata.len(),
                    }),
                    Err(err) => Err(WalkFailure {
                        path: entry.into_path(),
                        message: err.to_string(),
                    }),
                },
                Ok(entry) => {
                    trace!(path = %entry.path().display(), "skipping non-file entry");
                    continue;
                }
                Err(err) => Err(WalkFailure {
                    path: err.path().map(PathBuf::from).unwrap_or_else(|| root.clone()),
                    message: err.to_string(),
                }),
            };
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });
    rx
}
