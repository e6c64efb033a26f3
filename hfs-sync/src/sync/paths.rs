use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("{path:?} is not inside sync root {root:?}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("{0:?} is the sync root itself")]
    RootItself(PathBuf),
    #[error("{0:?} is not valid UTF-8")]
    NonUtf8(PathBuf),
    #[error("remote path {0:?} escapes the server root")]
    EscapesRoot(String),
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
}

/// Maps a file under `local_root` to its location under `remote_root`.
///
/// Both local paths are normalized lexically, so `.` and `..` are resolved
/// without touching the filesystem.
pub fn map_to_remote(
    local_root: &Path,
    local_path: &Path,
    remote_root: &str,
) -> Result<String, PathError> {
    let root = normalize_local(local_root);
    let path = normalize_local(local_path);
    let outside = || PathError::OutsideRoot {
        path: local_path.to_path_buf(),
        root: local_root.to_path_buf(),
    };
    let suffix = path.strip_prefix(&root).map_err(|_| outside())?;

    let mut segments = Vec::new();
    for component in suffix.components() {
        match component {
            Component::Normal(part) => segments.push(
                part.to_str()
                    .ok_or_else(|| PathError::NonUtf8(local_path.to_path_buf()))?,
            ),
            _ => return Err(outside()),
        }
    }
    if segments.is_empty() {
        return Err(PathError::RootItself(local_path.to_path_buf()));
    }

    Ok(join_remote(&normalize_remote(remote_root)?, &segments.join("/")))
}

/// Normalizes a server path to `/a/b` form. `\` counts as a separator.
pub fn normalize_remote(path: &str) -> Result<String, PathError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::EscapesRoot(path.to_string()));
                }
            }
            other => segments.push(other),
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Joins a normalized base with a relative `/`-separated suffix.
pub fn join_remote(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if base == "/" {
        format!("/{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Splits a normalized path into its parent and last segment.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

pub fn remote_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn normalize_local(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => continue,
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
