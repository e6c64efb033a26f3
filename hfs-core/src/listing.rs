use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::client::HfsError;

const EVENT_PREFIX: &str = "data: ";

/// One row of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    /// Name as sent by the server; folders end with `/`.
    pub name: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified_at: Option<OffsetDateTime>,
    /// The folder that was listed.
    pub parent_path: String,
    pub is_directory: bool,
    pub comment: String,
}

impl RemoteEntry {
    pub fn display_name(&self) -> &str {
        self.name.trim_end_matches('/')
    }

    pub fn full_path(&self) -> String {
        let parent = self.parent_path.trim_end_matches('/');
        format!("{parent}/{}", self.display_name())
    }
}

impl fmt::Display for RemoteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_directory { "folder" } else { "file" };
        write!(f, "{kind} \"{}\"", self.full_path())?;
        if !self.is_directory {
            write!(f, ", size={}", self.size)?;
        }
        if let Some(modified) = self.modified_at.and_then(|m| m.format(&Rfc3339).ok()) {
            write!(f, ", modified_at={modified}")?;
        }
        if !self.comment.is_empty() {
            write!(f, " ({})", self.comment)?;
        }
        Ok(())
    }
}

/// Capability flags sent alongside a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub can_archive: bool,
    pub can_upload: bool,
    pub can_delete: bool,
    pub can_overwrite: bool,
    pub can_comment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub entries: Vec<RemoteEntry>,
    pub permissions: Permissions,
}

/// Parses the event-stream body of `get_file_list`.
///
/// Only the first line is used. Rows that are not objects or lack a name are
/// dropped instead of failing the whole listing.
pub(crate) fn parse_listing(body: &str, parent_path: &str) -> Result<DirectoryListing, HfsError> {
    let first = body.lines().next().unwrap_or_default();
    let payload = first.strip_prefix(EVENT_PREFIX).unwrap_or(first);
    let object: Map<String, Value> = serde_json::from_str(payload)?;

    let rows = object
        .get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| HfsError::InvalidResponse("listing has no `list` array".into()))?;

    let flag = |key: &str| object.get(key).and_then(Value::as_bool).unwrap_or(false);
    let permissions = Permissions {
        can_archive: flag("can_archive"),
        can_upload: flag("can_upload"),
        can_delete: flag("can_delete"),
        can_overwrite: flag("can_overwrite"),
        can_comment: flag("can_comment"),
    };

    let entries = rows
        .iter()
        .filter_map(|row| parse_entry(row, parent_path))
        .collect();

    Ok(DirectoryListing {
        entries,
        permissions,
    })
}

fn parse_entry(row: &Value, parent_path: &str) -> Option<RemoteEntry> {
    let row = row.as_object()?;
    let name = row.get("n")?.as_str()?.to_string();
    if name.is_empty() {
        return None;
    }
    let modified_at = row
        .get("m")
        .and_then(Value::as_str)
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());

    Some(RemoteEntry {
        is_directory: name.ends_with('/'),
        size: row.get("s").and_then(Value::as_u64).unwrap_or(0),
        comment: row
            .get("c")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        parent_path: parent_path.to_string(),
        modified_at,
        name,
    })
}
