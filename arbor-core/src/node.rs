//! Node and snapshot model

use crate::inventory::InventoryKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Kind of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "folder" => Some(Self::Folder),
            _ => None,
        }
    }
}

/// One file or folder of a snapshot. The root folder has `path == ""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    pub kind: NodeKind,
    pub summary: Option<String>,
}

impl Node {
    pub fn new(path: impl Into<String>, kind: NodeKind, summary: Option<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            summary,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn name(&self) -> &str {
        name_of(&self.path)
    }

    pub fn parent_path(&self) -> Option<&str> {
        parent_path(&self.path)
    }
}

/// Parent of `path`; `None` only for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rfind('/').map(|idx| &path[..idx]).unwrap_or(""))
}

/// Last path segment
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Number of segments; the root has depth 0.
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.matches('/').count() + 1
    }
}

/// Lifecycle of a snapshot's summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One materialized version of a source tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub origin: String,
    pub display_name: String,
    pub local_root: PathBuf,
    pub status: SnapshotStatus,
    /// Cache key of the root summary, fixed once chosen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_key: Option<String>,
    /// Rule that produced the inventory; rebuilds reuse it
    #[serde(default)]
    pub inventory: InventoryKind,
}

impl Snapshot {
    pub fn new(origin: &str, local_root: &Path) -> Self {
        Self {
            id: snapshot_id(origin),
            origin: origin.to_string(),
            display_name: display_name(origin),
            local_root: local_root.to_path_buf(),
            status: SnapshotStatus::Pending,
            root_key: None,
            inventory: InventoryKind::Walk,
        }
    }
}

/// Stable snapshot identifier derived from the normalized origin
pub fn snapshot_id(origin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_origin(origin).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

fn normalize_origin(origin: &str) -> &str {
    let trimmed = origin.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed)
}

/// Human-readable name: `owner-repo` for URLs, directory name for local paths
pub fn display_name(origin: &str) -> String {
    let normalized = normalize_origin(origin);
    let path_part = if let Some((_, rest)) = normalized.split_once("://") {
        rest.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else if let Some((_, rest)) = normalized.split_once(':').filter(|_| normalized.starts_with("git@")) {
        rest
    } else {
        normalized
    };

    let segments: Vec<&str> = path_part
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    let is_remote = normalized.contains("://") || normalized.starts_with("git@");
    match segments.as_slice() {
        [] => String::new(),
        [.., owner, repo] if is_remote => format!("{}-{}", owner, repo),
        [.., last] => last.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_path_derivation() {
        assert_eq!(parent_path(""), None);
        assert_eq!(parent_path("a"), Some(""));
        assert_eq!(parent_path("a/b"), Some("a"));
        assert_eq!(parent_path("a/b/c.txt"), Some("a/b"));
    }

    #[test]
    fn test_depth_and_name() {
        assert_eq!(depth(""), 0);
        assert_eq!(depth("a"), 1);
        assert_eq!(depth("a/b/c.txt"), 3);
        assert_eq!(name_of("a/b/c.txt"), "c.txt");
        assert_eq!(name_of("a"), "a");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("https://github.com/owner/repo"), "owner-repo");
        assert_eq!(display_name("https://github.com/owner/repo.git"), "owner-repo");
        assert_eq!(display_name("git@github.com:owner/repo.git"), "owner-repo");
        assert_eq!(display_name("/home/me/projects/tool/"), "tool");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn test_snapshot_id_is_stable() {
        let a = snapshot_id("https://github.com/owner/repo");
        let b = snapshot_id("https://github.com/owner/repo.git/");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, snapshot_id("https://github.com/owner/other"));
    }

    #[test]
    fn test_kind_roundtrip_strings() {
        assert_eq!(NodeKind::parse(NodeKind::Folder.as_str()), Some(NodeKind::Folder));
        assert_eq!(NodeKind::parse("dir"), None);
    }
}
