//! Sidecar summary cache: one text artifact per node, stored beside the node.
//!
//! Keys:
//! - file `src/main.rs` -> `src/main.rs.<ext>`
//! - folder `src/util` -> `src/util.<ext>` (in the parent folder)
//! - root -> `<display_name>.<ext>` at the snapshot top level, chosen by
//!   [`choose_root_key`] so it never lands on a genuine entry.
//!
//! Entries never expire. The cache is authoritative over the node index.

use crate::config::RootCollisionPolicy;
use crate::error::ArborError;
use crate::inventory::{SnapshotTree, PARTIAL_SUFFIX};
use crate::node::{NodeKind, Snapshot};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Location of a summary artifact, relative to the snapshot root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_relative(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-snapshot summary cache rooted at the materialized tree
#[derive(Debug, Clone)]
pub struct SummaryCache {
    root: PathBuf,
    extension: String,
    root_key: CacheKey,
}

impl SummaryCache {
    pub fn new(root: &Path, extension: &str, root_key: CacheKey) -> Self {
        Self {
            root: root.to_path_buf(),
            extension: extension.to_string(),
            root_key,
        }
    }

    /// Cache of an indexed snapshot. Snapshots never analyzed fall back to
    /// the preferred root name.
    pub fn for_snapshot(snapshot: &Snapshot, extension: &str) -> Self {
        let root_key = snapshot.root_key.clone().unwrap_or_else(|| {
            let name = if snapshot.display_name.trim().is_empty() {
                &snapshot.id
            } else {
                &snapshot.display_name
            };
            format!("{}.{}", name, extension)
        });
        Self::new(&snapshot.local_root, extension, CacheKey(root_key))
    }

    pub fn root_key(&self) -> &CacheKey {
        &self.root_key
    }

    /// Key for a node. The root (`""`) maps to the snapshot's root key.
    pub fn key_for(&self, path: &str, _kind: NodeKind) -> crate::Result<CacheKey> {
        if path.is_empty() {
            return Ok(self.root_key.clone());
        }
        check_relative(path)?;
        // Files and folders share the rule: own name plus extension, beside the item.
        Ok(CacheKey(format!("{}.{}", path.trim_end_matches('/'), self.extension)))
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.full_path(key).is_file()
    }

    /// Read an entry; missing, empty or unreadable artifacts read as absent.
    pub fn read(&self, key: &CacheKey) -> crate::Result<Option<String>> {
        match fs::read(self.full_path(key)) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(text))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::IsADirectory => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write an entry, creating the containing folder if absent.
    ///
    /// Content goes to a partial file first and is renamed into place, so a
    /// reader sees either the old artifact or the whole new one.
    pub fn write(&self, key: &CacheKey, text: &str) -> crate::Result<()> {
        let target = self.full_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut partial = target.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        fs::write(&partial, text)?;
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }
        Ok(())
    }

    fn full_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

/// Reject absolute paths and parent traversal in node paths.
pub fn check_relative(path: &str) -> crate::Result<()> {
    let p = Path::new(path);
    let ok = p
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(())
    } else {
        Err(ArborError::InvalidPath(path.to_string()))
    }
}

/// Pick the root summary key for a snapshot.
///
/// The preferred name is `<name>.<ext>`. It is taken when a genuine top-level
/// entry has that name or when it equals the sidecar key of a top-level node
/// (a folder or file named `<name>`). `Disambiguate` then walks
/// `<name>.root.<ext>`, `<name>.root-2.<ext>`, ...; `Fail` errors out.
/// An empty display name falls back to the snapshot id.
pub fn choose_root_key(
    display_name: &str,
    snapshot_id: &str,
    extension: &str,
    tree: &SnapshotTree,
    policy: RootCollisionPolicy,
) -> crate::Result<CacheKey> {
    let name = if display_name.trim().is_empty() {
        snapshot_id
    } else {
        display_name
    };

    let is_taken = |candidate: &str| -> bool {
        if tree.children("").iter().any(|c| c == candidate) {
            return true;
        }
        let suffix = format!(".{}", extension);
        candidate
            .strip_suffix(&suffix)
            .is_some_and(|base| tree.children("").iter().any(|c| c == base))
    };

    let preferred = format!("{}.{}", name, extension);
    if !is_taken(&preferred) {
        return Ok(CacheKey(preferred));
    }

    match policy {
        RootCollisionPolicy::Fail => Err(ArborError::RootKeyCollision(PathBuf::from(preferred))),
        RootCollisionPolicy::Disambiguate => {
            let mut n = 1usize;
            loop {
                let candidate = if n == 1 {
                    format!("{}.root.{}", name, extension)
                } else {
                    format!("{}.root-{}.{}", name, n, extension)
                };
                if !is_taken(&candidate) {
                    tracing::warn!(
                        preferred = %preferred,
                        chosen = %candidate,
                        "root summary name collides with an existing entry"
                    );
                    return Ok(CacheKey(candidate));
                }
                n += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryEntry;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> SummaryCache {
        SummaryCache::new(dir.path(), "md", CacheKey::from_relative("demo.md"))
    }

    #[test]
    fn test_keys_follow_naming_rule() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        assert_eq!(
            cache.key_for("src/main.rs", NodeKind::File).unwrap().as_str(),
            "src/main.rs.md"
        );
        assert_eq!(
            cache.key_for("src/util", NodeKind::Folder).unwrap().as_str(),
            "src/util.md"
        );
        assert_eq!(cache.key_for("", NodeKind::Folder).unwrap().as_str(), "demo.md");
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        assert!(cache.key_for("../etc/passwd", NodeKind::File).is_err());
        assert!(cache.key_for("/etc/passwd", NodeKind::File).is_err());
    }

    #[test]
    fn test_write_creates_folder_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let key = cache.key_for("deep/nested/file.rs", NodeKind::File).unwrap();
        assert!(!cache.exists(&key));
        assert_eq!(cache.read(&key).unwrap(), None);

        cache.write(&key, "summary text").unwrap();
        assert!(cache.exists(&key));
        assert_eq!(cache.read(&key).unwrap().as_deref(), Some("summary text"));
        assert!(!dir
            .path()
            .join(format!("deep/nested/file.rs.md{}", PARTIAL_SUFFIX))
            .exists());

        cache.write(&key, "replaced").unwrap();
        assert_eq!(cache.read(&key).unwrap().as_deref(), Some("replaced"));
    }

    #[test]
    fn test_empty_entry_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let key = cache.key_for("a.txt", NodeKind::File).unwrap();
        cache.write(&key, "  \n").unwrap();
        assert_eq!(cache.read(&key).unwrap(), None);
    }

    #[test]
    fn test_root_key_prefers_display_name() {
        let tree = SnapshotTree::from_inventory(&[InventoryEntry::file("README.md", 1)]);
        let key = choose_root_key("owner-repo", "abc", "md", &tree, RootCollisionPolicy::Fail)
            .unwrap();
        assert_eq!(key.as_str(), "owner-repo.md");
    }

    #[test]
    fn test_root_key_never_uses_generic_name() {
        let tree = SnapshotTree::from_inventory(&[]);
        let key = choose_root_key("", "0123abcd", "md", &tree, RootCollisionPolicy::Fail).unwrap();
        assert_eq!(key.as_str(), "0123abcd.md");
    }

    #[test]
    fn test_root_key_collision_policies() {
        // A genuine file and a folder whose sidecar would take the next names.
        let tree = SnapshotTree::from_inventory(&[
            InventoryEntry::file("docs.md", 1),
            InventoryEntry::folder("docs.root"),
        ]);
        let err = choose_root_key("docs", "id", "md", &tree, RootCollisionPolicy::Fail);
        assert!(matches!(err, Err(ArborError::RootKeyCollision(_))));

        let key =
            choose_root_key("docs", "id", "md", &tree, RootCollisionPolicy::Disambiguate).unwrap();
        assert_eq!(key.as_str(), "docs.root-2.md");
    }

    #[test]
    fn test_root_key_avoids_folder_sidecar() {
        let tree = SnapshotTree::from_inventory(&[InventoryEntry::folder("src")]);
        let key =
            choose_root_key("src", "id", "md", &tree, RootCollisionPolicy::Disambiguate).unwrap();
        assert_eq!(key.as_str(), "src.root.md");
    }
}
