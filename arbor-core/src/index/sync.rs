//! Cache-to-index replay and cache-first summary resolution.

use super::NodeIndex;
use crate::cache::SummaryCache;
use crate::config::IgnoreConfig;
use crate::error::ArborError;
use crate::inventory::{self, InventoryEntry};
use crate::node::{Node, NodeKind};
use tracing::{debug, info};

impl NodeIndex {
    /// Rebuild a snapshot's node rows from the summary cache.
    ///
    /// Rows are dropped and re-registered from `entries`, then every node with a
    /// readable cache artifact gets that text as its summary. The cache is never
    /// written. Returns the number of summaries restored.
    pub fn rebuild_from_cache(
        &self,
        snapshot_id: &str,
        entries: &[InventoryEntry],
        cache: &SummaryCache,
    ) -> crate::Result<usize> {
        let removed = self.delete_nodes(snapshot_id)?;
        self.register_structure(snapshot_id, entries)?;

        let mut restored = 0;
        let nodes = std::iter::once(("", NodeKind::Folder))
            .chain(entries.iter().map(|e| (e.path.as_str(), e.kind)));
        for (path, kind) in nodes {
            let key = cache.key_for(path, kind)?;
            if let Some(text) = cache.read(&key)? {
                self.upsert(snapshot_id, &Node::new(path, kind, Some(text)))?;
                restored += 1;
            } else {
                debug!(path, "no cache entry during rebuild");
            }
        }

        info!(
            snapshot_id,
            removed,
            restored,
            nodes = entries.len() + 1,
            "rebuilt node index from cache"
        );
        Ok(restored)
    }

    /// Re-list a snapshot's materialized tree with the inventory rule its
    /// analysis used, then replay its cache.
    pub fn rebuild_snapshot(
        &self,
        snapshot_id: &str,
        ignore: &IgnoreConfig,
        sidecar_extension: &str,
    ) -> crate::Result<usize> {
        let snapshot = self
            .get_snapshot(snapshot_id)?
            .ok_or_else(|| ArborError::NotFound(format!("snapshot {}", snapshot_id)))?;
        let cache = SummaryCache::for_snapshot(&snapshot, sidecar_extension);
        let reserved = vec![cache.root_key().as_str().to_string()];
        let entries = inventory::collect(
            snapshot.inventory,
            &snapshot.local_root,
            ignore,
            sidecar_extension,
            &reserved,
        )?;
        self.rebuild_from_cache(snapshot_id, &entries, &cache)
    }

    /// Summary for a node: the cache artifact if present, else the index value.
    pub fn resolve_summary(
        &self,
        snapshot_id: &str,
        path: &str,
        kind: NodeKind,
        cache: &SummaryCache,
    ) -> crate::Result<Option<String>> {
        let key = cache.key_for(path, kind)?;
        if let Some(text) = cache.read(&key)? {
            return Ok(Some(text));
        }
        Ok(self
            .get_node(snapshot_id, path)?
            .and_then(|node| node.summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::inventory::InventoryKind;
    use crate::node::Snapshot;
    use std::path::Path;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_cache_wins_over_stale_index() {
        let dir = TempDir::new().unwrap();
        let index = NodeIndex::open_in_memory().unwrap();
        let snapshot = Snapshot::new("/tmp/demo", dir.path());
        index.upsert_snapshot(&snapshot).unwrap();
        let cache = SummaryCache::new(dir.path(), "md", CacheKey::from_relative("demo.md"));

        index
            .upsert(&snapshot.id, &Node::new("a.rs", NodeKind::File, Some("stale".into())))
            .unwrap();
        let key = cache.key_for("a.rs", NodeKind::File).unwrap();
        cache.write(&key, "fresh").unwrap();

        let resolved = index
            .resolve_summary(&snapshot.id, "a.rs", NodeKind::File, &cache)
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("fresh"));

        // Without a cache entry the index value is used.
        index
            .upsert(&snapshot.id, &Node::new("b.rs", NodeKind::File, Some("indexed".into())))
            .unwrap();
        let resolved = index
            .resolve_summary(&snapshot.id, "b.rs", NodeKind::File, &cache)
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("indexed"));
    }

    #[test]
    fn test_rebuild_replays_cache() {
        let dir = TempDir::new().unwrap();
        let index = NodeIndex::open_in_memory().unwrap();
        let snapshot = Snapshot::new("/tmp/demo", dir.path());
        index.upsert_snapshot(&snapshot).unwrap();
        let cache = SummaryCache::new(dir.path(), "md", CacheKey::from_relative("demo.md"));

        let entries = vec![
            InventoryEntry::folder("src"),
            InventoryEntry::file("src/lib.rs", 10),
            InventoryEntry::file("src/extra.rs", 10),
        ];
        cache
            .write(&cache.key_for("src/lib.rs", NodeKind::File).unwrap(), "lib summary")
            .unwrap();
        cache
            .write(&cache.key_for("src", NodeKind::Folder).unwrap(), "src summary")
            .unwrap();
        cache.write(cache.root_key(), "root summary").unwrap();

        index
            .upsert(&snapshot.id, &Node::new("gone.rs", NodeKind::File, Some("old".into())))
            .unwrap();

        let restored = index.rebuild_from_cache(&snapshot.id, &entries, &cache).unwrap();
        assert_eq!(restored, 3);
        assert!(index.get_node(&snapshot.id, "gone.rs").unwrap().is_none());
        assert_eq!(
            index.get_node(&snapshot.id, "").unwrap().unwrap().summary.as_deref(),
            Some("root summary")
        );
        assert_eq!(
            index
                .get_node(&snapshot.id, "src/extra.rs")
                .unwrap()
                .unwrap()
                .summary,
            None
        );
    }

    #[test]
    fn test_rebuild_snapshot_walks_local_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("main.rs.md"), "entry point").unwrap();
        std::fs::write(dir.path().join("demo.md"), "overview").unwrap();

        let index = NodeIndex::open_in_memory().unwrap();
        let mut snapshot = Snapshot::new("/tmp/demo", dir.path());
        snapshot.root_key = Some("demo.md".into());
        index.upsert_snapshot(&snapshot).unwrap();

        let restored = index
            .rebuild_snapshot(&snapshot.id, &IgnoreConfig::default(), "md")
            .unwrap();
        assert_eq!(restored, 2);
        assert!(index.get_node(&snapshot.id, "demo.md").unwrap().is_none());
        assert_eq!(
            index.get_node(&snapshot.id, "main.rs").unwrap().unwrap().summary.as_deref(),
            Some("entry point")
        );

        let missing = index.rebuild_snapshot("nope", &IgnoreConfig::default(), "md");
        assert!(matches!(missing, Err(ArborError::NotFound(_))));
    }

    #[test]
    fn test_rebuild_tracked_snapshot_lists_tracked_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn run() {}").unwrap();
        std::fs::write(root.join("notes"), "raw notes").unwrap();
        std::fs::write(root.join("notes.md"), "Rendered notes").unwrap();
        std::fs::write(root.join("scratch.txt"), "untracked").unwrap();
        // Tracked inventories come from git; nothing to check without it
        if !git(root, &["init", "-q"]) {
            return;
        }
        assert!(git(root, &["add", "src/lib.rs", "notes", "notes.md"]));

        let index = NodeIndex::open_in_memory().unwrap();
        let mut snapshot = Snapshot::new("https://example.com/o/demo", root);
        snapshot.root_key = Some("demo.md".into());
        snapshot.inventory = InventoryKind::Tracked;
        index.upsert_snapshot(&snapshot).unwrap();
        assert_eq!(
            index.get_snapshot(&snapshot.id).unwrap().unwrap().inventory,
            InventoryKind::Tracked
        );

        let cache = SummaryCache::for_snapshot(&snapshot, "md");
        cache
            .write(&cache.key_for("src/lib.rs", NodeKind::File).unwrap(), "lib summary")
            .unwrap();
        cache.write(cache.root_key(), "overview").unwrap();

        index
            .rebuild_snapshot(&snapshot.id, &IgnoreConfig::default(), "md")
            .unwrap();
        let mut paths: Vec<String> = index
            .list_filtered(&snapshot.id, None, None)
            .unwrap()
            .into_iter()
            .map(|n| n.path)
            .collect();
        paths.sort();
        // Untracked files and sidecars stay out; a tracked `X.md` beside `X` stays in
        assert_eq!(paths, vec!["notes", "notes.md", "src", "src/lib.rs"]);
        assert_eq!(
            index.get_node(&snapshot.id, "src/lib.rs").unwrap().unwrap().summary.as_deref(),
            Some("lib summary")
        );
    }
}
