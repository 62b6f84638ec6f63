//! Node index backed by SQLite.
//!
//! A derived projection of the summary cache: one row per node plus snapshot
//! and task bookkeeping. Everything in `nodes.summary` can be rebuilt by
//! replaying the cache (see [`NodeIndex::rebuild_from_cache`]).

mod sync;
mod tasks;
mod usage;

use crate::error::ArborError;
use crate::inventory::{InventoryEntry, InventoryKind};
use crate::node::{name_of, parent_path, Node, NodeKind, Snapshot, SnapshotStatus};
use crate::task::now_rfc3339;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_VERSION: i32 = 2;

const NODE_SELECT: &str = "path, kind, summary";

/// Recursive view of a snapshot for tree rendering
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// A summarized node together with its snapshot
#[derive(Debug, Clone)]
pub struct IndexedSummary {
    pub snapshot_id: String,
    pub path: String,
    pub kind: NodeKind,
    pub summary: String,
}

/// SQLite-backed node index shared between tasks
pub struct NodeIndex {
    conn: Mutex<Connection>,
}

impl NodeIndex {
    /// Open or create the index database at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn, true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory index, used by tests and one-shot runs
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn, false)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection, on_disk: bool) -> crate::Result<()> {
        if on_disk {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA busy_timeout = 5000;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(ArborError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS snapshots (
                    id TEXT PRIMARY KEY,
                    origin TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    local_root TEXT NOT NULL,
                    status TEXT NOT NULL,
                    root_key TEXT,
                    inventory TEXT NOT NULL DEFAULT 'walk',
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS nodes (
                    id INTEGER PRIMARY KEY,
                    snapshot_id TEXT NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
                    path TEXT NOT NULL,
                    parent_path TEXT,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    summary TEXT,
                    updated_at TEXT NOT NULL,
                    UNIQUE(snapshot_id, path)
                );

                CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(snapshot_id, parent_path);

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    snapshot_id TEXT NOT NULL,
                    origin TEXT NOT NULL,
                    status TEXT NOT NULL,
                    progress INTEGER NOT NULL DEFAULT 0,
                    message TEXT NOT NULL DEFAULT '',
                    error TEXT,
                    result_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_snapshot ON tasks(snapshot_id);

                CREATE TABLE IF NOT EXISTS passphrase_usage (
                    id INTEGER PRIMARY KEY,
                    passphrase TEXT NOT NULL,
                    action TEXT NOT NULL,
                    snapshot_id TEXT NOT NULL,
                    confirmed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_usage_passphrase ON passphrase_usage(passphrase, action);
                ",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Snapshots

    pub fn upsert_snapshot(&self, snapshot: &Snapshot) -> crate::Result<()> {
        self.conn().execute(
            "INSERT INTO snapshots (id, origin, display_name, local_root, status, root_key, inventory, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                origin = excluded.origin,
                display_name = excluded.display_name,
                local_root = excluded.local_root,
                status = excluded.status,
                root_key = COALESCE(snapshots.root_key, excluded.root_key),
                inventory = excluded.inventory,
                updated_at = excluded.updated_at",
            params![
                snapshot.id,
                snapshot.origin,
                snapshot.display_name,
                snapshot.local_root.to_string_lossy(),
                snapshot.status.as_str(),
                snapshot.root_key,
                snapshot.inventory.as_str(),
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_snapshot_status(&self, id: &str, status: SnapshotStatus) -> crate::Result<()> {
        self.conn().execute(
            "UPDATE snapshots SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, id: &str) -> crate::Result<Option<Snapshot>> {
        let snapshot = self
            .conn()
            .query_row(
                "SELECT id, origin, display_name, local_root, status, root_key, inventory
                 FROM snapshots WHERE id = ?1",
                params![id],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// All known snapshots, most recently touched first
    pub fn list_snapshots(&self) -> crate::Result<Vec<Snapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, origin, display_name, local_root, status, root_key, inventory
             FROM snapshots ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt.query_map([], snapshot_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // Nodes

    /// Register every inventory node plus the root with a null summary.
    ///
    /// Existing rows keep their summaries. Returns the number of new rows.
    pub fn register_structure(
        &self,
        snapshot_id: &str,
        entries: &[InventoryEntry],
    ) -> crate::Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now_rfc3339();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nodes (snapshot_id, path, parent_path, name, kind, summary, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
            )?;
            inserted += stmt.execute(params![
                snapshot_id,
                "",
                Option::<String>::None,
                "",
                NodeKind::Folder.as_str(),
                now
            ])?;
            for entry in entries {
                inserted += stmt.execute(params![
                    snapshot_id,
                    entry.path,
                    parent_path(&entry.path),
                    name_of(&entry.path),
                    entry.kind.as_str(),
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Insert or update one node keyed by `(snapshot_id, path)`
    pub fn upsert(&self, snapshot_id: &str, node: &Node) -> crate::Result<()> {
        self.conn().execute(
            "INSERT INTO nodes (snapshot_id, path, parent_path, name, kind, summary, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(snapshot_id, path) DO UPDATE SET
                kind = excluded.kind,
                summary = excluded.summary,
                updated_at = excluded.updated_at",
            params![
                snapshot_id,
                node.path,
                node.parent_path(),
                node.name(),
                node.kind.as_str(),
                node.summary,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_node(&self, snapshot_id: &str, path: &str) -> crate::Result<Option<Node>> {
        let node = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM nodes WHERE snapshot_id = ?1 AND path = ?2",
                    NODE_SELECT
                ),
                params![snapshot_id, path],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    /// Immediate children of `parent`, folders first then by name
    pub fn children(&self, snapshot_id: &str, parent: &str) -> crate::Result<Vec<Node>> {
        self.list_filtered(snapshot_id, Some(parent), None)
    }

    /// Nodes under `parent` (all nodes when `None`) whose path contains
    /// `filter`, case-insensitively.
    pub fn list_filtered(
        &self,
        snapshot_id: &str,
        parent: Option<&str>,
        filter: Option<&str>,
    ) -> crate::Result<Vec<Node>> {
        let filter = filter.map(str::trim).filter(|f| !f.is_empty());
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes
             WHERE snapshot_id = ?1
               AND path != ''
               AND (?2 IS NULL OR parent_path = ?2)
               AND (?3 IS NULL OR instr(lower(path), lower(?3)) > 0)
             ORDER BY CASE kind WHEN 'folder' THEN 0 ELSE 1 END, lower(name), path",
            NODE_SELECT
        ))?;
        let rows = stmt.query_map(params![snapshot_id, parent, filter], node_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Nodes carrying a summary, in insertion order
    pub fn summarized_nodes(&self, snapshot_id: Option<&str>) -> crate::Result<Vec<IndexedSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT snapshot_id, path, kind, summary FROM nodes
             WHERE summary IS NOT NULL AND (?1 IS NULL OR snapshot_id = ?1)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| {
            let kind: String = row.get(2)?;
            Ok(IndexedSummary {
                snapshot_id: row.get(0)?,
                path: row.get(1)?,
                kind: NodeKind::parse(&kind).unwrap_or(NodeKind::File),
                summary: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn node_count(&self, snapshot_id: &str) -> crate::Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM nodes WHERE snapshot_id = ?1",
            params![snapshot_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whole snapshot as a nested tree rooted at `""`
    pub fn tree(&self, snapshot_id: &str) -> crate::Result<Option<TreeNode>> {
        let nodes = self.list_filtered(snapshot_id, None, None)?;
        let root = self.get_node(snapshot_id, "")?;
        if root.is_none() && nodes.is_empty() {
            return Ok(None);
        }

        let mut by_parent: HashMap<String, Vec<Node>> = HashMap::new();
        for node in nodes {
            let parent = node.parent_path().unwrap_or("").to_string();
            by_parent.entry(parent).or_default().push(node);
        }

        let root = root.unwrap_or_else(|| Node::new("", NodeKind::Folder, None));
        Ok(Some(build_tree(root, &mut by_parent)))
    }

    pub(crate) fn delete_nodes(&self, snapshot_id: &str) -> crate::Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM nodes WHERE snapshot_id = ?1", params![snapshot_id])?)
    }
}

fn build_tree(node: Node, by_parent: &mut HashMap<String, Vec<Node>>) -> TreeNode {
    let children = by_parent
        .remove(&node.path)
        .unwrap_or_default()
        .into_iter()
        .map(|child| build_tree(child, by_parent))
        .collect();
    TreeNode {
        name: node.name().to_string(),
        path: node.path,
        kind: node.kind,
        summary: node.summary,
        children,
    }
}

fn node_from_row(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let path: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let summary: Option<String> = row.get(2)?;
    Ok(Node {
        path,
        kind: NodeKind::parse(&kind).unwrap_or(NodeKind::File),
        summary,
    })
}

fn snapshot_from_row(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    let local_root: String = row.get(3)?;
    let status: String = row.get(4)?;
    let inventory: String = row.get(6)?;
    Ok(Snapshot {
        id: row.get(0)?,
        origin: row.get(1)?,
        display_name: row.get(2)?,
        local_root: PathBuf::from(local_root),
        status: SnapshotStatus::parse(&status).unwrap_or(SnapshotStatus::Pending),
        root_key: row.get(5)?,
        inventory: InventoryKind::parse(&inventory).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> (NodeIndex, Snapshot) {
        let index = NodeIndex::open_in_memory().unwrap();
        let snapshot = Snapshot::new("/tmp/demo", Path::new("/tmp/demo"));
        index.upsert_snapshot(&snapshot).unwrap();
        index
            .register_structure(
                &snapshot.id,
                &[
                    InventoryEntry::folder("a"),
                    InventoryEntry::folder("a/b"),
                    InventoryEntry::file("a/b/c.txt", 3),
                    InventoryEntry::file("a/readme.md", 3),
                    InventoryEntry::file("top.rs", 1),
                ],
            )
            .unwrap();
        (index, snapshot)
    }

    #[test]
    fn test_schema_version_checked() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested/arbor.db");
        drop(NodeIndex::open(&db).unwrap());
        NodeIndex::open(&db).unwrap();

        let conn = Connection::open(&db).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        drop(conn);
        assert!(matches!(
            NodeIndex::open(&db),
            Err(ArborError::SchemaVersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn test_register_structure_is_idempotent() {
        let (index, snapshot) = seeded();
        assert_eq!(index.node_count(&snapshot.id).unwrap(), 6);

        index
            .upsert(&snapshot.id, &Node::new("top.rs", NodeKind::File, Some("entry".into())))
            .unwrap();
        let added = index
            .register_structure(&snapshot.id, &[InventoryEntry::file("top.rs", 1)])
            .unwrap();
        assert_eq!(added, 0);
        let node = index.get_node(&snapshot.id, "top.rs").unwrap().unwrap();
        assert_eq!(node.summary.as_deref(), Some("entry"));
    }

    #[test]
    fn test_children_and_filter() {
        let (index, snapshot) = seeded();
        let children = index.children(&snapshot.id, "a").unwrap();
        let paths: Vec<&str> = children.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b", "a/readme.md"]);

        let top = index.children(&snapshot.id, "").unwrap();
        assert_eq!(top.len(), 2);

        let filtered = index.list_filtered(&snapshot.id, None, Some("README")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].path, "a/readme.md");
    }

    #[test]
    fn test_tree_nests_children() {
        let (index, snapshot) = seeded();
        let tree = index.tree(&snapshot.id).unwrap().unwrap();
        assert_eq!(tree.path, "");
        assert_eq!(tree.children.len(), 2);
        let a = &tree.children[0];
        assert_eq!(a.path, "a");
        assert_eq!(a.children[0].children[0].path, "a/b/c.txt");
        assert!(index.tree("missing").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_root_key_is_sticky() {
        let index = NodeIndex::open_in_memory().unwrap();
        let mut snapshot = Snapshot::new("https://github.com/o/r", Path::new("/tmp/o-r"));
        snapshot.root_key = Some("o-r.md".into());
        index.upsert_snapshot(&snapshot).unwrap();

        snapshot.root_key = Some("o-r.root.md".into());
        snapshot.status = SnapshotStatus::Completed;
        index.upsert_snapshot(&snapshot).unwrap();

        let stored = index.get_snapshot(&snapshot.id).unwrap().unwrap();
        assert_eq!(stored.root_key.as_deref(), Some("o-r.md"));
        assert_eq!(stored.status, SnapshotStatus::Completed);
        assert_eq!(index.list_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn test_summarized_nodes_in_insertion_order() {
        let (index, snapshot) = seeded();
        index
            .upsert(&snapshot.id, &Node::new("top.rs", NodeKind::File, Some("t".into())))
            .unwrap();
        index
            .upsert(&snapshot.id, &Node::new("a/b/c.txt", NodeKind::File, Some("c".into())))
            .unwrap();
        let all = index.summarized_nodes(Some(&snapshot.id)).unwrap();
        let paths: Vec<&str> = all.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b/c.txt", "top.rs"]);
        assert!(index.summarized_nodes(Some("other")).unwrap().is_empty());
    }
}
