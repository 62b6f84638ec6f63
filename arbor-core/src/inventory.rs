//! Inventory builder: flattens a materialized tree into `(path, kind, size)` entries.

use crate::config::IgnoreConfig;
use crate::error::ArborError;
use crate::node::{depth, name_of, parent_path, NodeKind};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::process::Command;

/// Suffix of in-flight cache writes; never part of an inventory.
pub const PARTIAL_SUFFIX: &str = ".arbor-partial";

/// One entry of a snapshot inventory. Paths are `/`-separated and relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub path: String,
    pub kind: NodeKind,
    pub size: u64,
}

impl InventoryEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::File,
            size,
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::Folder,
            size: 0,
        }
    }
}

/// How a snapshot's inventory is produced. Stored with the snapshot so a
/// rebuild lists exactly the entries analysis saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryKind {
    /// Directory walk honoring ignore files and the configured patterns
    #[default]
    Walk,
    /// Files tracked by git
    Tracked,
}

impl InventoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Walk => "walk",
            Self::Tracked => "tracked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "walk" => Some(Self::Walk),
            "tracked" => Some(Self::Tracked),
            _ => None,
        }
    }
}

/// Inventory of `root` under the rule `kind` names.
pub fn collect(
    kind: InventoryKind,
    root: &Path,
    ignore: &IgnoreConfig,
    sidecar_extension: &str,
    reserved: &[String],
) -> crate::Result<Vec<InventoryEntry>> {
    match kind {
        InventoryKind::Walk => walk(root, ignore, sidecar_extension, reserved),
        InventoryKind::Tracked => tracked(root),
    }
}

/// Inventory of the files git tracks under `root`, folders derived.
pub fn tracked(root: &Path) -> crate::Result<Vec<InventoryEntry>> {
    let output = Command::new("git")
        .args(["ls-files", "-z"])
        .current_dir(root)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|e| {
            ArborError::acquisition(&root.to_string_lossy(), format!("failed to run git: {e}"))
        })?;
    if !output.status.success() {
        return Err(ArborError::acquisition(
            &root.to_string_lossy(),
            format!(
                "git ls-files failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    let paths = String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    Ok(from_tracked_paths(root, paths))
}

/// Walk `root` respecting .gitignore and the configured ignore patterns.
///
/// Sidecar summaries (`X.<ext>` next to an existing `X`) and the names in
/// `reserved` (top-level artifacts such as the root summary) are skipped.
pub fn walk(
    root: &Path,
    ignore: &IgnoreConfig,
    sidecar_extension: &str,
    reserved: &[String],
) -> crate::Result<Vec<InventoryEntry>> {
    let mut builder = WalkBuilder::new(root);
    builder.hidden(false);
    builder.git_ignore(true);
    builder.git_global(true);
    builder.git_exclude(true);
    builder.require_git(false);

    let mut ignore_builder = globset::GlobSetBuilder::new();
    for pattern in &ignore.patterns {
        let glob_pattern = if pattern.contains('*') || pattern.contains('?') {
            pattern.clone()
        } else {
            format!("**/{}", pattern)
        };
        if let Ok(g) = globset::Glob::new(&glob_pattern) {
            ignore_builder.add(g);
        }
        if let Ok(g) = globset::Glob::new(&format!("**/{}/**", pattern)) {
            ignore_builder.add(g);
        }
    }
    let ignore_set = ignore_builder
        .build()
        .map_err(|e| ArborError::GlobPattern(e.to_string()))?;

    let mut raw = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if ignore_set.is_match(relative) {
            continue;
        }

        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel.ends_with(PARTIAL_SUFFIX) {
            continue;
        }

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            raw.push(InventoryEntry::folder(rel));
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            raw.push(InventoryEntry::file(rel, size));
        }
    }

    let all_paths: HashSet<String> = raw.iter().map(|e| e.path.clone()).collect();
    let reserved: HashSet<&str> = reserved.iter().map(String::as_str).collect();

    let mut entries: Vec<InventoryEntry> = raw
        .into_iter()
        .filter(|e| {
            e.kind == NodeKind::Folder
                || !(reserved.contains(e.path.as_str())
                    || is_sidecar(&e.path, &all_paths, sidecar_extension))
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Build an inventory from a list of tracked file paths, deriving folders.
pub fn from_tracked_paths<I>(root: &Path, paths: I) -> Vec<InventoryEntry>
where
    I: IntoIterator<Item = String>,
{
    let mut entries: BTreeMap<String, InventoryEntry> = BTreeMap::new();
    for path in paths {
        if path.is_empty() {
            continue;
        }
        let size = std::fs::metadata(root.join(&path))
            .map(|m| m.len())
            .unwrap_or(0);

        let mut parent = parent_path(&path);
        while let Some(p) = parent.filter(|p| !p.is_empty()) {
            entries
                .entry(p.to_string())
                .or_insert_with(|| InventoryEntry::folder(p));
            parent = parent_path(p);
        }
        entries.insert(path.clone(), InventoryEntry::file(path, size));
    }
    entries.into_values().collect()
}

/// `X.<ext>` is a sidecar when `X` itself is part of the tree.
fn is_sidecar(path: &str, all_paths: &HashSet<String>, extension: &str) -> bool {
    let suffix = format!(".{}", extension);
    match path.strip_suffix(&suffix) {
        Some(base) if !base.is_empty() && !base.ends_with('/') => all_paths.contains(base),
        _ => false,
    }
}

/// Parent/child view over an inventory.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTree {
    kinds: HashMap<String, NodeKind>,
    children: HashMap<String, Vec<String>>,
}

impl SnapshotTree {
    pub fn from_inventory(entries: &[InventoryEntry]) -> Self {
        let mut tree = Self::default();
        tree.children.insert(String::new(), Vec::new());

        for entry in entries {
            tree.kinds.insert(entry.path.clone(), entry.kind);
            if entry.kind == NodeKind::Folder {
                tree.children.entry(entry.path.clone()).or_default();
            }
        }

        // Parents missing from the inventory are implied folders.
        let paths: Vec<String> = tree.kinds.keys().cloned().collect();
        for path in paths {
            let mut child = path;
            while let Some(parent) = parent_path(&child).map(str::to_string) {
                if !parent.is_empty() && !tree.kinds.contains_key(&parent) {
                    tree.kinds.insert(parent.clone(), NodeKind::Folder);
                }
                let siblings = tree.children.entry(parent.clone()).or_default();
                if !siblings.contains(&child) {
                    siblings.push(child);
                }
                child = parent;
            }
        }

        for list in tree.children.values_mut() {
            list.sort();
        }
        tree
    }

    pub fn contains(&self, path: &str) -> bool {
        path.is_empty() || self.kinds.contains_key(path)
    }

    pub fn kind(&self, path: &str) -> Option<NodeKind> {
        if path.is_empty() {
            Some(NodeKind::Folder)
        } else {
            self.kinds.get(path).copied()
        }
    }

    /// Immediate children of a folder, sorted by path
    pub fn children(&self, path: &str) -> &[String] {
        self.children.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All file paths, sorted
    pub fn files(&self) -> Vec<String> {
        self.paths_of(NodeKind::File)
    }

    /// All non-root folders ordered deepest first, ties by path
    pub fn folders_deepest_first(&self) -> Vec<String> {
        let mut folders = self.paths_of(NodeKind::Folder);
        folders.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
        folders
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    fn paths_of(&self, kind: NodeKind) -> Vec<String> {
        let mut paths: Vec<String> = self
            .kinds
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Tree-style listing of a folder's immediate children, folders first.
    pub fn structure_listing(&self, path: &str) -> String {
        let mut items: Vec<(bool, &str)> = self
            .children(path)
            .iter()
            .map(|child| {
                let is_file = self.kind(child) == Some(NodeKind::File);
                (is_file, name_of(child))
            })
            .collect();
        items.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase()))
        });

        let count = items.len();
        items
            .into_iter()
            .enumerate()
            .map(|(i, (is_file, name))| {
                let branch = if i + 1 == count { "└──" } else { "├──" };
                if is_file {
                    format!("{} {}", branch, name)
                } else {
                    format!("{} {}/", branch, name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
