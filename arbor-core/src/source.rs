//! Source acquisition: turning an origin reference into a local tree plus inventory.

use crate::config::{Config, ContentConfig, IgnoreConfig};
use crate::error::ArborError;
use crate::inventory::{self, InventoryEntry, InventoryKind};
use crate::node::{display_name, snapshot_id};
use async_trait::async_trait;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// A materialized snapshot
#[derive(Debug, Clone)]
pub struct Materialized {
    pub local_root: PathBuf,
    pub display_name: String,
    pub inventory: Vec<InventoryEntry>,
    pub inventory_kind: InventoryKind,
}

/// Materializes an origin. Repeated calls for one origin converge on the same
/// local tree.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// `reserved` names top-level artifacts (the root summary) that must not
    /// appear in the inventory.
    async fn materialize(&self, origin: &str, reserved: &[String]) -> crate::Result<Materialized>;
}

/// A directory already on disk
pub struct LocalSource {
    ignore: IgnoreConfig,
    sidecar_extension: String,
}

impl LocalSource {
    pub fn new(ignore: IgnoreConfig, sidecar_extension: &str) -> Self {
        Self {
            ignore,
            sidecar_extension: sidecar_extension.to_string(),
        }
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    async fn materialize(&self, origin: &str, reserved: &[String]) -> crate::Result<Materialized> {
        let root = std::fs::canonicalize(origin)
            .map_err(|e| ArborError::acquisition(origin, e.to_string()))?;
        if !root.is_dir() {
            return Err(ArborError::acquisition(origin, "not a directory"));
        }

        let walk_root = root.clone();
        let ignore = self.ignore.clone();
        let ext = self.sidecar_extension.clone();
        let reserved = reserved.to_vec();
        let inventory = tokio::task::spawn_blocking(move || {
            inventory::walk(&walk_root, &ignore, &ext, &reserved)
        })
        .await
        .map_err(|e| ArborError::acquisition(origin, format!("inventory task failed: {e}")))??;

        Ok(Materialized {
            display_name: display_name(&root.to_string_lossy()),
            local_root: root,
            inventory,
            inventory_kind: InventoryKind::Walk,
        })
    }
}

/// A git remote cloned into the workspace directory
pub struct GitSource {
    workspace_dir: PathBuf,
}

impl GitSource {
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            workspace_dir: workspace_dir.to_path_buf(),
        }
    }

    /// Absolute clone directory for `origin`, creating the workspace if needed.
    async fn clone_path(&self, origin: &str) -> crate::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.workspace_dir).await?;
        let workspace = tokio::fs::canonicalize(&self.workspace_dir).await?;
        Ok(workspace.join(clone_dir_name(origin)))
    }

    async fn update(&self, dest: &Path) -> Result<(), String> {
        run_git(dest, &["fetch", "--quiet", "origin"]).await?;
        run_git(dest, &["pull", "--quiet", "--ff-only"]).await?;
        Ok(())
    }
}

/// Clone directory name: `<display>-<id prefix>`. Origins that share a display
/// name but not a snapshot never share a clone.
fn clone_dir_name(origin: &str) -> String {
    let id = snapshot_id(origin);
    let prefix = &id[..id.len().min(8)];
    let name = display_name(origin);
    if name.is_empty() {
        id
    } else {
        format!("{}-{}", name, prefix)
    }
}

#[async_trait]
impl SourceProvider for GitSource {
    async fn materialize(&self, origin: &str, _reserved: &[String]) -> crate::Result<Materialized> {
        let dest = self.clone_path(origin).await?;

        let mut ready = false;
        if dest.join(".git").exists() {
            match self.update(&dest).await {
                Ok(()) => {
                    info!(origin, path = %dest.display(), "updated existing clone");
                    ready = true;
                }
                Err(e) => {
                    warn!(origin, error = %e, "update failed, re-cloning");
                    tokio::fs::remove_dir_all(&dest).await.ok();
                }
            }
        }

        if !ready {
            if dest.exists() {
                tokio::fs::remove_dir_all(&dest).await.ok();
            }
            let dest_str = dest.to_string_lossy().to_string();
            if let Err(e) = run_git(&self.workspace_dir, &["clone", "--quiet", origin, &dest_str]).await {
                tokio::fs::remove_dir_all(&dest).await.ok();
                return Err(ArborError::acquisition(origin, e));
            }
            info!(origin, path = %dest.display(), "cloned");
        }

        let root = dest.clone();
        let inventory = tokio::task::spawn_blocking(move || inventory::tracked(&root))
            .await
            .map_err(|e| ArborError::acquisition(origin, format!("inventory task failed: {e}")))??;

        Ok(Materialized {
            display_name: display_name(origin),
            local_root: dest,
            inventory,
            inventory_kind: InventoryKind::Tracked,
        })
    }
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// True for origins that name a git remote rather than a local directory
pub fn is_remote(origin: &str) -> bool {
    let origin = origin.trim();
    ["http://", "https://", "ssh://", "git://", "git@"]
        .iter()
        .any(|p| origin.starts_with(p))
        || (origin.ends_with(".git") && !Path::new(origin).is_dir())
}

/// Chooses git or local acquisition by origin form
pub struct SourceRouter {
    local: LocalSource,
    git: GitSource,
}

impl SourceRouter {
    pub fn new(config: &Config) -> Self {
        Self {
            local: LocalSource::new(config.ignore.clone(), &config.storage.sidecar_extension),
            git: GitSource::new(&config.storage.workspace_dir),
        }
    }

    /// Stable form of an origin: remotes as given, local paths canonicalized.
    pub fn canonical_origin(origin: &str) -> String {
        let origin = origin.trim();
        if is_remote(origin) {
            return origin.to_string();
        }
        std::fs::canonicalize(origin)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| origin.to_string())
    }
}

#[async_trait]
impl SourceProvider for SourceRouter {
    async fn materialize(&self, origin: &str, reserved: &[String]) -> crate::Result<Materialized> {
        if is_remote(origin) {
            self.git.materialize(origin, reserved).await
        } else {
            self.local.materialize(origin, reserved).await
        }
    }
}

/// Reads node content; `None` means "no summary for this item".
pub trait ContentReader: Send + Sync {
    fn read(&self, root: &Path, path: &str) -> Option<String>;
}

/// Filesystem reader with a size ceiling and NUL-byte binary detection
pub struct FsContentReader {
    max_file_size: u64,
    check_bytes: usize,
}

impl FsContentReader {
    pub fn new(config: &ContentConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            check_bytes: config.binary_check_bytes,
        }
    }
}

impl ContentReader for FsContentReader {
    fn read(&self, root: &Path, path: &str) -> Option<String> {
        let full = root.join(path);
        let meta = std::fs::metadata(&full).ok()?;
        if !meta.is_file() || meta.len() > self.max_file_size {
            return None;
        }

        let mut bytes = Vec::with_capacity(meta.len() as usize);
        File::open(&full).ok()?.read_to_end(&mut bytes).ok()?;
        let head = &bytes[..bytes.len().min(self.check_bytes)];
        if head.contains(&0) {
            return None;
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}
