//! Bottom-up analyzer: files, then folders deepest first, then the root.
//!
//! Every node is resolved cache first. A cache hit is reused verbatim; a miss
//! calls the summarizer, writes the cache and only then the index. Item
//! failures are logged and skipped, leaving the cache entry absent so the
//! next run retries exactly those items.

mod scheduler;
mod units;

pub use scheduler::FolderScheduler;

use crate::cache::SummaryCache;
use crate::config::Config;
use crate::error::ArborError;
use crate::index::NodeIndex;
use crate::inventory::SnapshotTree;
use crate::node::{Node, NodeKind, Snapshot};
use crate::source::ContentReader;
use crate::summarizer::{RetryPolicy, Summarizer, SummaryKind};
use crate::task::{AnalysisPhase, PhaseTracker};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use units::{run_unit, Outcome, Unit, UnitContext, UnitInput};

const FILES_END: u8 = 80;
const FOLDERS_END: u8 = 95;

/// Counters for one run
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunStats {
    pub files: usize,
    pub folders: usize,
    pub generated: usize,
    pub cached: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Cached(_) => self.cached += 1,
            Outcome::Generated(_) => self.generated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Cancelled => {}
        }
    }
}

pub struct Analyzer {
    summarizer: Arc<dyn Summarizer>,
    reader: Arc<dyn ContentReader>,
    index: Arc<NodeIndex>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Analyzer {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        reader: Arc<dyn ContentReader>,
        index: Arc<NodeIndex>,
        config: &Config,
    ) -> Self {
        Self {
            summarizer,
            reader,
            index,
            retry: RetryPolicy::from_config(&config.summarizer),
            concurrency: config.analysis.concurrency.max(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve every node of `tree` and finish with the root summary.
    ///
    /// Fails only on cancellation; item errors are counted in the stats.
    pub async fn run(
        &self,
        snapshot: &Snapshot,
        tree: &SnapshotTree,
        cache: &SummaryCache,
        tracker: &PhaseTracker<'_>,
        cancel: &CancellationToken,
    ) -> crate::Result<RunStats> {
        if tracker.phase() == AnalysisPhase::Init {
            tracker.update(AnalysisPhase::Acquiring, 0, "Using materialized tree");
        }

        let ctx = UnitContext {
            summarizer: Arc::clone(&self.summarizer),
            reader: Arc::clone(&self.reader),
            index: Arc::clone(&self.index),
            cache: cache.clone(),
            retry: self.retry.clone(),
            snapshot_id: snapshot.id.clone(),
            local_root: snapshot.local_root.clone(),
            cancel: cancel.clone(),
        };

        let mut stats = RunStats::default();
        let mut resolved: HashMap<String, String> = HashMap::new();

        let files = tree.files();
        stats.files = files.len();
        stats.folders = tree.folders_deepest_first().len();

        if files.is_empty() {
            self.empty_root(snapshot, cache, tracker, &mut stats)?;
            return Ok(stats);
        }

        info!(snapshot_id = %snapshot.id, files = files.len(), "summarizing files");
        tracker.update(
            AnalysisPhase::SummarizingFiles,
            0,
            &format!("Processing {} files", files.len()),
        );
        self.file_phase(&ctx, tree, files, tracker, &mut stats, &mut resolved)
            .await?;

        info!(snapshot_id = %snapshot.id, folders = stats.folders, "summarizing folders");
        tracker.update(
            AnalysisPhase::SummarizingFolders,
            FILES_END,
            &format!("Processing {} folders", stats.folders),
        );
        self.folder_phase(&ctx, tree, tracker, &mut stats, &mut resolved)
            .await?;

        tracker.update(
            AnalysisPhase::SynthesizingRoot,
            FOLDERS_END,
            "Generating repository overview",
        );
        self.root_phase(&ctx, tree, &mut stats, &resolved).await?;

        info!(
            snapshot_id = %snapshot.id,
            generated = stats.generated,
            cached = stats.cached,
            skipped = stats.skipped,
            failed = stats.failed,
            "analysis finished"
        );
        tracker.update(AnalysisPhase::Done, 100, "Analysis completed");
        Ok(stats)
    }

    async fn file_phase(
        &self,
        ctx: &UnitContext,
        tree: &SnapshotTree,
        files: Vec<String>,
        tracker: &PhaseTracker<'_>,
        stats: &mut RunStats,
        resolved: &mut HashMap<String, String>,
    ) -> crate::Result<()> {
        let total = files.len();
        let mut queue = files.into_iter();
        let mut in_flight = JoinSet::new();
        let mut done = 0usize;

        loop {
            while in_flight.len() < self.concurrency {
                let Some(path) = queue.next() else { break };
                if ctx.cancel.is_cancelled() {
                    in_flight.abort_all();
                    return Err(ArborError::Cancelled);
                }
                match self.unit_for(ctx, tree, &path, NodeKind::File, UnitInput::File) {
                    Ok(unit) => {
                        in_flight.spawn(run_unit(ctx.clone(), unit));
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "skipping file");
                        stats.failed += 1;
                        done += 1;
                    }
                }
            }

            let Some(joined) = in_flight.join_next().await else { break };
            let (path, outcome) = joined.map_err(|e| {
                ArborError::Io(std::io::Error::other(format!("file unit panicked: {e}")))
            })?;
            if matches!(outcome, Outcome::Cancelled) {
                in_flight.abort_all();
                return Err(ArborError::Cancelled);
            }
            self.settle(&path, outcome, stats, resolved);
            done += 1;

            let progress = (FILES_END as usize * done / total) as u8;
            tracker.update(
                AnalysisPhase::SummarizingFiles,
                progress,
                &format!("Processed file {}/{}: {}", done, total, path),
            );
        }
        Ok(())
    }

    async fn folder_phase(
        &self,
        ctx: &UnitContext,
        tree: &SnapshotTree,
        tracker: &PhaseTracker<'_>,
        stats: &mut RunStats,
        resolved: &mut HashMap<String, String>,
    ) -> crate::Result<()> {
        let mut scheduler = FolderScheduler::new(tree);
        let total = scheduler.total_remaining().max(1);
        let mut in_flight = JoinSet::new();
        let mut done = 0usize;

        while !scheduler.is_done() {
            while in_flight.len() < self.concurrency {
                let Some(folder) = scheduler.next_ready() else { break };
                if ctx.cancel.is_cancelled() {
                    in_flight.abort_all();
                    return Err(ArborError::Cancelled);
                }
                let input = UnitInput::Provided {
                    content: tree.structure_listing(&folder),
                    context: children_context(tree, &folder, ctx, resolved),
                };
                match self.unit_for(ctx, tree, &folder, NodeKind::Folder, input) {
                    Ok(unit) => {
                        in_flight.spawn(run_unit(ctx.clone(), unit));
                    }
                    Err(e) => {
                        warn!(path = %folder, error = %e, "skipping folder");
                        stats.failed += 1;
                        scheduler.complete(&folder);
                        done += 1;
                    }
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                if !scheduler.is_done() {
                    warn!(
                        remaining = scheduler.total_remaining(),
                        "folders left with unresolved children"
                    );
                }
                break;
            };
            let (path, outcome) = joined.map_err(|e| {
                ArborError::Io(std::io::Error::other(format!("folder unit panicked: {e}")))
            })?;
            if matches!(outcome, Outcome::Cancelled) {
                in_flight.abort_all();
                return Err(ArborError::Cancelled);
            }
            self.settle(&path, outcome, stats, resolved);
            scheduler.complete(&path);
            done += 1;

            let span = (FOLDERS_END - FILES_END) as usize;
            let progress = FILES_END + (span * done / total) as u8;
            tracker.update(
                AnalysisPhase::SummarizingFolders,
                progress,
                &format!("Processed folder {}/{}: {}", done, total, path),
            );
        }
        Ok(())
    }

    async fn root_phase(
        &self,
        ctx: &UnitContext,
        tree: &SnapshotTree,
        stats: &mut RunStats,
        resolved: &HashMap<String, String>,
    ) -> crate::Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(ArborError::Cancelled);
        }
        let unit = Unit {
            path: String::new(),
            node_kind: NodeKind::Folder,
            summary_kind: SummaryKind::Root,
            key: ctx.cache.root_key().clone(),
            input: UnitInput::Provided {
                content: tree.structure_listing(""),
                context: root_context(tree, ctx, resolved),
            },
        };
        let (_, outcome) = run_unit(ctx.clone(), unit).await;
        match outcome {
            Outcome::Cancelled => Err(ArborError::Cancelled),
            Outcome::Failed(ref e) => {
                warn!(error = %e, "root summary failed; it will be retried on the next run");
                stats.record(&outcome);
                Ok(())
            }
            other => {
                stats.record(&other);
                Ok(())
            }
        }
    }

    /// A snapshot without files gets a fixed root summary, no summarizer call.
    fn empty_root(
        &self,
        snapshot: &Snapshot,
        cache: &SummaryCache,
        tracker: &PhaseTracker<'_>,
        stats: &mut RunStats,
    ) -> crate::Result<()> {
        tracker.update(AnalysisPhase::SummarizingFiles, 0, "No files to analyze");
        tracker.update(AnalysisPhase::SummarizingFolders, FILES_END, "No folders to analyze");
        tracker.update(AnalysisPhase::SynthesizingRoot, FOLDERS_END, "Writing overview");

        let key = cache.root_key();
        let text = match cache.read(key)? {
            Some(text) => {
                stats.cached += 1;
                text
            }
            None => {
                let text = format!(
                    "This repository ({}) appears to be empty or contains no analyzable files.",
                    snapshot.origin
                );
                cache.write(key, &text)?;
                stats.generated += 1;
                text
            }
        };
        if let Err(e) = self
            .index
            .upsert(&snapshot.id, &Node::new("", NodeKind::Folder, Some(text)))
        {
            warn!(error = %e, "index sync failed");
        }
        tracker.update(AnalysisPhase::Done, 100, "Analysis completed");
        Ok(())
    }

    fn unit_for(
        &self,
        ctx: &UnitContext,
        tree: &SnapshotTree,
        path: &str,
        kind: NodeKind,
        input: UnitInput,
    ) -> crate::Result<Unit> {
        let key = ctx.cache.key_for(path, kind)?;
        // A genuine entry already lives where this sidecar would go.
        if tree.contains(key.as_str()) || key == *ctx.cache.root_key() {
            return Err(ArborError::InvalidPath(format!(
                "summary key {} for {} collides with an existing entry",
                key, path
            )));
        }
        let summary_kind = match kind {
            NodeKind::File => SummaryKind::File,
            NodeKind::Folder => SummaryKind::Folder,
        };
        Ok(Unit {
            path: path.to_string(),
            node_kind: kind,
            summary_kind,
            key,
            input,
        })
    }

    fn settle(
        &self,
        path: &str,
        outcome: Outcome,
        stats: &mut RunStats,
        resolved: &mut HashMap<String, String>,
    ) {
        stats.record(&outcome);
        match outcome {
            Outcome::Cached(text) | Outcome::Generated(text) => {
                resolved.insert(path.to_string(), text);
            }
            Outcome::Failed(e) => {
                warn!(path, error = %e, "item failed; it will be retried on the next run");
            }
            Outcome::Skipped | Outcome::Cancelled => {}
        }
    }
}

/// Summary resolved in this run, else read from the cache.
fn lookup(
    path: &str,
    kind: NodeKind,
    ctx: &UnitContext,
    resolved: &HashMap<String, String>,
) -> Option<String> {
    if let Some(text) = resolved.get(path) {
        return Some(text.clone());
    }
    let key = ctx.cache.key_for(path, kind).ok()?;
    ctx.cache.read(&key).ok().flatten()
}

fn children_context(
    tree: &SnapshotTree,
    folder: &str,
    ctx: &UnitContext,
    resolved: &HashMap<String, String>,
) -> String {
    let mut sections = Vec::new();
    for child in tree.children(folder) {
        let kind = tree.kind(child).unwrap_or(NodeKind::File);
        if let Some(summary) = lookup(child, kind, ctx, resolved) {
            let label = match kind {
                NodeKind::Folder => "Folder",
                NodeKind::File => "File",
            };
            sections.push(format!("## {}: {}\n{}", label, child, summary));
        }
    }
    sections.join("\n\n")
}

fn root_context(tree: &SnapshotTree, ctx: &UnitContext, resolved: &HashMap<String, String>) -> String {
    let mut folders = tree.folders_deepest_first();
    folders.sort();

    let folder_sections: Vec<String> = folders
        .iter()
        .filter_map(|f| {
            lookup(f, NodeKind::Folder, ctx, resolved).map(|s| format!("## Folder: {}\n{}", f, s))
        })
        .collect();
    let file_sections: Vec<String> = tree
        .files()
        .iter()
        .filter_map(|f| {
            lookup(f, NodeKind::File, ctx, resolved).map(|s| format!("### File: {}\n{}", f, s))
        })
        .collect();

    let mut parts = Vec::new();
    if !folder_sections.is_empty() {
        parts.push(format!("Folder summaries:\n\n{}", folder_sections.join("\n\n")));
    }
    if !file_sections.is_empty() {
        parts.push(format!("File summaries:\n\n{}", file_sections.join("\n\n")));
    }
    parts.join("\n\n")
}
