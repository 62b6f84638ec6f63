//! Task runner: fire-and-forget submission, per-snapshot exclusion, cancellation.

use crate::access::{AccessControl, Action, AllowAll, Caller};
use crate::analyzer::{Analyzer, RunStats};
use crate::cache::{choose_root_key, CacheKey, SummaryCache};
use crate::config::Config;
use crate::error::ArborError;
use crate::index::NodeIndex;
use crate::inventory::SnapshotTree;
use crate::node::{snapshot_id, Snapshot, SnapshotStatus};
use crate::source::{ContentReader, FsContentReader, SourceProvider, SourceRouter};
use crate::summarizer::{self, Summarizer};
use crate::task::{AnalysisPhase, NoProgress, PhaseTracker, ProgressSink, Task, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const WAITING_MESSAGE: &str = "Waiting for another analysis of this snapshot";

/// Persists progress into the task row and forwards it to an optional observer.
struct TaskReporter<'a> {
    index: &'a NodeIndex,
    task_id: &'a str,
    observer: &'a dyn ProgressSink,
}

impl ProgressSink for TaskReporter<'_> {
    fn report(&self, phase: AnalysisPhase, progress: u8, message: &str) {
        if phase.is_terminal() {
            // Terminal rows are written by the runner with result/error details.
            self.observer.report(phase, progress, message);
            return;
        }
        if let Err(e) =
            self.index
                .update_task_progress(self.task_id, phase.task_status(), progress, message)
        {
            warn!(task_id = self.task_id, error = %e, "failed to record task progress");
        }
        self.observer.report(phase, progress, message);
    }
}

pub struct AnalysisRunner {
    config: Config,
    index: Arc<NodeIndex>,
    source: Arc<dyn SourceProvider>,
    summarizer: Arc<dyn Summarizer>,
    reader: Arc<dyn ContentReader>,
    access: Arc<dyn AccessControl>,
    snapshot_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl AnalysisRunner {
    pub fn new(
        config: Config,
        index: Arc<NodeIndex>,
        source: Arc<dyn SourceProvider>,
        summarizer: Arc<dyn Summarizer>,
        reader: Arc<dyn ContentReader>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            config,
            index,
            source,
            summarizer,
            reader,
            access,
            snapshot_locks: Mutex::new(HashMap::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Runner with the configured summarizer, git/local sources and no access policy
    pub fn from_config(config: Config, index: Arc<NodeIndex>) -> crate::Result<Self> {
        let summarizer = summarizer::from_config(&config.summarizer)?;
        let source = Arc::new(SourceRouter::new(&config));
        let reader = Arc::new(FsContentReader::new(&config.content));
        Ok(Self::new(
            config,
            index,
            source,
            summarizer,
            reader,
            Arc::new(AllowAll),
        ))
    }

    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<NodeIndex> {
        &self.index
    }

    pub fn summarizer(&self) -> &Arc<dyn Summarizer> {
        &self.summarizer
    }

    pub fn access(&self) -> &Arc<dyn AccessControl> {
        &self.access
    }

    /// Authorize, record a pending task and start it in the background.
    ///
    /// Authorization and the task insert touch SQLite, so they run on the
    /// blocking pool.
    pub async fn submit(self: &Arc<Self>, origin: &str, caller: Caller) -> crate::Result<Task> {
        let runner = Arc::clone(self);
        let origin = origin.to_string();
        let checked = caller.clone();
        let (task, cancel) = tokio::task::spawn_blocking(move || runner.prepare(&origin, &checked))
            .await
            .map_err(|e| ArborError::Background(format!("task setup failed: {e}")))??;

        let runner = Arc::clone(self);
        let spawned = task.clone();
        tokio::spawn(async move {
            runner.execute(spawned, caller, cancel, &NoProgress).await;
        });
        Ok(task)
    }

    /// Run an analysis to completion in the caller's task, reporting progress
    /// to `observer`. Returns the final task record.
    pub async fn run(
        &self,
        origin: &str,
        caller: Caller,
        observer: &dyn ProgressSink,
    ) -> crate::Result<Task> {
        let (task, cancel) = self.prepare(origin, &caller)?;
        let id = task.id.clone();
        self.execute(task, caller, cancel, observer).await;
        self.index
            .get_task(&id)?
            .ok_or_else(|| ArborError::NotFound(format!("task {}", id)))
    }

    /// Request cancellation. `Ok(false)` when the task already finished.
    pub fn cancel(&self, task_id: &str) -> crate::Result<bool> {
        let token = self
            .cancel_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned();
        match token {
            Some(token) => {
                info!(task_id, "cancellation requested");
                token.cancel();
                Ok(true)
            }
            None => match self.index.get_task(task_id)? {
                Some(_) => Ok(false),
                None => Err(ArborError::NotFound(format!("task {}", task_id))),
            },
        }
    }

    fn prepare(&self, origin: &str, caller: &Caller) -> crate::Result<(Task, CancellationToken)> {
        let origin = origin.trim();
        if origin.is_empty() {
            return Err(ArborError::InvalidPath("origin must not be empty".to_string()));
        }
        let origin = SourceRouter::canonical_origin(origin);
        let snapshot_id = snapshot_id(&origin);
        self.access.authorize(caller, Action::Analyze, &snapshot_id)?;

        let task = Task::new(uuid::Uuid::new_v4().to_string(), snapshot_id, origin);
        if let Err(e) = self.index.insert_task(&task) {
            self.access.release(caller, Action::Analyze, &task.snapshot_id);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task.id.clone(), cancel.clone());
        info!(task_id = %task.id, snapshot_id = %task.snapshot_id, origin = %task.origin, "task submitted");
        Ok((task, cancel))
    }

    async fn execute(
        &self,
        task: Task,
        caller: Caller,
        cancel: CancellationToken,
        observer: &dyn ProgressSink,
    ) {
        let reporter = TaskReporter {
            index: &self.index,
            task_id: &task.id,
            observer,
        };
        let tracker = PhaseTracker::new(&reporter);

        let result = self.analyze(&task, &tracker, &cancel).await;

        match result {
            Ok((snapshot, stats)) => {
                if let Err(e) = self.index.set_snapshot_status(&snapshot.id, SnapshotStatus::Completed) {
                    warn!(error = %e, "failed to update snapshot status");
                }
                if let Err(e) = self.index.complete_task(&task.id, &snapshot.id, "Analysis completed") {
                    error!(task_id = %task.id, error = %e, "failed to complete task");
                }
                self.access.record_usage(&caller, Action::Analyze, &snapshot.id);
                info!(task_id = %task.id, ?stats, "task completed");
            }
            Err(ArborError::Cancelled) => {
                self.access.release(&caller, Action::Analyze, &task.snapshot_id);
                tracker.update(AnalysisPhase::Cancelled, 0, "Cancelled");
                if let Err(e) = self.index.set_snapshot_status(&task.snapshot_id, SnapshotStatus::Pending) {
                    warn!(error = %e, "failed to update snapshot status");
                }
                if let Err(e) =
                    self.index
                        .finish_task(&task.id, TaskStatus::Cancelled, "Cancelled", None)
                {
                    error!(task_id = %task.id, error = %e, "failed to record cancellation");
                }
                info!(task_id = %task.id, "task cancelled");
            }
            Err(e) => {
                self.access.release(&caller, Action::Analyze, &task.snapshot_id);
                let message = e.to_string();
                tracker.update(AnalysisPhase::Failed, 0, &message);
                if let Err(e) = self.index.set_snapshot_status(&task.snapshot_id, SnapshotStatus::Failed) {
                    warn!(error = %e, "failed to update snapshot status");
                }
                if let Err(e) = self.index.finish_task(
                    &task.id,
                    TaskStatus::Failed,
                    "Analysis failed",
                    Some(&message),
                ) {
                    error!(task_id = %task.id, error = %e, "failed to record failure");
                }
                error!(task_id = %task.id, error = %message, "task failed");
            }
        }

        self.cancel_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task.id);
    }

    async fn analyze(
        &self,
        task: &Task,
        tracker: &PhaseTracker<'_>,
        cancel: &CancellationToken,
    ) -> crate::Result<(Snapshot, RunStats)> {
        let lock = self.snapshot_lock(&task.snapshot_id);
        let _guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracker.update(AnalysisPhase::Init, 0, WAITING_MESSAGE);
                tokio::select! {
                    guard = lock.lock_owned() => guard,
                    _ = cancel.cancelled() => return Err(ArborError::Cancelled),
                }
            }
        };
        if cancel.is_cancelled() {
            return Err(ArborError::Cancelled);
        }

        tracker.update(AnalysisPhase::Acquiring, 0, "Acquiring source tree");
        let ext = self.config.storage.sidecar_extension.clone();
        let existing = self.index.get_snapshot(&task.snapshot_id)?;
        let reserved: Vec<String> = existing
            .as_ref()
            .and_then(|s| s.root_key.clone())
            .into_iter()
            .collect();

        let materialized = tokio::select! {
            m = self.source.materialize(&task.origin, &reserved) => m?,
            _ = cancel.cancelled() => return Err(ArborError::Cancelled),
        };
        let tree = SnapshotTree::from_inventory(&materialized.inventory);

        let root_key = match reserved.first() {
            Some(key) => CacheKey::from_relative(key.clone()),
            None => choose_root_key(
                &materialized.display_name,
                &task.snapshot_id,
                &ext,
                &tree,
                self.config.analysis.root_collision,
            )?,
        };

        let snapshot = Snapshot {
            id: task.snapshot_id.clone(),
            origin: task.origin.clone(),
            display_name: materialized.display_name.clone(),
            local_root: materialized.local_root.clone(),
            status: SnapshotStatus::Processing,
            root_key: Some(root_key.as_str().to_string()),
            inventory: materialized.inventory_kind,
        };
        if let Err(e) = self.index.upsert_snapshot(&snapshot) {
            warn!(snapshot_id = %snapshot.id, error = %e, "failed to record snapshot");
        }
        match self.index.register_structure(&snapshot.id, &materialized.inventory) {
            Ok(added) => info!(snapshot_id = %snapshot.id, nodes = tree.len(), added, "registered structure"),
            Err(e) => warn!(snapshot_id = %snapshot.id, error = %e, "failed to register structure"),
        }

        let cache = SummaryCache::new(&snapshot.local_root, &ext, root_key);
        let analyzer = Analyzer::new(
            Arc::clone(&self.summarizer),
            Arc::clone(&self.reader),
            Arc::clone(&self.index),
            &self.config,
        );
        let stats = analyzer.run(&snapshot, &tree, &cache, tracker, cancel).await?;
        Ok((snapshot, stats))
    }

    fn snapshot_lock(&self, snapshot_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.snapshot_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(snapshot_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
