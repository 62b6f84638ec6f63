//! One unit of work: resolve a single node's summary, cache first.

use crate::cache::{CacheKey, SummaryCache};
use crate::error::ArborError;
use crate::index::NodeIndex;
use crate::node::{Node, NodeKind};
use crate::source::ContentReader;
use crate::summarizer::{summarize_with_retry, RetryPolicy, Summarizer, SummaryKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared, cheaply clonable context for units of one run
#[derive(Clone)]
pub(crate) struct UnitContext {
    pub summarizer: Arc<dyn Summarizer>,
    pub reader: Arc<dyn ContentReader>,
    pub index: Arc<NodeIndex>,
    pub cache: SummaryCache,
    pub retry: RetryPolicy,
    pub snapshot_id: String,
    pub local_root: PathBuf,
    pub cancel: CancellationToken,
}

/// Where a unit's summarizer input comes from
pub(crate) enum UnitInput {
    /// Read the file's content; context is its path
    File,
    /// Pre-built content and context
    Provided { content: String, context: String },
}

pub(crate) struct Unit {
    pub path: String,
    pub node_kind: NodeKind,
    pub summary_kind: SummaryKind,
    pub key: CacheKey,
    pub input: UnitInput,
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Cached(String),
    Generated(String),
    /// No content to summarize (binary, oversized, unreadable)
    Skipped,
    Failed(ArborError),
    Cancelled,
}

pub(crate) async fn run_unit(ctx: UnitContext, unit: Unit) -> (String, Outcome) {
    let outcome = resolve(&ctx, &unit).await;
    (unit.path, outcome)
}

async fn resolve(ctx: &UnitContext, unit: &Unit) -> Outcome {
    match ctx.cache.read(&unit.key) {
        Ok(Some(text)) => {
            debug!(path = %unit.path, "cache hit");
            sync_index(ctx, unit, &text);
            return Outcome::Cached(text);
        }
        Ok(None) => {}
        Err(e) => return Outcome::Failed(e),
    }

    let (content, context) = match &unit.input {
        UnitInput::File => {
            let reader = Arc::clone(&ctx.reader);
            let root = ctx.local_root.clone();
            let path = unit.path.clone();
            match tokio::task::spawn_blocking(move || reader.read(&root, &path)).await {
                Ok(Some(text)) => (text, unit.path.clone()),
                Ok(None) => {
                    debug!(path = %unit.path, "no readable content");
                    return Outcome::Skipped;
                }
                Err(e) => {
                    return Outcome::Failed(ArborError::Io(std::io::Error::other(format!(
                        "read task failed: {e}"
                    ))))
                }
            }
        }
        UnitInput::Provided { content, context } => (content.clone(), context.clone()),
    };

    let context = Some(context.as_str()).filter(|c| !c.is_empty());
    let text = match summarize_with_retry(
        ctx.summarizer.as_ref(),
        &ctx.retry,
        &content,
        context,
        unit.summary_kind,
        &ctx.cancel,
    )
    .await
    {
        Ok(text) => text,
        Err(ArborError::Cancelled) => return Outcome::Cancelled,
        Err(e) => return Outcome::Failed(e),
    };

    // Cache first; the index only ever follows a successful cache write.
    if let Err(e) = ctx.cache.write(&unit.key, &text) {
        return Outcome::Failed(e);
    }
    sync_index(ctx, unit, &text);
    Outcome::Generated(text)
}

fn sync_index(ctx: &UnitContext, unit: &Unit, text: &str) {
    let node = Node::new(unit.path.clone(), unit.node_kind, Some(text.to_string()));
    if let Err(e) = ctx.index.upsert(&ctx.snapshot_id, &node) {
        warn!(path = %unit.path, error = %e, "index sync failed");
    }
}
