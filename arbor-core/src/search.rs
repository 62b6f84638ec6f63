//! Ranked search over indexed summaries.

use crate::config::SearchConfig;
use crate::index::{IndexedSummary, NodeIndex};
use crate::scoring::{rank, Scorer};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub snapshot_id: String,
    pub path: String,
    pub score: f64,
    pub snippet: String,
}

/// Rank every summarized node of `snapshot_id` (all snapshots when `None`).
pub(crate) fn ranked_summaries(
    index: &NodeIndex,
    scorer: &dyn Scorer,
    query: &str,
    snapshot_id: Option<&str>,
) -> crate::Result<Vec<(IndexedSummary, f64)>> {
    let candidates = index.summarized_nodes(snapshot_id)?;
    let ranked = rank(
        scorer,
        query,
        candidates
            .iter()
            .map(|c| (c.path.as_str(), c.summary.as_str())),
    );

    let mut slots: Vec<Option<IndexedSummary>> = candidates.into_iter().map(Some).collect();
    Ok(ranked
        .into_iter()
        .filter_map(|(i, score)| slots[i].take().map(|c| (c, score)))
        .collect())
}

/// Search summaries, returning at most `limit` hits (config default when `None`,
/// capped at the configured maximum).
pub fn search(
    index: &NodeIndex,
    scorer: &dyn Scorer,
    query: &str,
    snapshot_id: Option<&str>,
    limit: Option<usize>,
    config: &SearchConfig,
) -> crate::Result<Vec<SearchHit>> {
    let limit = limit
        .unwrap_or(config.default_limit)
        .clamp(1, config.max_limit.max(1));

    let hits: Vec<SearchHit> = ranked_summaries(index, scorer, query, snapshot_id)?
        .into_iter()
        .take(limit)
        .map(|(c, score)| SearchHit {
            snippet: snippet(&c.summary, config.snippet_chars),
            snapshot_id: c.snapshot_id,
            path: c.path,
            score,
        })
        .collect();

    tracing::debug!(query, hits = hits.len(), "search");
    Ok(hits)
}

/// First `max_chars` characters of `text`
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
