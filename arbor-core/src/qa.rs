//! Question answering over a snapshot's summaries.

use crate::cache::SummaryCache;
use crate::index::NodeIndex;
use crate::node::NodeKind;
use crate::scoring::Scorer;
use crate::search::ranked_summaries;
use crate::summarizer::{summarize_with_retry, RetryPolicy, Summarizer, SummaryKind};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Context handed to the summarizer for one question
#[derive(Debug, Clone, PartialEq)]
pub struct QaContext {
    pub text: String,
    pub sources: Vec<String>,
}

/// Pick the `top_k` best-scoring summaries of a snapshot, each under a
/// `## File: <path>`, `## Folder: <path>` or `## Repository Overview` header.
///
/// When nothing scores above zero the root summary (cache first) is used under
/// `## Repository Overview` and the root path `""` is the only source.
pub fn select_context(
    index: &NodeIndex,
    scorer: &dyn Scorer,
    snapshot_id: &str,
    cache: &SummaryCache,
    question: &str,
    top_k: usize,
) -> crate::Result<QaContext> {
    let ranked = ranked_summaries(index, scorer, question, Some(snapshot_id))?;

    let mut sections = Vec::new();
    let mut sources = Vec::new();
    for (hit, _) in ranked.into_iter().take(top_k.max(1)) {
        sections.push(format!("{}\n{}", section_header(&hit.path, hit.kind), hit.summary));
        sources.push(hit.path);
    }

    if sections.is_empty() {
        if let Some(root) = index.resolve_summary(snapshot_id, "", NodeKind::Folder, cache)? {
            sections.push(format!("## Repository Overview\n{}", root));
            sources.push(String::new());
        }
    }

    Ok(QaContext {
        text: sections.join("\n\n"),
        sources,
    })
}

fn section_header(path: &str, kind: NodeKind) -> String {
    match kind {
        _ if path.is_empty() => "## Repository Overview".to_string(),
        NodeKind::Folder => format!("## Folder: {}", path),
        NodeKind::File => format!("## File: {}", path),
    }
}

/// Ask the summarizer to answer `question` from `context`.
pub async fn answer_question(
    summarizer: &dyn Summarizer,
    retry: &RetryPolicy,
    context: &QaContext,
    question: &str,
) -> crate::Result<Answer> {
    let context_text = Some(context.text.as_str()).filter(|t| !t.is_empty());
    let answer = summarize_with_retry(
        summarizer,
        retry,
        question,
        context_text,
        SummaryKind::Answer,
        &CancellationToken::new(),
    )
    .await?;
    Ok(Answer {
        answer,
        sources: context.sources.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, Snapshot};
    use crate::scoring::LexicalScorer;
    use crate::summarizer::ExtractiveSummarizer;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> (NodeIndex, Snapshot, SummaryCache) {
        let index = NodeIndex::open_in_memory().unwrap();
        let mut snapshot = Snapshot::new("/tmp/qa-demo", dir.path());
        snapshot.root_key = Some("qa-demo.md".into());
        index.upsert_snapshot(&snapshot).unwrap();
        let cache = SummaryCache::for_snapshot(&snapshot, "md");
        for (path, text) in [
            ("auth.rs", "Authentication middleware for sessions"),
            ("db.rs", "Database connection pool"),
        ] {
            index
                .upsert(&snapshot.id, &Node::new(path, NodeKind::File, Some(text.into())))
                .unwrap();
        }
        (index, snapshot, cache)
    }

    #[test]
    fn picks_matching_summaries() {
        let dir = TempDir::new().unwrap();
        let (index, snapshot, cache) = fixture(&dir);
        let ctx = select_context(&index, &LexicalScorer, &snapshot.id, &cache, "authentication", 5)
            .unwrap();
        assert_eq!(ctx.sources, vec!["auth.rs".to_string()]);
        assert!(ctx.text.starts_with("## File: auth.rs\n"));
    }

    #[test]
    fn labels_folders_and_overview() {
        let dir = TempDir::new().unwrap();
        let (index, snapshot, cache) = fixture(&dir);
        index
            .upsert(
                &snapshot.id,
                &Node::new("", NodeKind::Folder, Some("Session handling overview".into())),
            )
            .unwrap();
        index
            .upsert(
                &snapshot.id,
                &Node::new("middleware", NodeKind::Folder, Some("Session middleware".into())),
            )
            .unwrap();

        let ctx = select_context(&index, &LexicalScorer, &snapshot.id, &cache, "session", 5)
            .unwrap();
        assert!(ctx.text.contains("## File: auth.rs\n"));
        assert!(ctx.text.contains("## Folder: middleware\n"));
        assert!(ctx.text.contains("## Repository Overview\n"));
        assert!(!ctx.text.contains("## File: \n"));
        assert_eq!(ctx.sources.len(), 3);
        assert!(ctx.sources.contains(&String::new()));
    }

    #[test]
    fn falls_back_to_cached_root_summary() {
        let dir = TempDir::new().unwrap();
        let (index, snapshot, cache) = fixture(&dir);
        index
            .upsert(&snapshot.id, &Node::new("", NodeKind::Folder, Some("stale root".into())))
            .unwrap();
        cache.write(cache.root_key(), "A demo service.").unwrap();

        let ctx = select_context(&index, &LexicalScorer, &snapshot.id, &cache, "kubernetes", 5)
            .unwrap();
        assert_eq!(ctx.sources, vec![String::new()]);
        assert_eq!(ctx.text, "## Repository Overview\nA demo service.");
    }

    #[tokio::test]
    async fn answers_with_sources() {
        let dir = TempDir::new().unwrap();
        let (index, snapshot, cache) = fixture(&dir);
        let ctx =
            select_context(&index, &LexicalScorer, &snapshot.id, &cache, "database pool", 5).unwrap();
        let answer = answer_question(
            &ExtractiveSummarizer::default(),
            &RetryPolicy::no_retry(Duration::from_secs(5)),
            &ctx,
            "database pool",
        )
        .await
        .unwrap();
        assert_eq!(answer.sources, vec!["db.rs".to_string()]);
        assert!(answer.answer.contains("db.rs"));
    }
}
