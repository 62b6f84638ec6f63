//! Tiered lexical relevance scoring over stored summaries.

/// Relevance strategy: higher is better, `0.0` means unrelated.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &str, text: &str) -> f64;
}

const PHRASE_TIER: f64 = 2.0;
const ALL_TOKENS_TIER: f64 = 1.5;
const ANY_TOKEN_TIER: f64 = 1.0;
const BASELINE_TIER: f64 = 0.0;
const PATH_BONUS: f64 = 0.5;
const MIN_TOKEN_CHARS: usize = 3;

/// Tiers:
/// - 2.0 when the whole query appears as a phrase (word-bounded)
/// - 1.5 when every query token longer than two characters appears
/// - 1.0 when any such token appears
/// - 0.0 otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

impl Scorer for LexicalScorer {
    fn score(&self, query: &str, text: &str) -> f64 {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return BASELINE_TIER;
        }
        let text = text.to_lowercase();

        if contains_phrase(&text, &query) {
            return PHRASE_TIER;
        }

        let tokens: Vec<&str> = query
            .split_whitespace()
            .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
            .collect();
        if tokens.is_empty() {
            return BASELINE_TIER;
        }

        let hits = tokens.iter().filter(|t| text.contains(*t)).count();
        if hits == tokens.len() {
            ALL_TOKENS_TIER
        } else if hits > 0 {
            ANY_TOKEN_TIER
        } else {
            BASELINE_TIER
        }
    }
}

/// Bonus added when the query also appears in the item's path
pub fn path_bonus(query: &str, path: &str) -> f64 {
    let query = query.trim().to_lowercase();
    if !query.is_empty() && path.to_lowercase().contains(&query) {
        PATH_BONUS
    } else {
        0.0
    }
}

/// Score `(path, text)` candidates and rank them.
///
/// Returns `(candidate index, score)` for candidates scoring above zero,
/// descending by score; equal scores keep retrieval order.
pub fn rank<'a, I>(scorer: &dyn Scorer, query: &str, candidates: I) -> Vec<(usize, f64)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut scored: Vec<(usize, f64)> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, (path, text))| (i, scorer.score(query, text) + path_bonus(query, path)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    // sort_by is stable
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

/// `needle` occurs in `haystack` with no alphanumeric character on either side.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_query_outranks_partial_matches() {
        let summaries = [
            "uses authentication middleware",
            "no relation",
            "authentication and auth flow",
        ];
        let ranked = rank(
            &LexicalScorer,
            "auth",
            summaries.iter().map(|s| ("", *s)),
        );
        let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![2, 0]);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn tiers() {
        let s = LexicalScorer;
        assert_eq!(s.score("token cache", "A Token Cache for sessions"), 2.0);
        assert_eq!(s.score("token cache", "cache of the token store"), 1.5);
        assert_eq!(s.score("token cache", "refresh token handling"), 1.0);
        assert_eq!(s.score("token cache", "unrelated"), 0.0);
        assert_eq!(s.score("", "anything"), 0.0);
    }

    #[test]
    fn short_queries_only_match_as_phrase() {
        let s = LexicalScorer;
        assert_eq!(s.score("io", "async io helpers"), 2.0);
        assert_eq!(s.score("io", "configuration"), 0.0);
    }

    #[test]
    fn path_bonus_applies_even_without_text_match() {
        let ranked = rank(
            &LexicalScorer,
            "router",
            [("src/router.rs", "dispatches requests"), ("src/db.rs", "router table")],
        );
        assert_eq!(ranked, vec![(1, 2.0), (0, 0.5)]);
    }

    #[test]
    fn ties_keep_retrieval_order() {
        let ranked = rank(
            &LexicalScorer,
            "parser",
            [("a", "parser one"), ("b", "parser two"), ("c", "parser three")],
        );
        let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
