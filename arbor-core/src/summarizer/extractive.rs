//! Offline summarizer: picks headline lines and structural counts.
//!
//! Deterministic and network-free, for air-gapped runs and tests.

use super::{Summarizer, SummaryKind};
use async_trait::async_trait;

const DECLARATION_PREFIXES: &[&str] = &[
    "pub fn ", "fn ", "pub struct ", "struct ", "pub enum ", "enum ", "pub trait ", "trait ",
    "impl ", "def ", "class ", "function ", "export ", "interface ", "func ", "type ", "# ",
    "## ",
];

#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_lines: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self { max_lines: 8 }
    }
}

impl ExtractiveSummarizer {
    fn summarize_file(&self, content: &str, path: Option<&str>) -> String {
        let line_count = content.lines().count();
        let headlines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| is_headline(l))
            .take(self.max_lines)
            .collect();

        let mut out = format!(
            "{} ({} lines).",
            path.map(|p| format!("`{}`", p))
                .unwrap_or_else(|| "File".to_string()),
            line_count
        );
        if headlines.is_empty() {
            if let Some(first) = content.lines().map(str::trim).find(|l| !l.is_empty()) {
                out.push_str(&format!(" Starts with: {}", first));
            }
        } else {
            out.push_str(" Key lines:");
            for line in headlines {
                out.push_str(&format!("\n- {}", line));
            }
        }
        out
    }

    fn summarize_listing(&self, label: &str, listing: &str, summaries: Option<&str>) -> String {
        let folders = listing.lines().filter(|l| l.ends_with('/')).count();
        let files = listing.lines().filter(|l| !l.trim().is_empty()).count() - folders;

        let mut out = format!("{} with {} folders and {} files.", label, folders, files);
        if let Some(summaries) = summaries {
            let firsts: Vec<String> = sections(summaries)
                .into_iter()
                .take(self.max_lines)
                .map(|(header, body)| {
                    let first = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
                    format!("- {}: {}", header, first)
                })
                .collect();
            if !firsts.is_empty() {
                out.push('\n');
                out.push_str(&firsts.join("\n"));
            }
        }
        out
    }

    fn answer(&self, question: &str, context: Option<&str>) -> String {
        let Some(context) = context else {
            return "No indexed summaries are available to answer this question.".to_string();
        };
        let tokens: Vec<String> = question
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| t.chars().count() > 2)
            .collect();

        let relevant: Vec<String> = sections(context)
            .into_iter()
            .filter(|(_, body)| {
                let body = body.to_lowercase();
                tokens.is_empty() || tokens.iter().any(|t| body.contains(t.as_str()))
            })
            .take(self.max_lines)
            .map(|(header, body)| {
                let first = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
                format!("- {}: {}", header, first)
            })
            .collect();

        if relevant.is_empty() {
            "The indexed summaries do not mention this directly.".to_string()
        } else {
            format!("Relevant parts of the repository:\n{}", relevant.join("\n"))
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    fn provider(&self) -> &str {
        "extractive"
    }

    async fn summarize(
        &self,
        content: &str,
        context: Option<&str>,
        kind: SummaryKind,
    ) -> crate::Result<String> {
        Ok(match kind {
            SummaryKind::File => self.summarize_file(content, context),
            SummaryKind::Folder => self.summarize_listing("Folder", content, context),
            SummaryKind::Root => self.summarize_listing("Repository", content, context),
            SummaryKind::Answer => self.answer(content, context),
        })
    }
}

fn is_headline(line: &str) -> bool {
    line.starts_with("//!")
        || line.starts_with("\"\"\"")
        || DECLARATION_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Split `## Header\nbody` style context into `(header, body)` pairs.
fn sections(text: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let header = line
            .strip_prefix("### ")
            .or_else(|| line.strip_prefix("## "))
            .map(|h| h.split_once(": ").map(|(_, p)| p).unwrap_or(h));
        match header {
            Some(h) => out.push((h.trim().to_string(), String::new())),
            None => {
                if let Some((_, body)) = out.last_mut() {
                    body.push_str(line);
                    body.push('\n');
                }
            }
        }
    }
    out
}
