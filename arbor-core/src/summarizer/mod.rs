//! Summarizer collaborator and the retry policy the core applies around it.
//!
//! A summarizer only promises "non-empty text or an error". Timeouts, retries
//! and backoff live here so every provider gets the same treatment.

mod extractive;
mod http;
mod prompt;

pub use extractive::ExtractiveSummarizer;
pub use http::HttpSummarizer;
pub use prompt::build_prompt;

use crate::config::{ProviderKind, SummarizerConfig};
use crate::error::ArborError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What a summarizer call is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    File,
    Folder,
    Root,
    Answer,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
            Self::Root => "root",
            Self::Answer => "answer",
        }
    }
}

/// Text generation over content plus optional context.
///
/// Conventions by kind:
/// - `File`: content is the file text, context its path
/// - `Folder`: content is the child listing, context the child summaries
/// - `Root`: content is the top-level listing, context every summary
/// - `Answer`: content is the question, context the selected summaries
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Provider name for logs
    fn provider(&self) -> &str;

    async fn summarize(
        &self,
        content: &str,
        context: Option<&str>,
        kind: SummaryKind,
    ) -> crate::Result<String>;
}

/// Per-call timeout and bounded retries with linear backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SummarizerConfig) -> Self {
        Self {
            timeout: config.timeout_duration(),
            max_retries: config.max_retries,
            backoff: config.backoff_duration(),
        }
    }

    /// Single attempt, used by tests and offline providers
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

/// Call `summarizer` under `policy`. Empty output counts as a failure.
///
/// Returns `ArborError::Cancelled` as soon as `cancel` fires, dropping any
/// call in flight.
pub async fn summarize_with_retry(
    summarizer: &dyn Summarizer,
    policy: &RetryPolicy,
    content: &str,
    context: Option<&str>,
    kind: SummaryKind,
    cancel: &CancellationToken,
) -> crate::Result<String> {
    let attempts = policy.max_retries + 1;
    let mut last_error = ArborError::Summarizer("no attempt made".to_string());

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(ArborError::Cancelled);
        }

        debug!(
            provider = summarizer.provider(),
            kind = kind.as_str(),
            attempt,
            content_bytes = content.len(),
            context_bytes = context.map(str::len).unwrap_or(0),
            "summarizer call"
        );

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ArborError::Cancelled),
            outcome = tokio::time::timeout(
                policy.timeout,
                summarizer.summarize(content, context, kind),
            ) => outcome,
        };

        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!(
                    provider = summarizer.provider(),
                    kind = kind.as_str(),
                    response_bytes = text.len(),
                    "summarizer response"
                );
                return Ok(text.trim().to_string());
            }
            Ok(Ok(_)) => {
                last_error = ArborError::Summarizer("empty response".to_string());
            }
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = ArborError::SummarizerTimeout(policy.timeout.as_secs()),
        }

        if attempt < attempts {
            warn!(
                provider = summarizer.provider(),
                kind = kind.as_str(),
                attempt,
                error = %last_error,
                "summarizer call failed, retrying"
            );
            let delay = policy.backoff * attempt;
            tokio::select! {
                _ = cancel.cancelled() => return Err(ArborError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(last_error)
}

/// Build the configured summarizer
pub fn from_config(config: &SummarizerConfig) -> crate::Result<Arc<dyn Summarizer>> {
    match config.provider {
        ProviderKind::Extractive => Ok(Arc::new(ExtractiveSummarizer::default())),
        _ => Ok(Arc::new(HttpSummarizer::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times, then answers.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        reply: &'static str,
    }

    #[async_trait]
    impl Summarizer for Flaky {
        fn provider(&self) -> &str {
            "flaky"
        }

        async fn summarize(
            &self,
            _content: &str,
            _context: Option<&str>,
            _kind: SummaryKind,
        ) -> crate::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ArborError::Summarizer("transient".into()))
            } else {
                Ok(self.reply.to_string())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Summarizer for Slow {
        fn provider(&self) -> &str {
            "slow"
        }

        async fn summarize(
            &self,
            _content: &str,
            _context: Option<&str>,
            _kind: SummaryKind,
        ) -> crate::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            reply: "  done  ",
        };
        let token = CancellationToken::new();
        let text = summarize_with_retry(&flaky, &policy(2), "x", None, SummaryKind::File, &token)
            .await
            .unwrap();
        assert_eq!(text, "done");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let flaky = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            reply: "never",
        };
        let token = CancellationToken::new();
        let err = summarize_with_retry(&flaky, &policy(1), "x", None, SummaryKind::File, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::Summarizer(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_output_is_a_failure() {
        let empty = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            reply: "   ",
        };
        let token = CancellationToken::new();
        let result =
            summarize_with_retry(&empty, &policy(0), "x", None, SummaryKind::Folder, &token).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn times_out_slow_calls() {
        let token = CancellationToken::new();
        let err = summarize_with_retry(&Slow, &policy(0), "x", None, SummaryKind::File, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::SummarizerTimeout(_)));
    }

    #[tokio::test]
    async fn cancel_interrupts_call_in_flight() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let patient = RetryPolicy::no_retry(Duration::from_secs(30));
        let started = std::time::Instant::now();
        let err = summarize_with_retry(&Slow, &patient, "x", None, SummaryKind::File, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let flaky = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            reply: "x",
        };
        let token = CancellationToken::new();
        token.cancel();
        let err = summarize_with_retry(&flaky, &policy(0), "x", None, SummaryKind::File, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ArborError::Cancelled));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }
}
