//! HTTP text-generation backends: OpenAI-compatible chat completions
//! (openai, deepseek) and Ollama's generate endpoint.

use super::{build_prompt, Summarizer, SummaryKind};
use crate::config::{ProviderKind, SummarizerConfig};
use crate::error::ArborError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    ChatCompletions,
    OllamaGenerate,
}

pub struct HttpSummarizer {
    http: reqwest::Client,
    protocol: Protocol,
    provider: &'static str,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl HttpSummarizer {
    pub fn from_config(config: &SummarizerConfig) -> crate::Result<Self> {
        let protocol = match config.provider {
            ProviderKind::OpenAi | ProviderKind::DeepSeek => Protocol::ChatCompletions,
            ProviderKind::Ollama => Protocol::OllamaGenerate,
            ProviderKind::Extractive => {
                return Err(ArborError::ConfigParse(
                    "extractive provider has no HTTP endpoint".to_string(),
                ))
            }
        };

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if protocol == Protocol::ChatCompletions && api_key.is_none() {
            return Err(ArborError::ConfigParse(format!(
                "{} provider needs an API key in ${}",
                config.provider.as_str(),
                config.api_key_env
            )));
        }

        // The per-call timeout is enforced by the retry policy.
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            protocol,
            provider: config.provider.as_str(),
            endpoint: config.endpoint(),
            model: config.model_name(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn chat(&self, prompt: &str) -> crate::Result<String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ArborError::Summarizer(format!(
                "{} returned {}: {}",
                self.provider,
                status,
                truncate(&text, 200)
            )));
        }

        let parsed: ChatResponse = resp.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn generate(&self, prompt: &str) -> crate::Result<String> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ArborError::Summarizer(format!(
                "ollama returned {}: {}",
                status,
                truncate(&text, 200)
            )));
        }
        let parsed: GenerateResponse = resp.json().await?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    fn provider(&self) -> &str {
        self.provider
    }

    async fn summarize(
        &self,
        content: &str,
        context: Option<&str>,
        kind: SummaryKind,
    ) -> crate::Result<String> {
        let prompt = build_prompt(content, context, kind);
        tracing::debug!(
            provider = self.provider,
            model = %self.model,
            kind = kind.as_str(),
            prompt_bytes = prompt.len(),
            "sending prompt"
        );
        let text = match self.protocol {
            Protocol::ChatCompletions => self.chat(&prompt).await?,
            Protocol::OllamaGenerate => self.generate(&prompt).await?,
        };
        Ok(text.trim().to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
