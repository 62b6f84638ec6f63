//! Configuration for arbor

use crate::ArborError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Arbor Configuration

[storage]
# Directory where remote origins are cloned
workspace_dir = "cache"
# SQLite node index (rebuildable from the summary cache)
database = "arbor.db"
# Extension of sidecar summary artifacts (<file>.md, <folder>.md)
sidecar_extension = "md"

[content]
# Files above this size (bytes) get no summary
max_file_size = 1000000
# Bytes inspected for NUL to detect binary content
binary_check_bytes = 8192

[summarizer]
# One of: ollama, openai, deepseek, extractive
provider = "ollama"
# Empty base_url/model use the provider's defaults
base_url = ""
model = ""
# Environment variable holding the API key (openai/deepseek)
api_key_env = "ARBOR_API_KEY"
temperature = 0.3
max_tokens = 4000
# Per-call timeout and retry policy
timeout = "120s"
max_retries = 2
retry_backoff = "2s"

[analysis]
# Concurrent summarizer calls; 1 keeps the strictly sequential order
concurrency = 1
# What to do when the root summary name collides: disambiguate or fail
root_collision = "disambiguate"

[search]
default_limit = 10
max_limit = 100
# Summaries handed to the summarizer as Q&A context
qa_top_k = 5
snippet_chars = 300

[ignore]
patterns = [
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".DS_Store",
]

[access]
# When disabled every caller is allowed
enabled = false
admin_passphrase = ""
class_name = ""
evaluator_slots = 3
crawl_limit = 1
question_limit = 2
"#;

/// Arbor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_sidecar_extension")]
    pub sidecar_extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_binary_check_bytes")]
    pub binary_check_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    DeepSeek,
    Extractive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootCollisionPolicy {
    /// Pick the first free `<name>.root[-n].<ext>` variant
    Disambiguate,
    /// Refuse to analyze the snapshot
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_root_collision")]
    pub root_collision: RootCollisionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_result_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_qa_top_k")]
    pub qa_top_k: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default = "default_ignore_patterns")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub admin_passphrase: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default = "default_evaluator_slots")]
    pub evaluator_slots: u32,
    #[serde(default = "default_crawl_limit")]
    pub crawl_limit: u32,
    #[serde(default = "default_question_limit")]
    pub question_limit: u32,
}

// Default value functions
fn default_workspace_dir() -> PathBuf {
    PathBuf::from("cache")
}
fn default_database() -> PathBuf {
    PathBuf::from("arbor.db")
}
fn default_sidecar_extension() -> String {
    "md".to_string()
}
fn default_max_file_size() -> u64 {
    1_000_000
}
fn default_binary_check_bytes() -> usize {
    8192
}
fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}
fn default_base_url() -> String {
    String::new()
}
fn default_model() -> String {
    String::new()
}
fn default_api_key_env() -> String {
    "ARBOR_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_timeout() -> String {
    "120s".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff() -> String {
    "2s".to_string()
}
fn default_concurrency() -> usize {
    1
}
fn default_root_collision() -> RootCollisionPolicy {
    RootCollisionPolicy::Disambiguate
}
fn default_result_limit() -> usize {
    10
}
fn default_max_limit() -> usize {
    100
}
fn default_qa_top_k() -> usize {
    5
}
fn default_snippet_chars() -> usize {
    300
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        "target".to_string(),
        "__pycache__".to_string(),
        ".venv".to_string(),
        "venv".to_string(),
        ".DS_Store".to_string(),
    ]
}
fn default_evaluator_slots() -> u32 {
    3
}
fn default_crawl_limit() -> u32 {
    1
}
fn default_question_limit() -> u32 {
    2
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            database: default_database(),
            sidecar_extension: default_sidecar_extension(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            binary_check_bytes: default_binary_check_bytes(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            root_collision: default_root_collision(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_result_limit(),
            max_limit: default_max_limit(),
            qa_top_k: default_qa_top_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: default_ignore_patterns(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            admin_passphrase: String::new(),
            class_name: String::new(),
            evaluator_slots: default_evaluator_slots(),
            crawl_limit: default_crawl_limit(),
            question_limit: default_question_limit(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| ArborError::ConfigParse(e.to_string()))
    }
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Extractive => "extractive",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Extractive => "",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Ollama => "llama3",
            Self::OpenAi => "gpt-4o-mini",
            Self::DeepSeek => "deepseek-coder",
            Self::Extractive => "extractive",
        }
    }
}

impl SummarizerConfig {
    /// Configured endpoint, or the provider default when unset
    pub fn endpoint(&self) -> String {
        let url = if self.base_url.trim().is_empty() {
            self.provider.default_base_url()
        } else {
            self.base_url.trim()
        };
        url.trim_end_matches('/').to_string()
    }

    pub fn model_name(&self) -> String {
        if self.model.trim().is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.model.trim().to_string()
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(120))
    }

    pub fn backoff_duration(&self) -> Duration {
        parse_duration(&self.retry_backoff).unwrap_or(Duration::from_secs(2))
    }
}

/// Parse duration string (e.g., "1h", "30m", "1d")
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    match unit {
        "s" => Some(Duration::from_secs(num)),
        "m" => Some(Duration::from_secs(num * 60)),
        "h" => Some(Duration::from_secs(num * 3600)),
        "d" => Some(Duration::from_secs(num * 86400)),
        _ => None,
    }
}
