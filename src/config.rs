//! TOML configuration and environment credentials.
//!
//! Every section has defaults, so a missing config file yields a usable
//! [`Config`] pointing at `data/document.pdf` and the OpenAI APIs. The API
//! key never lives in the file: it is read from `OPENAI_API_KEY` (after
//! loading an optional `.env`) by [`Credentials::from_env`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the language-model / embedding API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentConfig {
    #[serde(default = "default_document_path")]
    pub path: PathBuf,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: default_document_path(),
        }
    }
}

fn default_document_path() -> PathBuf {
    PathBuf::from("data/document.pdf")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn needs_api_key(&self) -> bool {
        self.provider == "openai"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Longest allowed gap between reads from the upstream, including
    /// between streamed chunks. A long completion that keeps producing
    /// output is never cut off.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Content of the system turn that opens every conversation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_secs: default_llm_timeout_secs(),
            connect_timeout_secs: default_llm_connect_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_llm_connect_timeout_secs() -> u64 {
    10
}

pub fn default_system_prompt() -> String {
    "You are a helpful AI assistant designed to answer questions about the document. \
     Use the provided relevant chunks to answer questions accurately."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Delay before forwarding each fragment. `0` disables pacing.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
        }
    }
}

fn default_pacing_ms() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_allow_all")]
    pub cors_allow_all: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_allow_all: default_cors_allow_all(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_cors_allow_all() -> bool {
    true
}

/// Load and validate the configuration file.
///
/// A path that does not exist yields the default configuration; a file that
/// exists but cannot be read or parsed is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Parse a TOML string into a [`Config`] without touching the filesystem.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }
    if config.llm.timeout_secs == 0 || config.llm.connect_timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs and llm.connect_timeout_secs must be > 0");
    }
    if config.llm.system_prompt.trim().is_empty() {
        anyhow::bail!("llm.system_prompt must not be empty");
    }

    Ok(())
}

/// Secrets read from the process environment.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Load `.env` if present, then read [`API_KEY_ENV`]. Absence is an error.
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        match lookup(API_KEY_ENV) {
            Some(key) if !key.trim().is_empty() => Ok(Self { api_key: key }),
            _ => anyhow::bail!("{} not set in the environment or .env file", API_KEY_ENV),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.document.path, PathBuf::from("data/document.pdf"));
        assert_eq!(config.chunking.max_tokens, 512);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.llm.connect_timeout_secs, 10);
        assert_eq!(config.stream.pacing_ms, 10);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = parse_config(
            r#"
[retrieval]
top_k = 5

[stream]
pacing_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.stream.pacing_ms, 0);
        assert_eq!(config.embedding.provider, "openai");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let config = parse_config("[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn rejects_zero_top_k() {
        let config = parse_config("[retrieval]\ntop_k = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let config = parse_config("[embedding]\nprovider = \"mystery\"\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn credentials_require_non_empty_key() {
        assert!(Credentials::from_lookup(|_| None).is_err());
        assert!(Credentials::from_lookup(|_| Some("  ".to_string())).is_err());
        let creds = Credentials::from_lookup(|_| Some("sk-test".to_string())).unwrap();
        assert_eq!(creds.api_key, "sk-test");
        assert!(!format!("{:?}", creds).contains("sk-test"));
    }
}
