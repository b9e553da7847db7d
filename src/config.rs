//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so a config file is optional. The only value
//! that must come from the environment is the hosted-model API key; see
//! [`LlmConfig::api_key`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Conditions that stop the process before any input is accepted.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0} is not set; export it or add it to a .env file")]
    MissingSecret(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the model per question.
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
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider, or an OpenAI-compatible gateway.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_max_tokens() -> usize {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

impl LlmConfig {
    /// Read the API key from the configured environment variable.
    ///
    /// An unset or blank variable is a startup error.
    pub fn api_key(&self) -> Result<String, StartupError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(StartupError::MissingSecret(self.api_key_env.clone())),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Directory generated documents are written to.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Oldest chat turns are evicted past this many.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

fn default_max_history() -> usize {
    50
}

/// Load configuration from `path`, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.provider != "local" && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.api_key_env.trim().is_empty() {
        anyhow::bail!("llm.api_key_env must not be empty");
    }

    if config.session.max_history == 0 {
        anyhow::bail!("session.max_history must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = load_config(None).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.llm.api_key_env, "GROQ_API_KEY");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[chunking]
chunk_size = 500

[llm]
model = "llama-3.1-8b-instant"
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.session.max_history, 50);
        validate(&config).unwrap();
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = Config::default();
        config.embedding.provider = "cohere".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("cohere"));
    }

    #[test]
    fn remote_provider_needs_model() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err());
        config.embedding.model = Some("text-embedding-3-small".to_string());
        validate(&config).unwrap();
    }

    #[test]
    fn missing_api_key_is_startup_error() {
        let llm = LlmConfig {
            api_key_env: "DOCPILOT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        let err = llm.api_key().unwrap_err();
        assert!(err
            .to_string()
            .contains("DOCPILOT_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
