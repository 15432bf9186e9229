
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

const APP_DIR_NAME: &str = "knowledge-rag";
const ENV_PREFIX: &str = "KNOWLEDGE_RAG_";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable, friendly assistant representing the company Insurellm.
You are chatting with a user about Insurellm.
If relevant, use the given context to answer any question.
If you don't know the answer, say so.
Context:
{context}
";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            // Ollama's build of all-MiniLM-L6-v2
            model: "all-minilm:latest".to_string(),
            batch_size: 16,
        }
    }
}

/// Settings for the OpenAI-compatible chat completion provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_seconds: Option<u64>,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.0,
            timeout_seconds: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::L2 => write!(f, "l2"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the answer composer
    pub k: usize,
    pub distance: DistanceMetric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            distance: DistanceMetric::Cosine,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the knowledge base, one subdirectory per category
    pub knowledge_base: PathBuf,
    /// Vector store directory. Defaults to `vector_db` inside the config directory.
    pub vector_store: Option<PathBuf>,
    /// File extensions picked up by the document loader
    pub extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            knowledge_base: PathBuf::from("knowledge-base"),
            vector_store: None,
            extensions: vec!["md".to_string()],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            chat: ChatConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            paths: PathsConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid retrieval width: {0} (must be between 1 and 100)")]
    InvalidRetrievalWidth(usize),
    #[error("Invalid temperature: {0} (must be between 0 and 2)")]
    InvalidTemperature(f32),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvValue { name: String, value: String },
    #[error("No file extensions configured for the document loader")]
    NoExtensions,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `<platform config dir>/knowledge-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, then apply environment overrides.
    ///
    /// A missing file yields the defaults. The result is always validated.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load_file(config_dir)?;
        config
            .apply_env_overrides()
            .context("Invalid configuration in environment")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// Load `config.toml` without consulting the environment
    #[inline]
    pub fn load_file<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            debug!("No config file at {}, using defaults", config_path.display());
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Override settings from `KNOWLEDGE_RAG_*` environment variables
    #[inline]
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var("KNOWLEDGE_BASE") {
            self.paths.knowledge_base = PathBuf::from(value);
        }
        if let Some(value) = env_var("VECTOR_STORE") {
            self.paths.vector_store = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("EMBEDDING_MODEL") {
            self.ollama.model = value;
        }
        if let Some(value) = env_var("OLLAMA_HOST") {
            self.ollama.host = value;
        }
        if let Some(port) = parse_env_var("OLLAMA_PORT")? {
            self.ollama.port = port;
        }
        if let Some(k) = parse_env_var("RETRIEVAL_K")? {
            self.retrieval.k = k;
        }
        if let Some(size) = parse_env_var("CHUNK_SIZE")? {
            self.chunking.chunk_size = size;
        }
        if let Some(overlap) = parse_env_var("CHUNK_OVERLAP")? {
            self.chunking.chunk_overlap = overlap;
        }
        if let Some(value) = env_var("CHAT_MODEL") {
            self.chat.model = value;
        }
        if let Some(value) = env_var("CHAT_BASE_URL") {
            self.chat.base_url = value;
        }
        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.chat.validate()?;
        self.validate_chunking_config()?;

        if !(1..=100).contains(&self.retrieval.k) {
            return Err(ConfigError::InvalidRetrievalWidth(self.retrieval.k));
        }

        if self.paths.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(ConfigError::NoExtensions);
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(1..=100_000).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        // An overlap as large as the window would never advance
        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.paths
            .vector_store
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("vector_db"))
    }

    #[inline]
    pub fn knowledge_base_path(&self) -> &Path {
        &self.paths.knowledge_base
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env_var<T: std::str::FromStr>(suffix: &str) -> Result<Option<T>, ConfigError> {
    env_var(suffix)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnvValue {
                    name: format!("{ENV_PREFIX}{suffix}"),
                    value,
                })
        })
        .transpose()
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(format!(
                "{}://{}:{}",
                self.protocol, self.host, self.port
            )));
        }
        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let temp_config = ChatConfig {
            base_url: base_url.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }
}
