
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

const APP_DIR_NAME: &str = ".knowledge-store";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
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
            model: "nomic-embed-text".to_string(),
            batch_size: 16,
        }
    }
}

/// Which vector index implementation backs the store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Remote Qdrant server over REST
    #[default]
    Qdrant,
    /// Embedded LanceDB tables on local disk
    Lancedb,
    /// Transient in-process index; implies in-memory mode
    Memory,
}

impl std::fmt::Display for IndexBackend {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qdrant => write!(f, "qdrant"),
            Self::Lancedb => write!(f, "lancedb"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub backend: IndexBackend,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    /// Overrides `<base_dir>/vectors` for the LanceDB backend
    pub lancedb_path: Option<PathBuf>,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Qdrant,
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 6333,
            api_key: None,
            lancedb_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Skip local metadata entirely and keep collections in memory only
    pub in_memory: bool,
    /// Upper bound for every individual external call, in seconds
    pub call_timeout_secs: u64,
    /// How many chunks of one document are embedded concurrently
    pub embedding_concurrency: usize,
    pub default_limit: usize,
    /// Collection searched by `search` when no collection is given
    pub default_collection: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            in_memory: false,
            call_timeout_secs: 60,
            embedding_concurrency: 4,
            default_limit: 3,
            default_collection: None,
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
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid call timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidCallTimeout(u64),
    #[error("Invalid embedding concurrency: {0} (must be between 1 and 64)")]
    InvalidEmbeddingConcurrency(usize),
    #[error("Invalid default limit: {0} (must be between 1 and 100)")]
    InvalidDefaultLimit(usize),
    #[error("Invalid target chunk size: {0} (must be between 100 and 2048)")]
    InvalidTargetChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 200 and 4096)")]
    InvalidMaxChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 50 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Invalid overlap size: {0} (must be between 0 and 512)")]
    InvalidOverlapSize(usize),
    #[error("Max chunk size ({0}) must be greater than target chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Target chunk size ({0}) must be greater than min chunk size ({1})")]
    TargetChunkSizeTooSmall(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            vector_index: VectorIndexConfig::default(),
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(APP_DIR_NAME)),
        }
    }
}

impl Config {
    /// Default base directory: `~/.knowledge-store`, or the platform data dir
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(APP_DIR_NAME))
            .or_else(|| dirs::data_dir().map(|data| data.join("knowledge-store")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load from the default base directory
    #[inline]
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_dir()?)
    }

    /// Load `config.toml` from `base_dir`; a missing file means defaults
    #[inline]
    pub fn load_from<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let path = base_dir.join(CONFIG_FILE_NAME);

        let mut config = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<Self>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        config.base_dir = base_dir;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        Ok(config)
    }

    /// Validate, then write `config.toml` into the base directory
    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate().context("Refusing to save invalid configuration")?;

        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;

        let path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.vector_index.validate()?;
        self.store.validate()?;
        self.chunking.validate()
    }

    /// In-memory mode is requested explicitly or implied by the memory backend
    #[inline]
    pub fn is_in_memory(&self) -> bool {
        self.store.in_memory || self.vector_index.backend == IndexBackend::Memory
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn qdrant_url(&self) -> Result<Url, ConfigError> {
        self.vector_index.qdrant_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    /// Directory holding one `<title>.json` metadata file per collection
    #[inline]
    pub fn metadata_dir(&self) -> PathBuf {
        self.base_dir.join("knowledge")
    }

    #[inline]
    pub fn lancedb_path(&self) -> PathBuf {
        self.vector_index
            .lancedb_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join("vectors"))
    }
}

/// Reject `value` with `error` unless it lies in `range`
fn check_range<T: PartialOrd>(
    value: T,
    range: RangeInclusive<T>,
    error: fn(T) -> ConfigError,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(error(value))
    }
}

fn check_protocol(protocol: &str) -> Result<(), ConfigError> {
    match protocol {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidProtocol(other.to_string())),
    }
}

fn endpoint_url(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    check_protocol(protocol)?;
    check_range(port, 1..=u16::MAX, ConfigError::InvalidPort)?;

    let raw = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl(raw))
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        check_range(self.batch_size, 1..=1000, ConfigError::InvalidBatchSize)
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)
    }

    /// Apply `edit` only if the edited settings still validate
    fn edit(&mut self, edit: impl FnOnce(&mut Self)) -> Result<(), ConfigError> {
        let mut candidate = self.clone();
        edit(&mut candidate);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        self.edit(|c| c.protocol = protocol)
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        self.edit(|c| c.host = host)
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        self.edit(|c| c.port = port)
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        self.edit(|c| c.model = model)
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        self.edit(|c| c.batch_size = batch_size)
    }
}

impl VectorIndexConfig {
    /// Endpoint settings only matter for the Qdrant backend
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            IndexBackend::Qdrant => self.qdrant_url().map(drop),
            IndexBackend::Lancedb | IndexBackend::Memory => Ok(()),
        }
    }

    #[inline]
    pub fn qdrant_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        endpoint_url(&self.protocol, &host, self.port)?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        endpoint_url(&self.protocol, &self.host, port)?;
        self.port = port;
        Ok(())
    }
}

impl StoreConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(self.call_timeout_secs, 1..=3600, ConfigError::InvalidCallTimeout)?;
        check_range(
            self.embedding_concurrency,
            1..=64,
            ConfigError::InvalidEmbeddingConcurrency,
        )?;
        check_range(self.default_limit, 1..=100, ConfigError::InvalidDefaultLimit)
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            self.target_chunk_size,
            100..=2048,
            ConfigError::InvalidTargetChunkSize,
        )?;
        check_range(self.max_chunk_size, 200..=4096, ConfigError::InvalidMaxChunkSize)?;
        check_range(self.min_chunk_size, 50..=1024, ConfigError::InvalidMinChunkSize)?;
        check_range(self.overlap_size, 0..=512, ConfigError::InvalidOverlapSize)?;

        if self.max_chunk_size <= self.target_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                self.max_chunk_size,
                self.target_chunk_size,
            ));
        }
        if self.target_chunk_size <= self.min_chunk_size {
            return Err(ConfigError::TargetChunkSizeTooSmall(
                self.target_chunk_size,
                self.min_chunk_size,
            ));
        }
        Ok(())
    }
}
