// Configuration management module
// TOML settings for the embedding service, the vector index and the store

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, IndexBackend, OllamaConfig, StoreConfig, VectorIndexConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
