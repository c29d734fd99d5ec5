use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid collection title: {0}")]
    InvalidTitle(String),

    #[error("Vector index refused to create collection: {0}")]
    CollectionRejected(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod http;
pub mod metadata;
pub mod models;
pub mod routing;
pub mod store;
pub mod vector_index;
