use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Service {resource} has no payment option")]
    MissingPaymentOption { resource: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Service {service_id} does not exist")]
    ForeignKey { service_id: i64 },

    #[error("Vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Failed to load embedding model: {0}")]
    ModelLoad(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by outer surfaces to pick a response class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, never retried
    Validation,
    /// Persistence failure, retry is the caller's choice
    Storage,
    /// Programmer or configuration error (FK, dimension mismatch)
    Integrity,
    /// The model or upstream could not serve the request
    Unavailable,
    Internal,
}

impl IndexError {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        match *self {
            IndexError::Validation(_)
            | IndexError::InvalidQuery(_)
            | IndexError::MissingPaymentOption { .. } => ErrorKind::Validation,
            IndexError::Storage(_) => ErrorKind::Storage,
            IndexError::ForeignKey { .. } | IndexError::DimensionMismatch { .. } => {
                ErrorKind::Integrity
            }
            IndexError::ModelLoad(_)
            | IndexError::Embedding(_)
            | IndexError::SearchUnavailable(_)
            | IndexError::Source(_) => ErrorKind::Unavailable,
            IndexError::Config(_) | IndexError::Io(_) | IndexError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the failure was caused by the caller's input
    #[inline]
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod ingest;
pub mod normalizer;
pub mod search;
