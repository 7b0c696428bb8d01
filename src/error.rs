use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IndexerError {
    #[error("invalid contig name (expected <prefix>_<index>): {0}")]
    InvalidContigName(String),

    #[error("unknown annotation category: {0}")]
    InvalidCategory(String),

    #[error("missing config file contig-indexer.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("range request failed: {0}")]
    Network(String),

    #[error("remote source returned status {status}: {message}")]
    NetworkStatus { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("parser worker failed: {0}")]
    Worker(String),

    #[error("import is not in a startable state: {0}")]
    InvalidState(String),

    #[error("import cancelled")]
    Cancelled,
}

impl IndexerError {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            IndexerError::Network(_) | IndexerError::NetworkStatus { .. }
        )
    }
}

impl From<rusqlite::Error> for IndexerError {
    fn from(err: rusqlite::Error) -> Self {
        IndexerError::Storage(err.to_string())
    }
}
