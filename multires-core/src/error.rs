//! Error types for multires-core

use thiserror::Error;

/// Main error type for forest construction and access
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("topology error: {0}")]
    Topology(String),
}

/// Result type alias for multires-core operations
pub type Result<T> = std::result::Result<T, Error>;
