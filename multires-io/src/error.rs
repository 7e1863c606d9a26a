//! Error types for forest persistence

use thiserror::Error;

/// Errors that can occur while reading or writing forests
#[derive(Error, Debug)]
pub enum IoError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Version mismatch: file is {found_major}.{found_minor}, reader supports {expected_major}.{expected_minor}")]
    VersionMismatch {
        found_major: u32,
        found_minor: u32,
        expected_major: u32,
        expected_minor: u32,
    },

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Forest error: {0}")]
    Forest(#[from] multires_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
