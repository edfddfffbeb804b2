//! Error types for the relock gate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<keyring::Error> for GateError {
    fn from(e: keyring::Error) -> Self {
        GateError::Keyring(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
