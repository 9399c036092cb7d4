//! Error types shared by the execution core and the repositories.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("chain not found: {0}")]
    ChainNotFound(String),

    #[error("chain already exists: {0}")]
    ChainExists(String),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl ExecError {
    pub fn missing_value() -> Self {
        ExecError::InvalidInput("value must be provided".to_string())
    }
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
