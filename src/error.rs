//! Error types for matrix-modem-bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Matrix error: {0}")]
    Matrix(#[from] matrix_sdk::Error),

    #[error("Chat transport error: {0}")]
    Transport(String),

    #[error("Modem access error: {0}")]
    ModemAccess(String),

    #[error("Power error: {0}")]
    Power(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
