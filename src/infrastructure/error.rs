use crate::domain::timer::TimerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Please sign in to delete or edit synced sessions.")]
    SignInRequired,
    #[error("session not found at index {0}")]
    SessionNotFound(usize),
    #[error("Invalid session: {0}")]
    InvalidSession(String),
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error("runtime error: {0}")]
    Runtime(String),
}
