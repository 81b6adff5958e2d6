use thiserror::Error;

/// Errors produced by the gdbmux session layer.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("process not running: {0}")]
    ProcessUnavailable(String),

    #[error("failed to spawn debugger: {0}")]
    Spawn(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type MuxResult<T> = Result<T, MuxError>;
