use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Short cookie: received {received} of {expected} bytes")]
    ShortCookie { received: usize, expected: usize },

    #[error("Data channel error: {0}")]
    DataChannel(String),

    #[error("Parameter length {declared} exceeds buffer capacity {capacity}")]
    ParamsTooLarge { declared: u32, capacity: usize },

    #[error("Result length {declared} exceeds buffer capacity {capacity}")]
    ResultTooLarge { declared: u32, capacity: usize },

    #[error("Client terminated the test")]
    ClientTerminated,

    #[error("Test exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl Error {
    /// Whether this error ends only the current session.
    ///
    /// Configuration errors are raised before any client is served and are
    /// the only ones the server loop does not recover from.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
