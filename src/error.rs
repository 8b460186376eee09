use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Already running")]
    AlreadyRunning,

    #[error("Not running")]
    NotRunning,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Runtime not initialized (call vidrelay::runtime::initialize first)")]
    NotInitialized,

    #[error("Failed to open {locator}: {reason}")]
    OpenFailed { locator: String, reason: String },

    #[error("Connection lost [{url}] after {attempts} reconnect attempts")]
    ConnectionLost { url: String, attempts: u32 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Device-to-host transfer failed: {0}")]
    Transfer(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Worker thread panicked: {0}")]
    WorkerPanic(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Per-iteration failures that worker loops log and move past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::Encode(_)
                | Error::Transfer(_)
                | Error::Transport(_)
                | Error::InvalidFrame(_)
                | Error::Timeout(_)
        )
    }

    pub(crate) fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Error::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
