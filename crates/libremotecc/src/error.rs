use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("invalid session token")]
    Auth,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed client message: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn spawn(command: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RelayError::Spawn {
            command: command.into(),
            message: err.to_string(),
        }
    }

    /// Message safe to hand to remote clients.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Io(_) => "internal I/O error".to_string(),
            other => other.to_string(),
        }
    }
}
