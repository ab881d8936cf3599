use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("relay rejected the session token")]
    Auth,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed server message: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;
