use thiserror::Error;

/// Failures talking to the remote content store.
///
/// "Path does not exist" is not an error: lookups return `Ok(None)` for it.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The request never produced a response (DNS, TLS, timeout, ...)
    #[error("request to content store failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Credential missing, expired, or lacking access to the repository
    #[error("content store rejected credentials ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// The expected content hash did not match what the store holds
    #[error("conflicting write to {path}: {message}")]
    Conflict { path: String, message: String },

    /// Any other non-success response
    #[error("content store returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be understood
    #[error("unexpected content store response: {0}")]
    Decode(String),

    /// Anything that is not the remote's fault (bad URL construction etc.)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Transport(_) => "transport",
            StoreError::Unauthorized { .. } => "unauthorized",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Api { .. } => "api",
            StoreError::Decode(_) => "decode",
            StoreError::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
