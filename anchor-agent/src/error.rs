use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    // Session errors
    SessionExpired,
    RefreshFailed(String),

    // Key / signing errors, always fatal, never retried
    InvalidKey(String),
    SigningFailed(String),

    // Storage errors
    StorageError(String),

    // Network errors
    NetworkError(String),

    // Generic errors
    InvalidRequest(String),
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SessionExpired => write!(f, "session expired"),
            Error::RefreshFailed(msg) => write!(f, "token refresh failed: {}", msg),
            Error::InvalidKey(msg) => write!(f, "invalid key material: {}", msg),
            Error::SigningFailed(msg) => write!(f, "signing failed: {}", msg),
            Error::StorageError(msg) => write!(f, "storage error: {}", msg),
            Error::NetworkError(msg) => write!(f, "network error: {}", msg),
            Error::InvalidRequest(msg) => write!(f, "invalid_request: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
