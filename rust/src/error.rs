use thiserror::Error;

/// Failures of the local credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of calls against the Terra backend.
///
/// `NoCredential` and `SessionExpired` are the two variants that route the
/// user back to the login screen; everything else is a per-request failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no stored credential")]
    NoCredential,
    #[error("token refresh rejected (status {status})")]
    RefreshFailed { status: u16 },
    #[error("session expired")]
    SessionExpired,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response status {status}")]
    Status { status: u16 },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("credential storage: {0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::NoCredential | ApiError::SessionExpired)
    }
}
