// Credential lifecycle: restore, login, refresh-on-401, logout.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::error::{ApiError, StoreError};
use crate::store::{KeyValueStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

// Never print tokens.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    LoggedIn,
}

#[derive(Default, Clone)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    access_token: String,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// Owns the single credential of this installation.
///
/// The in-memory copy mirrors the store and is replaced wholesale after every
/// successful write. Public operations never panic and never return a token
/// the store does not hold.
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    http: reqwest::Client,
    refresh_url: String,
    tokens: RwLock<Tokens>,
    // Holds the last access token whose refresh failed, so queued callers
    // rejected with that same token do not hit the backend again.
    refresh_gate: Mutex<Option<String>>,
    status: watch::Sender<SessionStatus>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>, http: reqwest::Client, base_url: &str) -> Self {
        let (status, _) = watch::channel(SessionStatus::LoggedOut);
        Self {
            inner: Arc::new(Inner {
                store,
                http,
                refresh_url: format!("{}/auth/refresh", base_url.trim_end_matches('/')),
                tokens: RwLock::new(Tokens::default()),
                refresh_gate: Mutex::new(None),
                status,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.tokens().access
    }

    /// Load the persisted credential. No network call.
    pub fn restore_session(&self) -> Option<Credential> {
        let read = |key: &str| match self.inner.store.get(key) {
            Ok(v) => v.filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::warn!(%e, key, "failed to read credential store");
                None
            }
        };
        let tokens = Tokens {
            access: read(ACCESS_TOKEN_KEY),
            refresh: read(REFRESH_TOKEN_KEY),
        };
        let credential = tokens.access.clone().map(|access_token| Credential {
            access_token,
            refresh_token: tokens.refresh.clone(),
        });
        tracing::info!(logged_in = credential.is_some(), "session restored");
        self.inner.replace_tokens(tokens);
        credential
    }

    pub fn complete_login(&self, access_token: &str, refresh_token: &str) -> Result<(), StoreError> {
        self.inner.store.set_many(&[
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
        ])?;
        self.inner.replace_tokens(Tokens {
            access: Some(access_token.to_string()),
            refresh: Some(refresh_token.to_string()),
        });
        tracing::info!("login completed");
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Must be called from within a tokio runtime. The exchange runs as its
    /// own task: dropping the returned future does not stop a rotated token
    /// pair from being persisted.
    pub async fn refresh(&self) -> bool {
        let inner = self.inner.clone();
        join_refresh(tokio::spawn(async move { inner.refresh().await })).await
    }

    /// Refresh after the backend rejected `rejected_access_token`.
    ///
    /// Concurrent callers rejected with the same token share one exchange:
    /// whoever holds the gate first talks to the backend, the rest observe
    /// its result. Like [`SessionManager::refresh`], the exchange outlives a
    /// cancelled caller and keeps the gate until it finishes.
    pub async fn refresh_after_rejection(&self, rejected_access_token: &str) -> bool {
        let inner = self.inner.clone();
        let rejected = rejected_access_token.to_string();
        join_refresh(tokio::spawn(async move {
            inner.refresh_after_rejection(&rejected).await
        }))
        .await
    }

    /// Forget the credential. Safe to call when already logged out.
    pub fn logout(&self) {
        if let Err(e) = self
            .inner
            .store
            .remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
        {
            tracing::warn!(%e, "failed to clear credential store");
        }
        self.inner.replace_tokens(Tokens::default());
        tracing::info!("logged out");
    }
}

async fn join_refresh(task: tokio::task::JoinHandle<bool>) -> bool {
    match task.await {
        Ok(refreshed) => refreshed,
        Err(e) => {
            tracing::error!(%e, "token refresh task did not complete");
            false
        }
    }
}

impl Inner {
    fn tokens(&self) -> Tokens {
        match self.tokens.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn replace_tokens(&self, next: Tokens) {
        let status = if next.access.is_some() {
            SessionStatus::LoggedIn
        } else {
            SessionStatus::LoggedOut
        };
        match self.tokens.write() {
            Ok(mut g) => *g = next,
            Err(poison) => *poison.into_inner() = next,
        }
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    async fn refresh(&self) -> bool {
        let mut gate = self.refresh_gate.lock().await;
        let rejected = self.tokens().access;
        match self.refresh_locked().await {
            Ok(_) => {
                *gate = None;
                true
            }
            Err(e) => {
                tracing::warn!(%e, "token refresh failed");
                if !matches!(e, ApiError::NoCredential) {
                    *gate = rejected;
                }
                false
            }
        }
    }

    async fn refresh_after_rejection(&self, rejected_access_token: &str) -> bool {
        let mut gate = self.refresh_gate.lock().await;

        match self.tokens().access {
            Some(current) if current != rejected_access_token => {
                tracing::debug!("access token already rotated by a concurrent refresh");
                return true;
            }
            None => return false,
            Some(_) => {}
        }
        if gate.as_deref() == Some(rejected_access_token) {
            tracing::debug!("refresh already failed for this access token");
            return false;
        }

        match self.refresh_locked().await {
            Ok(_) => {
                *gate = None;
                true
            }
            Err(e) => {
                tracing::warn!(%e, "token refresh failed");
                *gate = Some(rejected_access_token.to_string());
                false
            }
        }
    }

    // Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<Credential, ApiError> {
        let Some(refresh_token) = self.tokens().refresh else {
            return Err(ApiError::NoCredential);
        };

        tracing::info!("refreshing access token");
        let resp = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::RefreshFailed {
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await?;
        let body: RefreshResponse = serde_json::from_slice(&bytes)?;
        if body.access_token.is_empty() {
            return Err(ApiError::RefreshFailed {
                status: status.as_u16(),
            });
        }

        let rotated = body.refresh_token.filter(|t| !t.is_empty());
        let next_refresh = rotated.clone().unwrap_or(refresh_token);
        self.store.set_many(&[
            (ACCESS_TOKEN_KEY, body.access_token.as_str()),
            (REFRESH_TOKEN_KEY, next_refresh.as_str()),
        ])?;
        self.replace_tokens(Tokens {
            access: Some(body.access_token.clone()),
            refresh: Some(next_refresh.clone()),
        });
        tracing::info!(rotated_refresh_token = rotated.is_some(), "access token refreshed");

        Ok(Credential {
            access_token: body.access_token,
            refresh_token: Some(next_refresh),
        })
    }
}
