//! Authentication context
//!
//! The hook never logs in by itself; it asks a [`TokenProvider`] for the
//! token current at dispatch time. [`AuthContext`] extends that with the
//! operations that obtain and drop tokens, and [`OAuthSession`] implements it
//! against the backend's OAuth2 password flow (`POST /oauth2/token/`).
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::{ApiConfig, ApiHook, AuthContext, Credentials, OAuthSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApiConfig::new("http://localhost:8000");
//!     let session = Arc::new(OAuthSession::new(config.clone())?);
//!
//!     session
//!         .login(Credentials::new("alice@example.com", "hunter2").remember(true))
//!         .await?;
//!
//!     // Hooks read the session's token at dispatch time
//!     let api: ApiHook = ApiHook::builder().config(config).token_provider(session.clone()).build()?;
//!     # let _ = api;
//!     Ok(())
//! }
//! ```

use crate::hook::{ApiConfig, ApiHook};
use crate::request::RequestDescriptor;
use crate::response::ApiResponse;
use crate::token::{ApiToken, SharedToken, TokenGrant, TokenProvider};
use crate::transport::{HttpTransport, Transport, TransportError};
use crate::ApiError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// OAuth2 token endpoint
pub const TOKEN_PATH: &str = "/oauth2/token/";

/// Email/password pair used to obtain a token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account email (sent as the OAuth2 `username`)
    pub email: String,
    /// Account password
    pub password: String,
    /// Persist the resulting token through the session's [`TokenStore`]
    pub remember: bool,
}

impl Credentials {
    /// Create credentials that are not remembered
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember: false,
        }
    }

    /// Set the remember flag
    pub fn remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("remember", &self.remember)
            .finish()
    }
}

/// Session lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Token obtained from credentials
    Create,
    /// Token replaced by a refresh
    Update,
    /// Refresh token rejected; session cleared
    Expired,
    /// Session cleared by the user
    Logout,
}

/// Callback function type for session events
pub type SessionCallback = Arc<dyn Fn(SessionEvent, Option<&ApiToken>) + Send + Sync>;

/// Authentication failures outside a plain API call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No session, or the session carries no refresh token
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Token endpoint call failed
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Token store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backing storage could not be read or written
    #[error("Token store unavailable: {0}")]
    Unavailable(String),

    /// Stored data is not a token
    #[error("Stored token is corrupt: {0}")]
    Corrupt(String),
}

/// Persistence hook for remembered tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the persisted token, if any
    async fn load(&self) -> Result<Option<ApiToken>, StoreError>;

    /// Persist `token`, replacing any previous one
    async fn save(&self, token: &ApiToken) -> Result<(), StoreError>;

    /// Remove the persisted token
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local [`TokenStore`]
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<ApiToken>>>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Token currently persisted
    pub fn stored(&self) -> Option<ApiToken> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<ApiToken>, StoreError> {
        Ok(self.stored())
    }

    async fn save(&self, token: &ApiToken) -> Result<(), StoreError> {
        *self.slot.lock() = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// Source and sink of the token hooks attach
#[async_trait]
pub trait AuthContext: TokenProvider {
    /// Exchange credentials for a token
    async fn login(&self, credentials: Credentials) -> crate::Result<ApiResponse<TokenGrant>>;

    /// Drop the current token
    async fn logout(&self);
}

/// OAuth2 password-flow session against the budget backend
pub struct OAuthSession {
    client: ApiHook<TokenGrant>,
    token: SharedToken,
    store: Arc<dyn TokenStore>,
    remembered: AtomicBool,
    session_callback: RwLock<Option<SessionCallback>>,
    // refresh tokens are single-use; one exchange at a time
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for OAuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSession")
            .field("client", &self.client)
            .field("token", &self.token)
            .field("remembered", &self.remembered.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl OAuthSession {
    /// Create a session talking to the backend over HTTP
    pub fn new(config: ApiConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.timeout, &config.user_agent)?;
        Self::with_transport(config, transport)
    }

    /// Create a session over a specific transport
    pub fn with_transport(config: ApiConfig, transport: impl Transport + 'static) -> Result<Self, TransportError> {
        // token endpoint calls carry no bearer header
        let client = ApiHook::builder().config(config).transport(transport).build()?;

        Ok(Self {
            client,
            token: SharedToken::new(),
            store: Arc::new(MemoryTokenStore::new()),
            remembered: AtomicBool::new(false),
            session_callback: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Persist remembered tokens through `store`
    pub fn with_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.store = Arc::new(store);
        self
    }

    /// Set a callback for session events
    pub fn set_session_callback<F>(&self, callback: F)
    where
        F: Fn(SessionEvent, Option<&ApiToken>) + Send + Sync + 'static,
    {
        *self.session_callback.write() = Some(Arc::new(callback));
    }

    /// Slot holding the session's token, for binding hooks directly
    pub fn token_slot(&self) -> SharedToken {
        self.token.clone()
    }

    /// Whether a usable token is held
    pub fn is_authenticated(&self) -> bool {
        self.token.get().is_some_and(|token| token.is_usable_at(Utc::now()))
    }

    /// Exchange the refresh token for a new token pair
    ///
    /// A 401 from the token endpoint means the refresh token is spent or
    /// revoked; the session is cleared and [`SessionEvent::Expired`] fires.
    ///
    /// Concurrent refreshes run one after another, each with the refresh token
    /// current when its turn comes. An outcome is only applied if the session
    /// still holds the refresh token that was sent.
    pub async fn refresh(&self) -> Result<ApiResponse<TokenGrant>, AuthError> {
        let _exchange = self.refresh_lock.lock().await;

        let refresh_token = self.current_refresh_token().ok_or(AuthError::NoRefreshToken)?;
        let request = token_request([("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])?;
        let outcome = self.client.fetch(request).await;

        if self.current_refresh_token().as_deref() != Some(refresh_token.as_str()) {
            tracing::debug!("session changed during refresh, leaving it alone");
            return outcome.map_err(AuthError::from);
        }

        match outcome {
            Ok(response) => {
                let token = ApiToken::from(response.payload.clone());
                self.token.set(token.clone());
                if self.remembered.load(Ordering::SeqCst) {
                    self.persist(&token).await;
                }

                tracing::debug!("session refreshed");
                self.emit(SessionEvent::Update, Some(&token));
                Ok(response)
            }
            Err(err) if err.is_unauthorized() => {
                tracing::warn!("refresh token rejected, clearing session");
                self.token.clear();
                self.remembered.store(false, Ordering::SeqCst);
                self.forget().await;
                self.emit(SessionEvent::Expired, None);
                Err(err.into())
            }
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed");
                Err(err.into())
            }
        }
    }

    /// Load a remembered token from the store
    ///
    /// An expired token without a refresh token is discarded.
    pub async fn restore(&self) -> Result<Option<ApiToken>, StoreError> {
        let Some(token) = self.store.load().await? else {
            return Ok(None);
        };

        if !token.is_usable_at(Utc::now()) && token.refresh_token().is_none() {
            tracing::debug!("discarding expired stored token");
            self.forget().await;
            return Ok(None);
        }

        self.token.set(token.clone());
        self.remembered.store(true, Ordering::SeqCst);
        Ok(Some(token))
    }

    fn current_refresh_token(&self) -> Option<String> {
        self.token.get().and_then(|token| token.refresh_token().map(str::to_owned))
    }

    fn emit(&self, event: SessionEvent, token: Option<&ApiToken>) {
        let callback = self.session_callback.read().clone();
        if let Some(callback) = callback {
            callback(event, token);
        }
    }

    async fn persist(&self, token: &ApiToken) {
        if let Err(err) = self.store.save(token).await {
            tracing::warn!(error = %err, "failed to persist token");
        }
    }

    async fn forget(&self) {
        if let Err(err) = self.store.clear().await {
            tracing::warn!(error = %err, "failed to clear stored token");
        }
    }
}

fn token_request<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<RequestDescriptor, ApiError> {
    RequestDescriptor::post(TOKEN_PATH)
        .header("accept", crate::request::JSON_CONTENT_TYPE)
        .form(fields)
        .build()
        .map_err(|e| ApiError::Transport(TransportError::Build(e.to_string())))
}

impl TokenProvider for OAuthSession {
    fn current_token(&self) -> Option<ApiToken> {
        self.token.get()
    }
}

#[async_trait]
impl AuthContext for OAuthSession {
    async fn login(&self, credentials: Credentials) -> crate::Result<ApiResponse<TokenGrant>> {
        let request = token_request([
            ("grant_type", "password"),
            ("username", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
        ])?;

        let response = match self.client.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "login failed");
                return Err(err);
            }
        };

        let token = ApiToken::from(response.payload.clone());
        self.token.set(token.clone());
        self.remembered.store(credentials.remember, Ordering::SeqCst);
        if credentials.remember {
            self.persist(&token).await;
        } else {
            // an earlier remembered session must not come back on restore
            self.forget().await;
        }

        tracing::debug!(remember = credentials.remember, "session created");
        self.emit(SessionEvent::Create, Some(&token));
        Ok(response)
    }

    async fn logout(&self) {
        self.token.clear();
        self.remembered.store(false, Ordering::SeqCst);
        self.forget().await;
        self.emit(SessionEvent::Logout, None);
    }
}
