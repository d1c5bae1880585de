//! The API hook
//!
//! [`ApiHook`] is the stateful client a UI component (or any other consuming
//! unit) binds to. It reads the current token, derives the outgoing request,
//! hands it to the bound [`Transport`], and classifies the outcome into a
//! [`CallState`] that is both returned and published for observers.
//!
//! # State
//!
//! Each call walks `Idle → Pending → Succeeded | Failed`. Calls are not
//! serialized or coalesced. Every call gets a sequence id, and the observable
//! state only takes settlements from the most recently issued call; an older
//! call that settles late still returns its own result to its caller but
//! leaves the published state alone.
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::{use_api, ApiConfig, ApiToken, CallState, RequestDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = use_api(ApiConfig::new("http://localhost:8000"))?;
//!     api.set_token(ApiToken::new("access-token"));
//!
//!     let request = RequestDescriptor::get("/transaction/").param("query", "rent").build()?;
//!     if let CallState::Failed(err) = api.call(request).await {
//!         eprintln!("request failed: {err}");
//!     }
//!     if let Some(response) = api.state().response() {
//!         println!("{}", response.payload);
//!     }
//!     Ok(())
//! }
//! ```

use crate::request::{validate_header, RequestDescriptor};
use crate::response::ApiResponse;
use crate::token::{ApiToken, SharedToken, TokenProvider};
use crate::transport::{HttpTransport, OutgoingRequest, Transport, TransportError};
use crate::ApiError;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default backend address (uvicorn's default port)
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Configuration for an [`ApiHook`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Base URL every path is joined onto
    pub base_url: String,
    /// Headers added to every request unless the descriptor sets them
    pub default_headers: BTreeMap<String, String>,
    /// Request timeout for the real transport
    pub timeout: Duration,
    /// User agent for the real transport
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
            user_agent: format!("budget-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    /// Create a config with a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a default header
    ///
    /// `authorization` is reserved for the bound token and is dropped when
    /// the hook is built.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Join the base URL with a descriptor's path and query
    pub fn resolve_url(&self, descriptor: &RequestDescriptor) -> String {
        let mut url = format!("{}{}", self.base_url.trim_end_matches('/'), descriptor.path());
        if !descriptor.query().is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(descriptor.query())
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

/// Observable state of an [`ApiHook`]
#[derive(Debug, Clone, PartialEq)]
pub enum CallState<T = serde_json::Value> {
    /// No call issued yet (or state was reset)
    Idle,
    /// Latest call has not settled
    Pending,
    /// Latest call settled with a decoded response
    Succeeded(ApiResponse<T>),
    /// Latest call settled with an error
    Failed(ApiError),
}

impl<T> CallState<T> {
    /// No call issued
    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    /// Waiting on the transport
    pub fn is_pending(&self) -> bool {
        matches!(self, CallState::Pending)
    }

    /// Succeeded or failed
    pub fn is_settled(&self) -> bool {
        matches!(self, CallState::Succeeded(_) | CallState::Failed(_))
    }

    /// Response, if succeeded
    pub fn response(&self) -> Option<&ApiResponse<T>> {
        match self {
            CallState::Succeeded(response) => Some(response),
            _ => None,
        }
    }

    /// Error, if failed
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            CallState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Convert a settled state into a `Result`
    ///
    /// Returns `None` for `Idle` and `Pending`.
    pub fn into_result(self) -> Option<crate::Result<ApiResponse<T>>> {
        match self {
            CallState::Succeeded(response) => Some(Ok(response)),
            CallState::Failed(err) => Some(Err(err)),
            CallState::Idle | CallState::Pending => None,
        }
    }
}

impl<T> From<crate::Result<ApiResponse<T>>> for CallState<T> {
    fn from(outcome: crate::Result<ApiResponse<T>>) -> Self {
        match outcome {
            Ok(response) => CallState::Succeeded(response),
            Err(err) => CallState::Failed(err),
        }
    }
}

struct HookInner<T> {
    config: ApiConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    state: watch::Sender<CallState<T>>,
    // latest issued sequence id; guards publication of settlements
    latest: Mutex<u64>,
}

/// Stateful API client bound to one consumer
///
/// Cheap to clone; clones share state, token binding and transport.
pub struct ApiHook<T = serde_json::Value> {
    inner: Arc<HookInner<T>>,
    // only set when the hook owns its token slot
    own_tokens: Option<SharedToken>,
}

impl<T> Clone for ApiHook<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            own_tokens: self.own_tokens.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ApiHook<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiHook")
            .field("config", &self.inner.config)
            .field("latest", &*self.inner.latest.lock())
            .finish_non_exhaustive()
    }
}

/// Create a hook bound to the real network transport
pub fn use_api(config: ApiConfig) -> Result<ApiHook, TransportError> {
    ApiHook::builder().config(config).build()
}

impl<T> ApiHook<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start building a hook
    pub fn builder() -> ApiHookBuilder<T> {
        ApiHookBuilder {
            config: ApiConfig::default(),
            transport: None,
            tokens: None,
            initial_token: None,
            _payload: PhantomData,
        }
    }

    /// Issue a call using the bound token
    ///
    /// Always returns a settled state. The token is read once, here; replacing
    /// it while the call is in flight does not change what was sent.
    pub async fn call(&self, descriptor: RequestDescriptor) -> CallState<T> {
        let token = self.inner.tokens.current_token();
        self.dispatch(descriptor, token).await.into()
    }

    /// Issue a call with an explicit token instead of the bound one
    pub async fn call_with_token(&self, descriptor: RequestDescriptor, token: ApiToken) -> CallState<T> {
        self.dispatch(descriptor, Some(token)).await.into()
    }

    /// Issue a call and return its outcome as a `Result`
    ///
    /// Publishes state exactly like [`ApiHook::call`].
    pub async fn fetch(&self, descriptor: RequestDescriptor) -> crate::Result<ApiResponse<T>> {
        let token = self.inner.tokens.current_token();
        self.dispatch(descriptor, token).await
    }

    async fn dispatch(
        &self,
        descriptor: RequestDescriptor,
        token: Option<ApiToken>,
    ) -> crate::Result<ApiResponse<T>> {
        let sequence = self.begin();
        let request = self.prepare(&descriptor, token.as_ref());

        tracing::debug!(
            sequence,
            method = %request.method(),
            path = request.path(),
            authenticated = request.header("authorization").is_some(),
            "dispatching call"
        );

        let outcome = match self.inner.transport.send(request).await {
            Ok(raw) => raw.into_api_response::<T>(),
            Err(err) => Err(ApiError::from(err)),
        };

        if let Err(err) = &outcome {
            tracing::debug!(sequence, error = %err, "call failed");
        }

        self.settle(sequence, &outcome);
        outcome
    }

    /// Derive the outgoing request: descriptor headers win over the auth
    /// header, which wins over config defaults
    fn prepare(&self, descriptor: &RequestDescriptor, token: Option<&ApiToken>) -> OutgoingRequest {
        let authorization = token.and_then(|token| {
            if token.is_usable_at(Utc::now()) {
                Some(token.authorization_header())
            } else {
                tracing::debug!("token missing or expired, sending without authorization");
                None
            }
        });

        let derived = descriptor
            .with_fallback_headers(authorization.as_deref().map(|value| ("authorization", value)))
            .with_fallback_headers(
                self.inner
                    .config
                    .default_headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );

        OutgoingRequest {
            url: self.inner.config.resolve_url(&derived),
            descriptor: derived,
        }
    }
}

impl<T> ApiHook<T> {
    fn begin(&self) -> u64 {
        let mut latest = self.inner.latest.lock();
        *latest += 1;
        self.inner.state.send_replace(CallState::Pending);
        *latest
    }

    fn settle(&self, sequence: u64, outcome: &crate::Result<ApiResponse<T>>)
    where
        T: Clone,
    {
        let latest = self.inner.latest.lock();
        if *latest == sequence {
            self.inner.state.send_replace(outcome.clone().into());
        } else {
            tracing::debug!(sequence, latest = *latest, "discarding stale settlement");
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> CallState<T>
    where
        T: Clone,
    {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<CallState<T>> {
        self.inner.state.subscribe()
    }

    /// Return to `Idle`; in-flight calls will no longer publish
    pub fn reset(&self) {
        let mut latest = self.inner.latest.lock();
        *latest += 1;
        self.inner.state.send_replace(CallState::Idle);
    }

    /// Sequence id of the most recently issued call
    pub fn last_sequence(&self) -> u64 {
        *self.inner.latest.lock()
    }

    /// Hook configuration
    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// Replace the token of a hook that owns its token slot
    ///
    /// Hooks bound to an external provider (see
    /// [`ApiHookBuilder::token_provider`]) ignore this; rotate the token in
    /// the provider instead.
    pub fn set_token(&self, token: ApiToken) {
        match &self.own_tokens {
            Some(slot) => slot.set(token),
            None => tracing::warn!("set_token ignored: hook is bound to an external token provider"),
        }
    }

    /// Clear the token of a hook that owns its token slot
    pub fn clear_token(&self) {
        if let Some(slot) = &self.own_tokens {
            slot.clear();
        }
    }

    /// Token the next call would read
    pub fn current_token(&self) -> Option<ApiToken> {
        self.inner.tokens.current_token()
    }
}

/// Builder for [`ApiHook`]
pub struct ApiHookBuilder<T = serde_json::Value> {
    config: ApiConfig,
    transport: Option<Arc<dyn Transport>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    initial_token: Option<ApiToken>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> ApiHookBuilder<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Use this configuration
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the base URL
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Bind a transport (defaults to [`HttpTransport`])
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Read tokens from an external provider, such as an auth session
    pub fn token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(provider));
        self.initial_token = None;
        self
    }

    /// Start with a token in the hook's own slot
    pub fn token(mut self, token: ApiToken) -> Self {
        self.tokens = None;
        self.initial_token = Some(token);
        self
    }

    /// Build the hook
    ///
    /// Fails if the base URL is not a URL, a default header is malformed, or
    /// the default transport cannot be constructed.
    pub fn build(mut self) -> Result<ApiHook<T>, TransportError> {
        url::Url::parse(&self.config.base_url)
            .map_err(|e| TransportError::Build(format!("invalid base URL {:?}: {e}", self.config.base_url)))?;

        for (name, value) in &self.config.default_headers {
            validate_header(name, value).map_err(|e| TransportError::Build(e.to_string()))?;
        }
        if self.config.default_headers.remove("authorization").is_some() {
            tracing::warn!("ignoring default authorization header; bind a token instead");
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.timeout, &self.config.user_agent)?),
        };

        let (tokens, own_tokens): (Arc<dyn TokenProvider>, Option<SharedToken>) = match self.tokens {
            Some(provider) => (provider, None),
            None => {
                let slot = SharedToken::new();
                if let Some(token) = self.initial_token {
                    slot.set(token);
                }
                (Arc::new(slot.clone()), Some(slot))
            }
        };

        let (state, _) = watch::channel(CallState::Idle);

        Ok(ApiHook {
            inner: Arc::new(HookInner {
                config: self.config,
                transport,
                tokens,
                state,
                latest: Mutex::new(0),
            }),
            own_tokens,
        })
    }
}
