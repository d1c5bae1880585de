//! Budget API client library
//!
//! This crate provides the data-access layer used by the budget front-end:
//! request descriptors, typed responses, bearer tokens, a pluggable transport
//! (reqwest or a deterministic mock), the stateful [`ApiHook`] that ties them
//! together, and an OAuth2 session that obtains and refreshes tokens.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod hook;
pub mod mock;
pub mod request;
pub mod response;
pub mod retry;
pub mod token;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use auth::{
    AuthContext, AuthError, Credentials, MemoryTokenStore, OAuthSession, SessionCallback, SessionEvent,
    StoreError, TokenStore,
};
pub use hook::{use_api, ApiConfig, ApiHook, ApiHookBuilder, CallState};
pub use mock::{mock_fetch, Fixture, MockError, MockRequest, MockResponse, MockTransport, Reuse};
pub use retry::{retry, retry_api, RetryConfig};
pub use request::{DescriptorError, Method, RequestDescriptor};
pub use response::{ApiResponse, RawResponse};
pub use token::{ApiToken, SharedToken, TokenGrant, TokenProvider};
pub use transport::{HttpTransport, OutgoingRequest, Transport, TransportError};

/// Result type for API calls
pub type Result<T> = std::result::Result<T, ApiError>;

/// Failure of a settled API call
///
/// Every variant is delivered to the caller as [`CallState::Failed`]; the hook
/// never panics or drops a failure on the floor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connectivity-level failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Server answered with a non-success status
    #[error("Request failed with status {code}{}", detail_suffix(.detail))]
    Response {
        /// HTTP status code
        code: u16,
        /// `detail` field of the error body, when the server sent one
        detail: Option<String>,
        /// Raw error body
        body: String,
    },

    /// Payload did not match the expected shape
    #[error("Failed to decode response payload: {0}")]
    Decode(String),

    /// Mock transport had no fixture for the request
    #[error("No mock fixture matches {method} {path}")]
    UnmatchedMockRequest {
        /// Request method
        method: Method,
        /// Request path
        path: String,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

impl ApiError {
    /// Status code of a `Response` error
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Response { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a caller-level retry could plausibly succeed
    ///
    /// Transport failures and 408/425/429/5xx responses are retryable. A gap in
    /// the mock fixtures never is.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(err) => err.is_retryable(),
            ApiError::Response { code, .. } => matches!(code, 408 | 425 | 429 | 500..=599),
            ApiError::Decode(_) | ApiError::UnmatchedMockRequest { .. } => false,
        }
    }

    /// Whether the server rejected the credentials or token
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UnmatchedMock { method, path } => {
                ApiError::UnmatchedMockRequest { method, path }
            }
            other => ApiError::Transport(other),
        }
    }
}
