//! Pluggable transports
//!
//! The hook depends only on the [`Transport`] trait. Production code binds
//! [`HttpTransport`]; tests bind [`crate::mock::MockTransport`].

mod http;

pub use http::HttpTransport;

use crate::request::{Method, RequestDescriptor};
use crate::response::RawResponse;
use async_trait::async_trait;
use thiserror::Error;

/// Connectivity-level transport failure
///
/// A non-2xx status is not a transport failure; transports return it as a
/// [`RawResponse`] and the hook classifies it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach the server (DNS, refused connection, TLS)
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Request was aborted before it settled
    #[error("Request aborted: {0}")]
    Aborted(String),

    /// Any other failure while sending or reading the response
    #[error("Request failed: {0}")]
    Request(String),

    /// Transport could not be constructed
    #[error("Failed to build transport: {0}")]
    Build(String),

    /// Mock transport has no fixture for the request
    #[error("No mock fixture matches {method} {path}")]
    UnmatchedMock {
        /// Request method
        method: Method,
        /// Request path
        path: String,
    },
}

impl TransportError {
    /// Whether repeating the request could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout | TransportError::Request(_)
        )
    }
}

/// Request as handed to a transport
///
/// `descriptor` is the caller's descriptor with default and auth headers
/// filled in; `url` is the base URL joined with the descriptor's path and
/// query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// Fully resolved URL
    pub url: String,
    /// Descriptor with derived headers
    pub descriptor: RequestDescriptor,
}

impl OutgoingRequest {
    /// Request method
    pub fn method(&self) -> Method {
        self.descriptor.method()
    }

    /// Request path
    pub fn path(&self) -> &str {
        self.descriptor.path()
    }

    /// Look up a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.descriptor.header(name)
    }
}

/// Turns an outgoing request into a raw response
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform (or simulate) the request
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        (**self).send(request).await
    }
}
