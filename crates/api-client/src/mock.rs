//! Deterministic mock transport
//!
//! [`mock_fetch`] builds a [`MockTransport`] from a list of [`Fixture`]s. Each
//! fixture pairs a [`MockRequest`] matcher with a canned [`MockResponse`].
//!
//! Matching rules:
//! - method and path must match exactly
//! - if the fixture has a body matcher, the body must match too
//! - the first registered fixture that still has uses left wins
//! - no match fails loudly with [`TransportError::UnmatchedMock`]
//!
//! Fixtures are single-use unless they say otherwise through [`Reuse`], so
//! tests can assert exact call counts. Every request the transport sees is
//! captured for later inspection.
//!
//! # Example
//!
//! ```rust
//! use api_client::{mock_fetch, ApiHook, CallState, Fixture, MockRequest, MockResponse, RequestDescriptor};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = mock_fetch([Fixture::new(
//!     MockRequest::get("/me"),
//!     MockResponse::json(200, &json!({"id": 1})),
//! )])?;
//!
//! let api: ApiHook = ApiHook::builder().transport(transport.clone()).build()?;
//! let state = api.call(RequestDescriptor::get("/me").build()?).await;
//! assert!(matches!(state, CallState::Succeeded(_)));
//! assert_eq!(transport.received().len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::request::Method;
use crate::response::RawResponse;
use crate::transport::{OutgoingRequest, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Fixture rejected at registration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    /// Fixture is malformed
    #[error("Invalid fixture {method} {path}: {reason}")]
    InvalidFixture {
        /// Fixture method
        method: Method,
        /// Fixture path
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// Fixture reply body could not be serialized
    #[error("Failed to serialize fixture body: {0}")]
    Body(String),
}

/// How a fixture's request body is compared
#[derive(Debug, Clone, PartialEq)]
pub enum BodyMatcher {
    /// Byte-for-byte equality
    Exact(Vec<u8>),
    /// Incoming body parses as JSON equal to this value
    Json(serde_json::Value),
}

impl BodyMatcher {
    fn matches(&self, body: Option<&[u8]>) -> bool {
        match self {
            BodyMatcher::Exact(expected) => body == Some(expected.as_slice()),
            BodyMatcher::Json(expected) => body
                .and_then(|b| serde_json::from_slice::<serde_json::Value>(b).ok())
                .is_some_and(|actual| &actual == expected),
        }
    }
}

/// Request side of a fixture
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    /// Expected method
    pub method: Method,
    /// Expected path (exact, no query)
    pub path: String,
    /// Optional body matcher
    pub body: Option<BodyMatcher>,
}

impl MockRequest {
    /// Match `method` and `path`, any body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Match a GET
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Match a POST
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Match a PUT
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// Match a DELETE
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Require the body to equal `body` exactly
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(BodyMatcher::Exact(body.into()));
        self
    }

    /// Require the body to be JSON equal to `value`
    pub fn with_json_body(mut self, value: serde_json::Value) -> Self {
        self.body = Some(BodyMatcher::Json(value));
        self
    }

    fn matches(&self, request: &OutgoingRequest) -> bool {
        self.method == request.method()
            && self.path == request.path()
            && self
                .body
                .as_ref()
                .map_or(true, |matcher| matcher.matches(request.descriptor.body()))
    }
}

/// Outcome side of a fixture
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// Reply with a response
    Reply(RawResponse),
    /// Fail as if the network did
    Fail(TransportError),
    /// JSON payload that could not be serialized; rejected at registration
    Unserializable(String),
}

impl MockResponse {
    /// Reply with a JSON body
    ///
    /// Serialization failures are deferred to registration, where they
    /// surface as [`MockError::Body`].
    pub fn json<T: Serialize + ?Sized>(status: u16, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => MockResponse::Reply(
                RawResponse::new(status, body).with_header("content-type", "application/json"),
            ),
            Err(e) => MockResponse::Unserializable(e.to_string()),
        }
    }

    /// Reply with a status and empty body
    pub fn status(status: u16) -> Self {
        MockResponse::Reply(RawResponse::new(status, Vec::new()))
    }

    /// Reply with a plain-text body
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        MockResponse::Reply(
            RawResponse::new(status, body.into().into_bytes())
                .with_header("content-type", "text/plain"),
        )
    }

    /// Simulate a connectivity failure
    pub fn fail(error: TransportError) -> Self {
        MockResponse::Fail(error)
    }
}

/// How many times a fixture may be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reuse {
    /// Exactly once
    #[default]
    Once,
    /// Up to `n` times
    Times(usize),
    /// Any number of times
    Always,
}

/// Request matcher paired with its canned outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    /// Request matcher
    pub request: MockRequest,
    /// Outcome when matched
    pub response: MockResponse,
    /// Reuse policy
    pub reuse: Reuse,
    /// Simulated latency before settling
    pub delay: Option<Duration>,
}

impl Fixture {
    /// Single-use fixture with no latency
    pub fn new(request: MockRequest, response: MockResponse) -> Self {
        Self {
            request,
            response,
            reuse: Reuse::Once,
            delay: None,
        }
    }

    /// Allow unlimited matches
    pub fn reusable(mut self) -> Self {
        self.reuse = Reuse::Always;
        self
    }

    /// Allow up to `n` matches
    pub fn times(mut self, n: usize) -> Self {
        self.reuse = Reuse::Times(n);
        self
    }

    /// Settle only after `delay`
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn validate(&self) -> Result<(), MockError> {
        let invalid = |reason: &str| MockError::InvalidFixture {
            method: self.request.method,
            path: self.request.path.clone(),
            reason: reason.to_string(),
        };

        if !self.request.path.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }
        if self.request.path.contains('?') {
            return Err(invalid("path must not contain a query string"));
        }
        if self.reuse == Reuse::Times(0) {
            return Err(invalid("Times(0) can never match"));
        }
        match &self.response {
            MockResponse::Reply(raw) if !(100..=599).contains(&raw.status) => {
                Err(invalid("status must be in 100..=599"))
            }
            MockResponse::Unserializable(msg) => Err(MockError::Body(msg.clone())),
            MockResponse::Fail(TransportError::UnmatchedMock { .. }) => {
                Err(invalid("a fixture cannot simulate an unmatched request"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Slot {
    fixture: Fixture,
    used: usize,
}

impl Slot {
    fn has_uses_left(&self) -> bool {
        match self.fixture.reuse {
            Reuse::Once => self.used == 0,
            Reuse::Times(n) => self.used < n,
            Reuse::Always => true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    slots: Vec<Slot>,
    received: Vec<OutgoingRequest>,
}

/// Transport that answers from registered fixtures
///
/// Clones share fixtures and captured requests, so a test can keep a handle
/// while the hook owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Build a mock transport from fixtures, validating each one
pub fn mock_fetch(fixtures: impl IntoIterator<Item = Fixture>) -> Result<MockTransport, MockError> {
    let transport = MockTransport::new();
    for fixture in fixtures {
        transport.register(fixture)?;
    }
    Ok(transport)
}

impl MockTransport {
    /// Create a transport with no fixtures
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more fixture after those already present
    pub fn register(&self, fixture: Fixture) -> Result<(), MockError> {
        fixture.validate()?;
        self.state.lock().slots.push(Slot { fixture, used: 0 });
        Ok(())
    }

    /// Every request received so far, in arrival order
    pub fn received(&self) -> Vec<OutgoingRequest> {
        self.state.lock().received.clone()
    }

    /// Most recent request received
    pub fn last_request(&self) -> Option<OutgoingRequest> {
        self.state.lock().received.last().cloned()
    }

    /// Number of received requests for `method` and `path`, matched or not
    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.state
            .lock()
            .received
            .iter()
            .filter(|r| r.method() == method && r.path() == path)
            .count()
    }

    /// Fixtures that were expected but never (fully) used
    ///
    /// Single-use and `Times(n)` fixtures count until exhausted; reusable
    /// fixtures count until matched once.
    pub fn unconsumed(&self) -> Vec<MockRequest> {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| match slot.fixture.reuse {
                Reuse::Always => slot.used == 0,
                _ => slot.has_uses_left(),
            })
            .map(|slot| slot.fixture.request.clone())
            .collect()
    }

    /// Drop all fixtures and captured requests
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.received.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let matched = {
            let mut state = self.state.lock();
            state.received.push(request.clone());

            state
                .slots
                .iter_mut()
                .find(|slot| slot.has_uses_left() && slot.fixture.request.matches(&request))
                .map(|slot| {
                    slot.used += 1;
                    (slot.fixture.response.clone(), slot.fixture.delay)
                })
        };

        let Some((response, delay)) = matched else {
            tracing::warn!(method = %request.method(), path = request.path(), "no mock fixture matches request");
            return Err(TransportError::UnmatchedMock {
                method: request.method(),
                path: request.path().to_string(),
            });
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match response {
            MockResponse::Reply(raw) => Ok(raw),
            MockResponse::Fail(err) => Err(err),
            // only reachable through a fixture that bypassed registration
            MockResponse::Unserializable(msg) => Err(TransportError::Build(msg)),
        }
    }
}
