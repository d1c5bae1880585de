//! reqwest-backed transport

use super::{OutgoingRequest, Transport, TransportError};
use crate::response::RawResponse;
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use std::collections::BTreeMap;
use std::time::Duration;

/// Real network transport
///
/// Statuses are returned as data; only connectivity problems become
/// [`TransportError`]s. Timeouts are enforced here, not in the hook.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
}

impl HttpTransport {
    /// Create a transport with the given timeout and user agent
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn from_client(client: ReqwestClient) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let descriptor = &request.descriptor;

        let mut req = self.client.request(descriptor.method().into(), &request.url);
        for (name, value) in descriptor.headers() {
            req = req.header(name, value);
        }
        if let Some(body) = descriptor.body() {
            req = req.body(body.to_vec());
        }

        tracing::debug!(method = %descriptor.method(), url = %request.url, "sending request");

        let response = req.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        let mut headers = BTreeMap::new();
        for (key, value) in response.headers() {
            if let Ok(value_str) = value.to_str() {
                headers.insert(key.as_str().to_string(), value_str.to_string());
            }
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;

        tracing::debug!(status, bytes = body.len(), "response received");

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
