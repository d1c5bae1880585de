//! Raw and typed responses

use crate::ApiError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Response exactly as the transport received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, keyed by lower-case name
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Create a response with no headers
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Check if the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Classify and decode into a typed response
    ///
    /// Non-2xx statuses become [`ApiError::Response`]; a body that does not
    /// deserialize into `T` becomes [`ApiError::Decode`]. An empty body decodes
    /// as JSON `null`, so `()` and `Option<_>` payloads work for 204 replies.
    pub fn into_api_response<T: DeserializeOwned>(self) -> Result<ApiResponse<T>, ApiError> {
        if !self.is_success() {
            return Err(self.into_error());
        }

        let payload = if self.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_slice(b"null")
        } else {
            serde_json::from_slice(&self.body)
        }
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(ApiResponse {
            status: self.status,
            success: true,
            headers: self.headers,
            payload,
        })
    }

    fn into_error(self) -> ApiError {
        #[derive(Deserialize)]
        struct ErrorBody {
            detail: serde_json::Value,
        }

        // FastAPI reports errors as {"detail": "..."}, validation errors as a list
        let detail = serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .map(|b| match b.detail {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });

        ApiError::Response {
            code: self.status,
            detail,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// Settled, successful API response
///
/// Only ever built once the transport has settled and the payload has been
/// decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T = serde_json::Value> {
    /// HTTP status code
    pub status: u16,
    /// Success classification (always true for a decoded response)
    pub success: bool,
    /// Response headers, keyed by lower-case name
    pub headers: BTreeMap<String, String>,
    /// Decoded payload
    pub payload: T,
}

impl<T> ApiResponse<T> {
    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Transform the payload, keeping status and headers
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            status: self.status,
            success: self.success,
            headers: self.headers,
            payload: f(self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_success() {
        let raw = RawResponse::new(200, br#"{"id": 1}"#.to_vec())
            .with_header("Content-Type", "application/json");

        let response: ApiResponse = raw.into_api_response().unwrap();
        assert_eq!(response.status, 200);
        assert!(response.success);
        assert_eq!(response.payload, json!({"id": 1}));
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_decode_typed_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Allocation {
            id: u32,
            name: String,
        }

        let raw = RawResponse::new(200, br#"{"id": 7, "name": "Rent"}"#.to_vec());
        let response: ApiResponse<Allocation> = raw.into_api_response().unwrap();
        assert_eq!(response.payload, Allocation { id: 7, name: "Rent".to_string() });
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        let response: ApiResponse<()> = RawResponse::new(204, Vec::new()).into_api_response().unwrap();
        assert_eq!(response.status, 204);

        let response: ApiResponse = RawResponse::new(200, Vec::new()).into_api_response().unwrap();
        assert_eq!(response.payload, serde_json::Value::Null);
    }

    #[test]
    fn test_decode_shape_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Me {
            #[allow(dead_code)]
            id: u32,
        }

        let err = RawResponse::new(200, br#"{"name": "x"}"#.to_vec())
            .into_api_response::<Me>()
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_error_status_extracts_detail() {
        let raw = RawResponse::new(401, br#"{"detail": "Invalid/expired access token"}"#.to_vec());
        let err = raw.into_api_response::<serde_json::Value>().unwrap_err();

        match err {
            ApiError::Response { code, detail, .. } => {
                assert_eq!(code, 401);
                assert_eq!(detail.as_deref(), Some("Invalid/expired access token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_status_without_json_body() {
        let err = RawResponse::new(500, b"Internal Server Error".to_vec())
            .into_api_response::<serde_json::Value>()
            .unwrap_err();

        assert_eq!(
            err,
            ApiError::Response {
                code: 500,
                detail: None,
                body: "Internal Server Error".to_string(),
            }
        );
    }

    #[test]
    fn test_map_payload() {
        let response: ApiResponse = RawResponse::new(200, b"[1,2,3]".to_vec()).into_api_response().unwrap();
        let mapped = response.map(|v| v.as_array().map(Vec::len).unwrap_or(0));
        assert_eq!(mapped.payload, 3);
        assert_eq!(mapped.status, 200);
    }
}
