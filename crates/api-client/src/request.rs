//! Request descriptors
//!
//! A [`RequestDescriptor`] describes one API call: method, path, query,
//! headers and an optional body. Descriptors are built through
//! [`RequestBuilder`], validated once in [`RequestBuilder::build`], and are
//! immutable afterwards. The hook never edits a caller's descriptor; it derives
//! a new one when it attaches default and auth headers.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Content type used for JSON bodies
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type used for form bodies
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Malformed request descriptor
///
/// These are programmer errors, reported when the descriptor is built rather
/// than as a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Path was empty or not rooted at `/`
    #[error("Invalid path {0:?}: paths must start with '/'")]
    InvalidPath(String),

    /// Header name contains characters not allowed in HTTP header names
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    /// Header value contains control characters
    #[error("Invalid value for header {0:?}")]
    InvalidHeaderValue(String),

    /// Body could not be serialized
    #[error("Failed to serialize body: {0}")]
    Body(String),
}

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// PATCH request
    Patch,
    /// DELETE request
    Delete,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Immutable description of one API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// Start a request with an arbitrary method
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            error: None,
        }
    }

    /// Start a GET request
    pub fn get(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Get, path)
    }

    /// Start a POST request
    pub fn post(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Post, path)
    }

    /// Start a PUT request
    pub fn put(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Put, path)
    }

    /// Start a PATCH request
    pub fn patch(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Patch, path)
    }

    /// Start a DELETE request
    pub fn delete(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Delete, path)
    }

    /// Request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request path, always rooted at `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters in insertion order
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Headers, keyed by lower-case name
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look up a header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Request body
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Copy of this descriptor with `extra` headers filled in where the
    /// descriptor does not already set them
    pub(crate) fn with_fallback_headers<'a>(
        &self,
        extra: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut derived = self.clone();
        for (name, value) in extra {
            derived
                .headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
        derived
    }
}

/// Builder for [`RequestDescriptor`]
///
/// Errors from body serialization are held until [`RequestBuilder::build`] so
/// the builder chain stays infallible.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    error: Option<DescriptorError>,
}

impl RequestBuilder {
    /// Add a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a raw body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and its content type
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Some(body);
                self.headers.push(("content-type".to_string(), JSON_CONTENT_TYPE.to_string()));
            }
            Err(e) => self.error = Some(DescriptorError::Body(e.to_string())),
        }
        self
    }

    /// Set a form-encoded body and its content type
    pub fn form<'a>(mut self, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.body = Some(body.into_bytes());
        self.headers.push(("content-type".to_string(), FORM_CONTENT_TYPE.to_string()));
        self
    }

    /// Validate and freeze the descriptor
    pub fn build(self) -> Result<RequestDescriptor, DescriptorError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.path.starts_with('/') {
            return Err(DescriptorError::InvalidPath(self.path));
        }

        let mut headers = BTreeMap::new();
        for (name, value) in self.headers {
            validate_header(&name, &value)?;
            headers.insert(name.to_ascii_lowercase(), value);
        }

        Ok(RequestDescriptor {
            method: self.method,
            path: self.path,
            query: self.query,
            headers,
            body: self.body,
        })
    }
}

/// Check that a header pair is valid on the wire
pub(crate) fn validate_header(name: &str, value: &str) -> Result<(), DescriptorError> {
    if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
        return Err(DescriptorError::InvalidHeaderName(name.to_string()));
    }
    if reqwest::header::HeaderValue::from_str(value).is_err() {
        return Err(DescriptorError::InvalidHeaderValue(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_descriptor() {
        let req = RequestDescriptor::get("/transaction/")
            .param("query", "groceries")
            .build()
            .unwrap();

        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/transaction/");
        assert_eq!(req.query(), &[("query".to_string(), "groceries".to_string())]);
        assert!(req.body().is_none());
        assert!(req.headers().is_empty());
    }

    #[test]
    fn test_json_body_sets_content_type() {
        #[derive(Serialize)]
        struct Allocation {
            id: u32,
            amount: i64,
        }

        let req = RequestDescriptor::put("/allocation/")
            .json(&Allocation { id: 3, amount: -1250 })
            .build()
            .unwrap();

        assert_eq!(req.header("Content-Type"), Some(JSON_CONTENT_TYPE));
        let body: serde_json::Value = serde_json::from_slice(req.body().unwrap()).unwrap();
        assert_eq!(body["id"], 3);
        assert_eq!(body["amount"], -1250);
    }

    #[test]
    fn test_form_body_is_url_encoded() {
        let req = RequestDescriptor::post("/oauth2/token/")
            .form([("grant_type", "password"), ("username", "a@b.com"), ("password", "p&ss")])
            .build()
            .unwrap();

        assert_eq!(req.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(
            std::str::from_utf8(req.body().unwrap()).unwrap(),
            "grant_type=password&username=a%40b.com&password=p%26ss"
        );
    }

    #[test]
    fn test_header_names_are_lowercased() {
        let req = RequestDescriptor::get("/me").header("X-Request-Id", "abc").build().unwrap();
        assert_eq!(req.headers().get("x-request-id"), Some(&"abc".to_string()));
        assert_eq!(req.header("X-REQUEST-ID"), Some("abc"));
    }

    #[test]
    fn test_invalid_path_rejected() {
        let err = RequestDescriptor::get("me").build().unwrap_err();
        assert_eq!(err, DescriptorError::InvalidPath("me".to_string()));

        let err = RequestDescriptor::get("").build().unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidPath(_)));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = RequestDescriptor::get("/me").header("bad header", "x").build().unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidHeaderName(_)));

        let err = RequestDescriptor::get("/me").header("x-ok", "line\nbreak").build().unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidHeaderValue(_)));
    }

    #[test]
    fn test_fallback_headers_do_not_override() {
        let req = RequestDescriptor::get("/me")
            .header("Authorization", "Bearer explicit")
            .build()
            .unwrap();

        let derived = req.with_fallback_headers([
            ("authorization", "Bearer derived"),
            ("Accept", "application/json"),
        ]);

        assert_eq!(derived.header("authorization"), Some("Bearer explicit"));
        assert_eq!(derived.header("accept"), Some("application/json"));
        // source descriptor untouched
        assert!(req.header("accept").is_none());
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Patch.as_str(), "PATCH");
        assert_eq!(reqwest::Method::from(Method::Delete), reqwest::Method::DELETE);
    }
}
