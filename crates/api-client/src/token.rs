//! Bearer tokens
//!
//! An [`ApiToken`] is the credential the hook attaches to outgoing requests.
//! The token string is opaque to the client; expiry comes from explicit
//! metadata when the issuer provides it, falling back to the `exp` claim when
//! the access token happens to be a JWT.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Token type the backend issues
pub const BEARER: &str = "bearer";

/// Token response from the OAuth2 token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Access token for authenticated requests
    pub access_token: String,
    /// Single-use token for obtaining a new access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type (always "bearer" for this backend)
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    BEARER.to_string()
}

/// Credential attached to outgoing requests
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    /// Create a bearer token with no expiry metadata
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
        }
    }

    /// Set an explicit expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the refresh token
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Access token string
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Refresh token, if the issuer provided one
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Token type as issued
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// When the token stops being valid
    ///
    /// Explicit metadata wins; otherwise the JWT `exp` claim is used. `None`
    /// means the token carries no expiry the client can see.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| jwt_expiration(&self.access_token))
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }

    /// Check expiry against the current time
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the token may be attached to a request at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired_at(now)
    }

    /// `Authorization` header value for this token
    ///
    /// The backend issues `token_type: "bearer"`; the header uses the
    /// canonical `Bearer` scheme name.
    pub fn authorization_header(&self) -> String {
        let scheme = if self.token_type.eq_ignore_ascii_case(BEARER) {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", scheme, self.access_token)
    }
}

impl From<TokenGrant> for ApiToken {
    fn from(grant: TokenGrant) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_type: grant.token_type,
            expires_at: None,
        }
    }
}

// Token strings never reach logs
impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim of a JWT without verifying its signature
///
/// Only used to decide whether a token is worth sending; the server remains
/// the authority on validity.
fn jwt_expiration(token: &str) -> Option<DateTime<Utc>> {
    let header = decode_header(token).ok()?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    data.claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
}

/// Source of the token a hook attaches at dispatch time
///
/// Implemented by [`SharedToken`] and by authentication contexts such as
/// [`crate::OAuthSession`], so hooks get their credential by injection rather
/// than from a global.
pub trait TokenProvider: Send + Sync {
    /// Token current at the moment of the call
    fn current_token(&self) -> Option<ApiToken>;
}

/// Cloneable in-memory token slot
///
/// Clones share the same slot. Replacing the token never affects a request
/// that already read it.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<ApiToken>>>,
}

impl SharedToken {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot holding `token`
    pub fn with_token(token: ApiToken) -> Self {
        let slot = Self::new();
        slot.set(token);
        slot
    }

    /// Replace the token
    pub fn set(&self, token: ApiToken) {
        *self.inner.write() = Some(token);
    }

    /// Remove the token
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Current token
    pub fn get(&self) -> Option<ApiToken> {
        self.inner.read().clone()
    }
}

impl TokenProvider for SharedToken {
    fn current_token(&self) -> Option<ApiToken> {
        self.get()
    }
}

impl<P: TokenProvider + ?Sized> TokenProvider for Arc<P> {
    fn current_token(&self) -> Option<ApiToken> {
        (**self).current_token()
    }
}
