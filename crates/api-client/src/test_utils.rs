//! Test utilities and fixtures for the API client
//!
//! Token generators, canned payloads and a tracing initializer shared by the
//! unit tests in this crate.

#![allow(dead_code)] // Test utilities may not all be used yet

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test tokens
pub mod tokens {
    use crate::token::ApiToken;
    use chrono::{DateTime, Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        exp: i64,
        iat: i64,
    }

    /// HS256 JWT for `alice@example.com` expiring at `exp`
    pub fn jwt_expiring_at(exp: DateTime<Utc>) -> String {
        let claims = Claims {
            sub: "alice@example.com",
            exp: exp.timestamp(),
            iat: Utc::now().timestamp(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
    }

    /// Token valid for another hour
    pub fn valid() -> ApiToken {
        ApiToken::new(jwt_expiring_at(Utc::now() + Duration::hours(1)))
            .with_refresh_token("refresh-valid")
    }

    /// Token that expired an hour ago
    pub fn expired() -> ApiToken {
        ApiToken::new(jwt_expiring_at(Utc::now() - Duration::hours(1)))
            .with_refresh_token("refresh-expired")
    }

    /// Opaque token with no expiry metadata
    pub fn opaque(value: &str) -> ApiToken {
        ApiToken::new(value)
    }
}

/// Canned backend payloads
pub mod payloads {
    use serde_json::{json, Value};

    /// Current user
    pub fn me() -> Value {
        json!({"id": 1})
    }

    /// Token endpoint success body
    pub fn token_grant(access: &str, refresh: &str) -> Value {
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "bearer"
        })
    }

    /// FastAPI error body
    pub fn detail(message: &str) -> Value {
        json!({"detail": message})
    }

    /// Transaction list
    pub fn transactions() -> Value {
        json!([
            {"id": 1, "description": "Groceries", "amount": -5420},
            {"id": 2, "description": "Salary", "amount": 250000}
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_tokens() {
        assert!(!tokens::valid().is_expired());
        assert!(tokens::expired().is_expired());
        assert_eq!(tokens::opaque("x").expires_at(), None);
    }

    #[test]
    fn test_fixture_payloads() {
        assert_eq!(payloads::me()["id"], 1);
        assert_eq!(payloads::token_grant("a", "r")["token_type"], "bearer");
        assert_eq!(payloads::transactions().as_array().map(Vec::len), Some(2));
    }
}
