//! Integration tests for the HTTP transport
//!
//! These tests use wiremock to stand in for the budget backend and drive the
//! hook and the OAuth session over real HTTP.

use api_client::{
    use_api, ApiConfig, ApiError, ApiHook, ApiToken, AuthContext, CallState, Credentials, OAuthSession,
    RequestDescriptor, TransportError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct Transaction {
    id: u64,
    description: String,
    amount: i64,
}

fn hook_for(server: &MockServer) -> ApiHook {
    use_api(ApiConfig::new(server.uri())).unwrap()
}

// =============================================================================
// Successful Request Tests
// =============================================================================

#[tokio::test]
async fn test_get_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let api = hook_for(&server);
    let state = api.call(RequestDescriptor::get("/me").build().unwrap()).await;

    let response = state.response().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.success);
    assert_eq!(response.payload, json!({"id": 1}));
}

#[tokio::test]
async fn test_typed_get_with_query() {
    let server = MockServer::start().await;
    let rows = vec![Transaction { id: 7, description: "Rent".into(), amount: -120000 }];

    Mock::given(method("GET"))
        .and(path("/transaction/"))
        .and(query_param("query", "rent"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&rows))
        .mount(&server)
        .await;

    let api: ApiHook<Vec<Transaction>> =
        ApiHook::builder().config(ApiConfig::new(server.uri())).build().unwrap();
    let request = RequestDescriptor::get("/transaction/")
        .param("query", "rent")
        .param("limit", 10)
        .build()
        .unwrap();

    let response = api.fetch(request).await.unwrap();
    assert_eq!(response.payload, rows);
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"description": "Groceries", "amount": -5420})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 3})))
        .mount(&server)
        .await;

    let api = hook_for(&server);
    let request = RequestDescriptor::post("/transaction/")
        .json(&json!({"description": "Groceries", "amount": -5420}))
        .build()
        .unwrap();

    let state = api.call(request).await;
    assert_eq!(state.response().unwrap().status, 201);
}

#[tokio::test]
async fn test_empty_body_decodes_as_null() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/transaction/3"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let api = hook_for(&server);
    let state = api.call(RequestDescriptor::delete("/transaction/3").build().unwrap()).await;

    assert_eq!(state.response().unwrap().payload, serde_json::Value::Null);
}

// =============================================================================
// Authorization Tests
// =============================================================================

#[tokio::test]
async fn test_bearer_header_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let api = hook_for(&server);
    api.set_token(ApiToken::new("secret-token"));

    let state = api.call(RequestDescriptor::get("/me").build().unwrap()).await;
    assert!(matches!(state, CallState::Succeeded(_)));
}

#[tokio::test]
async fn test_no_authorization_header_without_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Not authenticated"})))
        .mount(&server)
        .await;

    let api = hook_for(&server);
    api.call(RequestDescriptor::get("/me").build().unwrap()).await;

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].headers.contains_key("authorization"));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[tokio::test]
async fn test_server_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let api = hook_for(&server);
    let state = api.call(RequestDescriptor::get("/me").build().unwrap()).await;

    match state {
        CallState::Failed(ApiError::Response { code, detail, body }) => {
            assert_eq!(code, 500);
            assert_eq!(detail, None);
            assert_eq!(body, "Internal Server Error");
        }
        other => panic!("expected response error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_detail_extracted_from_error_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/allocation/4"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"detail": "Allocation not found"})),
        )
        .mount(&server)
        .await;

    let api = hook_for(&server);
    let request = RequestDescriptor::put("/allocation/4").json(&json!({"amount": 1})).build().unwrap();

    let err = api.fetch(request).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "Request failed with status 404: Allocation not found");
}

#[tokio::test]
async fn test_malformed_payload_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transaction/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let api: ApiHook<Vec<Transaction>> =
        ApiHook::builder().config(ApiConfig::new(server.uri())).build().unwrap();
    let state = api.call(RequestDescriptor::get("/transaction/").build().unwrap()).await;

    assert!(matches!(state, CallState::Failed(ApiError::Decode(_))));
}

#[tokio::test]
async fn test_timeout_is_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let api = use_api(ApiConfig::new(server.uri()).with_timeout(Duration::from_millis(100))).unwrap();
    let state = api.call(RequestDescriptor::get("/slow").build().unwrap()).await;

    assert_eq!(state, CallState::Failed(ApiError::Transport(TransportError::Timeout)));
}

// =============================================================================
// OAuth Session Tests
// =============================================================================

#[tokio::test]
async fn test_password_login() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token/"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("grant_type=password&username=alice%40example.com&password=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig::new(server.uri());
    let session = std::sync::Arc::new(OAuthSession::new(config.clone()).unwrap());
    let api: ApiHook = ApiHook::builder().config(config).token_provider(session.clone()).build().unwrap();

    let grant = session.login(Credentials::new("alice@example.com", "hunter2")).await.unwrap();
    assert_eq!(grant.payload.access_token, "access-1");

    let state = api.call(RequestDescriptor::get("/me").build().unwrap()).await;
    assert!(matches!(state, CallState::Succeeded(_)));
}

#[tokio::test]
async fn test_password_login_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect username or password"})),
        )
        .mount(&server)
        .await;

    let session = OAuthSession::new(ApiConfig::new(server.uri())).unwrap();
    let err = session.login(Credentials::new("alice@example.com", "wrong")).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert!(!session.is_authenticated());
}
