//! End-to-end tests for the request gating chain.
//!
//! Each test serves the real router on an ephemeral port, with connection
//! info, and drives it over HTTP with `reqwest`. The in-memory store is
//! seeded per test, so no external services are needed.
//!
//! Run with: `cargo test --test gating_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use greenlight::mailer::{MailError, Mailer};
use greenlight::models::{
    HashedPassword, ListQuery, Metadata, Movie, NewUser, Permission, Scope, Token, TokenDigest,
    User, UserAccount,
};
use greenlight::store::{
    AccountStore, MovieStore, StoreError, StoreResult, Stores, UserStore,
};
use greenlight::{AppState, Config, MemoryStore, build_router};

const TRUSTED_ORIGIN: &str = "https://greenlight.example";

/// Activated user holding `movies:read`
const READER_TOKEN: &str = "READERREADERREADERREADER22";
/// Activated user without permissions
const OUTSIDER_TOKEN: &str = "OUTSIDEROUTSIDEROUTSIDER33";
/// Not activated user holding `movies:read`
const INACTIVE_TOKEN: &str = "INACTIVEINACTIVEINACTIVE44";
/// Correct shape, never issued
const UNKNOWN_TOKEN: &str = "UNKNOWNUNKNOWNUNKNOWNUNK55";
const EXPIRED_TOKEN: &str = "EXPIREDEXPIREDEXPIREDEXP66";
const ACTIVATION_TOKEN: &str = "ACTIVATIONACTIVATIONACTI77";
/// Activation token of the not activated user 3
const PENDING_TOKEN: &str = "PENDINGPENDINGPENDINGPEN88";

/// Password of the reader, user 1
const READER_PASSWORD: &str = "pa$$word";

// ============================================================================
// Fixture
// ============================================================================

/// Relaxed settings: no rate limiting, no failure throttling, no exporter.
fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        limiter_enabled: false,
        cors_trusted_origins: vec![TRUSTED_ORIGIN.to_string()],
        auth_failure_limit: 0,
        log_level: "warn".to_string(),
        metrics_port: 0,
        ..Config::default()
    }
}

fn user(id: i64, activated: bool) -> User {
    User {
        id,
        name: format!("User {id}"),
        email: format!("user{id}@example.com"),
        activated,
        version: 1,
    }
}

fn movie(id: i64, title: &str, year: i32, genres: &[&str]) -> Movie {
    Movie {
        id,
        title: title.to_string(),
        year,
        runtime: 90 + id as i32,
        genres: genres.iter().map(|g| g.to_string()).collect(),
        version: 1,
    }
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let later = Utc::now() + TimeDelta::hours(1);
    let earlier = Utc::now() - TimeDelta::hours(1);

    store.insert_user(user(1, true));
    store.insert_user(user(2, true));
    store.insert_user(user(3, false));
    store.grant(1, &[Permission::MoviesRead]);
    store.grant(3, &[Permission::MoviesRead]);

    store.insert_plaintext_token(READER_TOKEN, 1, later, Scope::Authentication);
    store.insert_plaintext_token(OUTSIDER_TOKEN, 2, later, Scope::Authentication);
    store.insert_plaintext_token(INACTIVE_TOKEN, 3, later, Scope::Authentication);
    store.insert_plaintext_token(EXPIRED_TOKEN, 1, earlier, Scope::Authentication);
    store.insert_plaintext_token(ACTIVATION_TOKEN, 1, later, Scope::Activation);
    store.insert_plaintext_token(PENDING_TOKEN, 3, later, Scope::Activation);

    store.insert_movie(movie(1, "Moana", 2016, &["animation", "adventure"]));
    store.insert_movie(movie(2, "Black Panther", 2018, &["action", "adventure"]));
    store.insert_movie(movie(3, "Deadpool", 2016, &["action", "comedy"]));
    store.insert_movie(movie(4, "The Breakfast Club", 1986, &["drama"]));
    store
}

/// Test fixture that serves the application on an ephemeral port.
struct TestFixture {
    base_url: String,
    client: Client,
    state: AppState,
    server: JoinHandle<()>,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    async fn with_config(config: Config) -> Self {
        let state = AppState::in_memory(config, seeded_store()).expect("Failed to build state");
        Self::with_state(state).await
    }

    async fn with_state(state: AppState) -> Self {
        // Bound before serving, so the first request never races startup
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let app = build_router(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            state,
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Response {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Request failed")
    }

    async fn send_json(&self, method: Method, path: &str, body: String) -> Response {
        self.client
            .request(method, self.url(path))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Request failed")
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Response {
        self.send_json(Method::POST, path, body.to_string()).await
    }

    async fn put_json(&self, path: &str, body: serde_json::Value) -> Response {
        self.send_json(Method::PUT, path, body.to_string()).await
    }

    async fn get_with_authorization(&self, path: &str, authorization: &str) -> Response {
        self.client
            .get(self.url(path))
            .header("Authorization", authorization)
            .send()
            .await
            .expect("Request failed")
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Gives the reader a password so they can exchange it for a token.
async fn with_reader_password(store: MemoryStore) -> MemoryStore {
    let password = HashedPassword::from_plaintext(READER_PASSWORD.to_string())
        .await
        .expect("Failed to hash password");
    store.insert_account(UserAccount {
        user: user(1, true),
        password,
    });
    store
}

async fn error_kind(response: Response) -> String {
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    body["error"].as_str().expect("error missing").to_string()
}

fn vary_values(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all("vary")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Healthcheck
// ============================================================================

#[tokio::test]
async fn test_healthcheck_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/v1/healthcheck", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(vary_values(&response).contains(&"Authorization".to_string()));

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "available");
    assert_eq!(body["system_info"]["environment"], "development");
    assert!(body["system_info"]["version"].is_string());

    fixture.state.shutdown().await;
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/v1/healthcheck"))
        .header("x-request-id", "trace-me-123")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.headers()["x-request-id"], "trace-me-123");
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_anonymous_allowed_on_public_route() {
    let fixture = TestFixture::new().await;

    let no_header = fixture.get("/v1/healthcheck", None).await;
    assert_eq!(no_header.status(), StatusCode::OK);

    let empty_header = fixture.get_with_authorization("/v1/healthcheck", "").await;
    assert_eq!(empty_header.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bad_credentials_rejected_even_on_public_route() {
    let fixture = TestFixture::new().await;

    let cases = [
        ("Bearer", "malformed_credential"),
        ("Basic dXNlcjpwYXNz", "malformed_credential"),
        ("bearer READERREADERREADERREADER22", "malformed_credential"),
        ("Bearer READERREADERREADERREADER22 extra", "malformed_credential"),
        ("Bearer short", "invalid_credential"),
        ("Bearer READERREADERREADERREADER1!", "invalid_credential"),
        ("Bearer UNKNOWNUNKNOWNUNKNOWNUNK55", "invalid_or_expired_credential"),
        ("Bearer EXPIREDEXPIREDEXPIREDEXP66", "invalid_or_expired_credential"),
        ("Bearer ACTIVATIONACTIVATIONACTI77", "invalid_or_expired_credential"),
    ];

    for (authorization, expected) in cases {
        let response = fixture
            .get_with_authorization("/v1/healthcheck", authorization)
            .await;

        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "Authorization: {authorization}"
        );
        assert_eq!(response.headers()["www-authenticate"], "Bearer");
        assert!(vary_values(&response).contains(&"Authorization".to_string()));
        assert_eq!(error_kind(response).await, expected, "Authorization: {authorization}");
    }
}

#[tokio::test]
async fn test_valid_token_authenticates() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/v1/movies", Some(READER_TOKEN)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_repeated_auth_failures_are_throttled() {
    let fixture = TestFixture::with_config(Config {
        auth_failure_limit: 1,
        auth_failure_burst: 2,
        ..test_config()
    })
    .await;

    for _ in 0..2 {
        let response = fixture.get("/v1/healthcheck", Some(UNKNOWN_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let throttled = fixture.get("/v1/healthcheck", Some(UNKNOWN_TOKEN)).await;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.headers().contains_key("retry-after"));
    assert_eq!(error_kind(throttled).await, "too_many_auth_failures");

    // Valid credentials never consume the failure allowance
    let ok = fixture.get("/v1/movies", Some(READER_TOKEN)).await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failures_stay_unauthorized_by_default() {
    let fixture = TestFixture::with_config(Config {
        limiter_enabled: false,
        cors_trusted_origins: vec![TRUSTED_ORIGIN.to_string()],
        ..Config::default()
    })
    .await;
    assert!(fixture.state.auth_throttle.is_none());

    for attempt in 0..7 {
        let response = fixture.get("/v1/healthcheck", Some(UNKNOWN_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "attempt {attempt}");
    }
}

struct BrokenUsers;

#[async_trait]
impl UserStore for BrokenUsers {
    async fn get_for_token(
        &self,
        _scope: Scope,
        _digest: &TokenDigest,
        _now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_storage_failure_during_authentication_is_500() {
    let stores = Stores {
        users: Arc::new(BrokenUsers),
        ..Stores::shared(seeded_store())
    };
    let state = AppState::new(test_config(), stores).expect("Failed to build state");
    let fixture = TestFixture::with_state(state).await;

    let response = fixture.get("/v1/healthcheck", Some(READER_TOKEN)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert!(!body["message"].as_str().unwrap().contains("connection refused"));

    // Anonymous requests never reach the store
    let anonymous = fixture.get("/v1/healthcheck", None).await;
    assert_eq!(anonymous.status(), StatusCode::OK);
}

// ============================================================================
// Authentication Tokens
// ============================================================================

const TOKENS_PATH: &str = "/v1/tokens/authentication";

#[tokio::test]
async fn test_token_issued_for_valid_credentials() {
    let store = with_reader_password(seeded_store()).await;
    let state = AppState::in_memory(test_config(), store).expect("Failed to build state");
    let fixture = TestFixture::with_state(state).await;

    let response = fixture
        .post_json(
            TOKENS_PATH,
            json!({"email": "USER1@example.com", "password": READER_PASSWORD}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    let token = body["authentication_token"]["token"].as_str().unwrap();
    assert_eq!(token.len(), 26);
    let expiry: DateTime<Utc> = body["authentication_token"]["expiry"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let lifetime = expiry - Utc::now();
    assert!(lifetime > TimeDelta::hours(23) && lifetime <= TimeDelta::hours(24));

    // The issued token works as a bearer credential
    let movies = fixture.get("/v1/movies", Some(token)).await;
    assert_eq!(movies.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_refused_for_wrong_credentials() {
    let store = with_reader_password(seeded_store()).await;
    let state = AppState::in_memory(test_config(), store).expect("Failed to build state");
    let fixture = TestFixture::with_state(state).await;

    let cases = [
        json!({"email": "user1@example.com", "password": "wrong-password"}),
        json!({"email": "nobody@example.com", "password": READER_PASSWORD}),
        // Seeded without a password
        json!({"email": "user2@example.com", "password": READER_PASSWORD}),
    ];

    for body in cases {
        let response = fixture.post_json(TOKENS_PATH, body.clone()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{body}");
        assert_eq!(error_kind(response).await, "invalid_credentials");
    }
}

#[tokio::test]
async fn test_token_request_validation() {
    let fixture = TestFixture::new().await;

    let cases = [
        (json!({"email": "", "password": READER_PASSWORD}), "email", "must be provided"),
        (
            json!({"email": "test", "password": READER_PASSWORD}),
            "email",
            "must be a valid email address",
        ),
        (json!({"email": "user1@example.com"}), "password", "must be provided"),
        (
            json!({"email": "user1@example.com", "password": "short"}),
            "password",
            "must be at least 8 bytes long",
        ),
        (
            json!({"email": "user1@example.com", "password": "1".repeat(100)}),
            "password",
            "must not be more than 72 bytes long",
        ),
    ];

    for (body, field, message) in cases {
        let response = fixture.post_json(TOKENS_PATH, body.clone()).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{body}");

        let body: serde_json::Value = response.json().await.expect("Failed to parse response");
        assert_eq!(body["error"], "failed_validation");
        assert_eq!(body["fields"][field], message);
    }
}

#[tokio::test]
async fn test_undecodable_bodies_are_bad_requests() {
    let fixture = TestFixture::new().await;

    let cases = [
        (Method::POST, TOKENS_PATH, r#"{"email": "user1@example.com"}a"#),
        (Method::POST, TOKENS_PATH, r#"{"email": 7}"#),
        (Method::POST, "/v1/users", r#"{"name": "A", "role": "admin"}"#),
        (Method::PUT, "/v1/users/activated", "token=abc"),
    ];

    for (method, path, body) in cases {
        let response = fixture.send_json(method.clone(), path, body.to_string()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{method} {path} {body}");
        assert_eq!(error_kind(response).await, "bad_request");
    }
}

// ============================================================================
// Registration and Activation
// ============================================================================

/// Keeps every activation token it is asked to send.
#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl CapturingMailer {
    fn token_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token.clone())
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError> {
        self.sent
            .lock()
            .push((user.email.clone(), token.plaintext.clone()));
        Ok(())
    }
}

struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send_activation(&self, _user: &User, _token: &Token) -> Result<(), MailError> {
        Err(MailError("smtp unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_register_activate_and_log_in() {
    let mailer = Arc::new(CapturingMailer::default());
    let state = AppState::in_memory(test_config(), seeded_store())
        .expect("Failed to build state")
        .with_mailer(mailer.clone());
    let fixture = TestFixture::with_state(state).await;

    let registered = fixture
        .post_json(
            "/v1/users",
            json!({"name": "Dana", "email": "dana@example.com", "password": "correct horse"}),
        )
        .await;
    assert_eq!(registered.status(), StatusCode::CREATED);
    let body: serde_json::Value = registered.json().await.expect("Failed to parse response");
    assert_eq!(body["user"]["name"], "Dana");
    assert_eq!(body["user"]["activated"], false);
    assert!(body["user"].get("password").is_none());
    assert!(body["user"].get("version").is_none());

    let credentials = json!({"email": "dana@example.com", "password": "correct horse"});
    let token = fixture.post_json(TOKENS_PATH, credentials.clone()).await;
    assert_eq!(token.status(), StatusCode::CREATED);
    let body: serde_json::Value = token.json().await.expect("Failed to parse response");
    let bearer = body["authentication_token"]["token"].as_str().unwrap().to_string();

    // Granted movies:read, but not activated yet
    let before = fixture.get("/v1/movies", Some(&bearer)).await;
    assert_eq!(error_kind(before).await, "not_activated");

    let activation = mailer.token_for("dana@example.com").expect("No activation mail");
    let activated = fixture
        .put_json("/v1/users/activated", json!({"token": activation}))
        .await;
    assert_eq!(activated.status(), StatusCode::OK);
    let body: serde_json::Value = activated.json().await.expect("Failed to parse response");
    assert_eq!(body["user"]["activated"], true);

    let after = fixture.get("/v1/movies", Some(&bearer)).await;
    assert_eq!(after.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_registration_survives_mail_failure() {
    let state = AppState::in_memory(test_config(), seeded_store())
        .expect("Failed to build state")
        .with_mailer(Arc::new(FailingMailer));
    let fixture = TestFixture::with_state(state).await;

    let response = fixture
        .post_json(
            "/v1/users",
            json!({"name": "Eve", "email": "eve@example.com", "password": READER_PASSWORD}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_registration_validation() {
    let fixture = TestFixture::new().await;

    let cases = [
        (json!({"name": "", "email": "new@example.com", "password": READER_PASSWORD}), "name"),
        (json!({"name": "New", "email": "test", "password": READER_PASSWORD}), "email"),
        (json!({"name": "New", "email": "new@example.com", "password": ""}), "password"),
        (
            json!({"name": "New", "email": "new@example.com", "password": "1".repeat(100)}),
            "password",
        ),
        (json!({"name": "New", "email": "User1@Example.com", "password": READER_PASSWORD}), "email"),
    ];

    for (body, field) in cases {
        let response = fixture.post_json("/v1/users", body.clone()).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{body}");

        let body: serde_json::Value = response.json().await.expect("Failed to parse response");
        assert!(body["fields"][field].is_string(), "{body}");
    }
}

#[tokio::test]
async fn test_activation_burns_the_token() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .put_json("/v1/users/activated", json!({"token": PENDING_TOKEN}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["user"]["id"], 3);
    assert_eq!(body["user"]["activated"], true);

    let movies = fixture.get("/v1/movies", Some(INACTIVE_TOKEN)).await;
    assert_eq!(movies.status(), StatusCode::OK);

    let reused = fixture
        .put_json("/v1/users/activated", json!({"token": PENDING_TOKEN}))
        .await;
    assert_eq!(reused.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_activation_validation() {
    let fixture = TestFixture::new().await;

    let cases = [
        ("", "must be provided"),
        ("abc", "must be 26 bytes long"),
        (UNKNOWN_TOKEN, "invalid or expired activation token"),
        // Authentication tokens cannot activate
        (READER_TOKEN, "invalid or expired activation token"),
    ];

    for (token, message) in cases {
        let response = fixture
            .put_json("/v1/users/activated", json!({"token": token}))
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{token}");

        let body: serde_json::Value = response.json().await.expect("Failed to parse response");
        assert_eq!(body["fields"]["token"], message, "{token}");
    }
}

/// Account store that fails writes for chosen users.
struct FaultyAccounts {
    inner: MemoryStore,
    conflicting_user: i64,
    broken_user: i64,
}

#[async_trait]
impl AccountStore for FaultyAccounts {
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>> {
        self.inner.get_by_email(email).await
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.inner.create_user(user).await
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        if user.id == self.conflicting_user {
            Err(StoreError::EditConflict)
        } else if user.id == self.broken_user {
            Err(StoreError::Backend("disk full".to_string()))
        } else {
            self.inner.update_user(user).await
        }
    }
}

#[tokio::test]
async fn test_activation_write_failures() {
    const CONFLICT_TOKEN: &str = "CONFLICTCONFLICTCONFLICT11";
    const BROKEN_TOKEN: &str = "BROKENBROKENBROKENBROKEN99";

    let store = seeded_store();
    let later = Utc::now() + TimeDelta::hours(1);
    store.insert_plaintext_token(CONFLICT_TOKEN, 2, later, Scope::Activation);
    store.insert_plaintext_token(BROKEN_TOKEN, 1, later, Scope::Activation);

    let stores = Stores {
        accounts: Arc::new(FaultyAccounts {
            inner: store.clone(),
            conflicting_user: 2,
            broken_user: 1,
        }),
        ..Stores::shared(store)
    };
    let state = AppState::new(test_config(), stores).expect("Failed to build state");
    let fixture = TestFixture::with_state(state).await;

    let conflict = fixture
        .put_json("/v1/users/activated", json!({"token": CONFLICT_TOKEN}))
        .await;
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    assert_eq!(error_kind(conflict).await, "edit_conflict");

    let broken = fixture
        .put_json("/v1/users/activated", json!({"token": BROKEN_TOKEN}))
        .await;
    assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = broken.json().await.expect("Failed to parse response");
    assert!(!body["message"].as_str().unwrap().contains("disk full"));

    // Users not singled out still activate
    let ok = fixture
        .put_json("/v1/users/activated", json!({"token": PENDING_TOKEN}))
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_activation_lookup_failure_is_500() {
    let stores = Stores {
        users: Arc::new(BrokenUsers),
        ..Stores::shared(seeded_store())
    };
    let state = AppState::new(test_config(), stores).expect("Failed to build state");
    let fixture = TestFixture::with_state(state).await;

    let response = fixture
        .put_json("/v1/users/activated", json!({"token": PENDING_TOKEN}))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_movies_require_permission() {
    let fixture = TestFixture::new().await;

    let cases = [
        (None, StatusCode::UNAUTHORIZED, "authentication_required"),
        (Some(INACTIVE_TOKEN), StatusCode::FORBIDDEN, "not_activated"),
        (Some(OUTSIDER_TOKEN), StatusCode::FORBIDDEN, "missing_permission"),
    ];

    for path in ["/v1/movies", "/v1/movies/1"] {
        for (token, status, kind) in cases {
            let response = fixture.get(path, token).await;
            assert_eq!(response.status(), status, "{path} with {token:?}");
            assert_eq!(error_kind(response).await, kind);
        }

        let allowed = fixture.get(path, Some(READER_TOKEN)).await;
        assert_eq!(allowed.status(), StatusCode::OK, "{path}");
    }
}

#[tokio::test]
async fn test_show_movie() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/v1/movies/2", Some(READER_TOKEN)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["movie"]["title"], "Black Panther");
    assert_eq!(body["movie"]["year"], 2018);

    for path in ["/v1/movies/99", "/v1/movies/0", "/v1/movies/-4", "/v1/movies/one"] {
        let response = fixture.get(path, Some(READER_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

// ============================================================================
// List Query Validation
// ============================================================================

#[tokio::test]
async fn test_list_query_rejections() {
    let fixture = TestFixture::new().await;

    let cases = [
        ("/v1/movies?page=0", "page"),
        ("/v1/movies?page=abc", "page"),
        ("/v1/movies?page_size=0", "page_size"),
        ("/v1/movies?page_size=101", "page_size"),
        ("/v1/movies?page=10000000&page_size=2", "page"),
        ("/v1/movies?sort=rating", "sort"),
        ("/v1/movies?sort=--year", "sort"),
    ];

    for (path, field) in cases {
        let response = fixture.get(path, Some(READER_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{path}");

        let body: serde_json::Value = response.json().await.expect("Failed to parse response");
        assert_eq!(body["error"], "failed_validation");
        assert!(body["fields"][field].is_string(), "{path}: {body}");
    }
}

#[tokio::test]
async fn test_list_query_reports_every_field() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .get("/v1/movies?page=-1&page_size=1000&sort=nope", Some(READER_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    let fields = body["fields"].as_object().unwrap();
    assert!(fields.contains_key("page"));
    assert!(fields.contains_key("page_size"));
    assert!(fields.contains_key("sort"));
}

#[tokio::test]
async fn test_list_filters_sorts_and_paginates() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .get("/v1/movies?genres=action&sort=-year", Some(READER_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    let titles: Vec<&str> = body["movies"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Black Panther", "Deadpool"]);

    let response = fixture
        .get("/v1/movies?sort=title&page=2&page_size=3", Some(READER_TOKEN))
        .await;
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["movies"].as_array().unwrap().len(), 1);
    assert_eq!(body["movies"][0]["title"], "The Breakfast Club");
    assert_eq!(body["metadata"]["current_page"], 2);
    assert_eq!(body["metadata"]["last_page"], 2);
    assert_eq!(body["metadata"]["total_records"], 4);

    let response = fixture
        .get("/v1/movies?title=no+such+film", Some(READER_TOKEN))
        .await;
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert!(body["movies"].as_array().unwrap().is_empty());
    assert!(body["metadata"].as_object().unwrap().is_empty());
}

// ============================================================================
// CORS
// ============================================================================

#[tokio::test]
async fn test_trusted_preflight_answered_before_authentication() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .request(Method::OPTIONS, fixture.url("/v1/movies"))
        .header("Origin", TRUSTED_ORIGIN)
        .header("Access-Control-Request-Method", "PUT")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        TRUSTED_ORIGIN
    );
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "OPTIONS, PUT, PATCH, DELETE"
    );
    assert_eq!(
        response.headers()["access-control-allow-headers"],
        "Authorization, Content-Type"
    );
    assert!(vary_values(&response).contains(&"Origin".to_string()));
}

#[tokio::test]
async fn test_trusted_origin_echoed_on_simple_request() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/v1/healthcheck"))
        .header("Origin", TRUSTED_ORIGIN)
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        TRUSTED_ORIGIN
    );
    let vary = vary_values(&response);
    assert!(vary.contains(&"Origin".to_string()));
    assert!(vary.contains(&"Authorization".to_string()));
}

#[tokio::test]
async fn test_untrusted_origin_gets_no_cors_headers() {
    let fixture = TestFixture::new().await;

    let simple = fixture
        .client
        .get(fixture.url("/v1/healthcheck"))
        .header("Origin", "https://evil.example")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(simple.status(), StatusCode::OK);
    assert!(!simple.headers().contains_key("access-control-allow-origin"));

    // Not short-circuited: the route has no OPTIONS handler
    let preflight = fixture
        .client
        .request(Method::OPTIONS, fixture.url("/v1/healthcheck"))
        .header("Origin", "https://evil.example")
        .header("Access-Control-Request-Method", "PUT")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(preflight.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(!preflight.headers().contains_key("access-control-allow-origin"));
    assert!(!preflight.headers().contains_key("access-control-allow-methods"));
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Slow refill so the bucket cannot recover during the test.
fn limited_config() -> Config {
    Config {
        limiter_enabled: true,
        limiter_rps: 0.1,
        limiter_burst: 3,
        trusted_proxies: vec!["127.0.0.1/32".to_string()],
        ..test_config()
    }
}

async fn get_as(fixture: &TestFixture, client_ip: &str) -> Response {
    fixture
        .client
        .get(fixture.url("/v1/healthcheck"))
        .header("X-Forwarded-For", client_ip)
        .send()
        .await
        .expect("Request failed")
}

#[tokio::test]
async fn test_rate_limit_returns_429_after_burst() {
    let fixture = TestFixture::with_config(limited_config()).await;

    for i in 0..3 {
        let response = get_as(&fixture, "203.0.113.7").await;
        assert_eq!(response.status(), StatusCode::OK, "request {i}");
    }

    let limited = get_as(&fixture, "203.0.113.7").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_kind(limited).await, "rate_limit_exceeded");
    assert_eq!(fixture.state.rate_limiter.client_count(), 1);

    fixture.state.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
    let fixture = TestFixture::with_config(limited_config()).await;

    for _ in 0..4 {
        let _ = get_as(&fixture, "203.0.113.7").await;
    }
    assert_eq!(
        get_as(&fixture, "203.0.113.7").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let other = get_as(&fixture, "198.51.100.20").await;
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(fixture.state.rate_limiter.client_count(), 2);
}

#[tokio::test]
async fn test_rate_limit_precedes_authentication() {
    let fixture = TestFixture::with_config(limited_config()).await;

    for _ in 0..3 {
        let _ = get_as(&fixture, "203.0.113.9").await;
    }

    // Even a bad credential is answered by the limiter once the bucket is empty
    let response = fixture
        .client
        .get(fixture.url("/v1/healthcheck"))
        .header("X-Forwarded-For", "203.0.113.9")
        .header("Authorization", "Bearer short")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_disabled_limiter_admits_everything() {
    let fixture = TestFixture::new().await;

    for _ in 0..20 {
        let response = fixture.get("/v1/healthcheck", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(fixture.state.rate_limiter.client_count(), 0);
}

// ============================================================================
// Panic Recovery
// ============================================================================

struct ExplodingMovies;

#[async_trait]
impl MovieStore for ExplodingMovies {
    async fn get(&self, _id: i64) -> StoreResult<Option<Movie>> {
        panic!("movie lookup exploded")
    }

    async fn list(&self, _query: &ListQuery) -> StoreResult<(Vec<Movie>, Metadata)> {
        Ok((Vec::new(), Metadata::default()))
    }
}

#[tokio::test]
async fn test_panic_becomes_500_and_server_survives() {
    let stores = Stores {
        movies: Arc::new(ExplodingMovies),
        ..Stores::shared(seeded_store())
    };
    let state = AppState::new(test_config(), stores).expect("Failed to build state");
    let fixture = TestFixture::with_state(state).await;

    let response = fixture.get("/v1/movies/1", Some(READER_TOKEN)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["connection"], "close");

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "internal_error");
    assert!(!body["message"].as_str().unwrap().contains("exploded"));

    // Other routes on the same server keep working
    let list = fixture.get("/v1/movies", Some(READER_TOKEN)).await;
    assert_eq!(list.status(), StatusCode::OK);
    let health = fixture.get("/v1/healthcheck", None).await;
    assert_eq!(health.status(), StatusCode::OK);
}
