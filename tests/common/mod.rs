#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderName, Request, Response},
};
use serde_json::Value;
use sojourn::{
    ServerConfig,
    auth::ClientIpSource,
    create_app,
    db::{Database, NewUser},
    jwt::{ACCESS_TOKEN_DURATION_SECS, JwtConfig, unix_now},
    start_server,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use url::Url;

pub const TEST_JWT_SECRET: &[u8] = b"test-jwt-secret-for-testing-only-32b";

/// Each request gets its own client IP so per-IP rate limits stay out of the way.
static NEXT_IP: AtomicU32 = AtomicU32::new(1);

fn next_ip() -> String {
    let n = NEXT_IP.fetch_add(1, Ordering::Relaxed);
    format!("10.{}.{}.{}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff)
}

fn test_config(db: Database, no_signup: bool, ip_source: ClientIpSource) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: TEST_JWT_SECRET.to_vec(),
        no_signup,
        ip_source,
    }
}

fn forwarded_for() -> ClientIpSource {
    ClientIpSource::Header(HeaderName::from_static("x-forwarded-for"))
}

/// Create a test app and return (app, db, jwt_config).
pub async fn create_test_app() -> (Router, Database, JwtConfig) {
    create_test_app_with_signup(true).await
}

pub async fn create_test_app_with_signup(signup: bool) -> (Router, Database, JwtConfig) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app(&test_config(db.clone(), !signup, forwarded_for()));
    (app, db, JwtConfig::new(TEST_JWT_SECRET))
}

/// A user with a live session, created directly in the store.
pub struct TestUser {
    pub id: i64,
    pub uuid: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Create a user holding generation 1 of its tokens, without going through
/// password hashing.
pub async fn create_authenticated_user(db: &Database, jwt: &JwtConfig, email: &str) -> TestUser {
    let uuid = uuid::Uuid::new_v4().to_string();
    let id = db
        .users()
        .create(NewUser {
            uuid: &uuid,
            email,
            name: "Test User",
            password_hash: "$argon2id$unused",
        })
        .await
        .unwrap();

    let refresh = jwt.generate_refresh_pair(&uuid, 1).unwrap();
    let access = jwt
        .generate_access_token_at(&uuid, 1, refresh.issued_at)
        .unwrap();
    assert!(
        db.tokens()
            .rotate(id, 0, &refresh.secret, refresh.expires_at)
            .await
            .unwrap()
    );

    TestUser {
        id,
        uuid,
        access_token: access.token,
        refresh_token: refresh.token,
    }
}

/// An access token of generation `version` that expires `remaining_secs`
/// from now (negative: already expired).
pub fn access_token_expiring_in(
    jwt: &JwtConfig,
    uuid: &str,
    version: i64,
    remaining_secs: i64,
) -> String {
    let now = unix_now().unwrap() as i64;
    let issued_at = now + remaining_secs - ACCESS_TOKEN_DURATION_SECS as i64;
    jwt.generate_access_token_at(uuid, version, issued_at as u64)
        .unwrap()
        .token
}

pub fn json_request(method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", next_ip());
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Run the full server on a random port. Returns its base URL and database.
pub async fn start_test_server() -> (Url, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let (_handle, addr): (_, SocketAddr) =
        start_server(test_config(db.clone(), false, ClientIpSource::ConnectInfo), 0)
            .await
            .expect("Failed to start server");
    let base_url = Url::parse(&format!("http://{}/", addr)).unwrap();
    (base_url, db)
}
