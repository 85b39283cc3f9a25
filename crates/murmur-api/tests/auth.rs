use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use murmur_api::{AppStateInner, router};
use murmur_db::Database;

const SECRET: &str = "test-secret";

fn app() -> Router {
    let db = Arc::new(Database::open_in_memory().unwrap());
    router(Arc::new(AppStateInner {
        db,
        jwt_secret: SECRET.into(),
    }))
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn verify_with(auth: Option<&str>) -> Request<Body> {
    let mut req = Request::get("/api/auth/verify");
    if let Some(value) = auth {
        req = req.header(header::AUTHORIZATION, value);
    }
    req.body(Body::empty()).unwrap()
}

async fn register_alice(app: &Router) -> Value {
    let (status, body) = call(
        app,
        post(
            "/api/auth/register",
            json!({"username": "alice", "email": "alice@example.com", "password": "hunter22"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn register_returns_token_and_user() {
    let app = app();
    let body = register_alice(&app).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "User registered successfully");
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert!(body["user"]["id"].as_str().is_some());
    assert!(!body["token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn register_rejects_duplicates() {
    let app = app();
    register_alice(&app).await;

    let (status, body) = call(
        &app,
        post(
            "/api/auth/register",
            json!({"username": "alice", "email": "other@example.com", "password": "hunter22"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Username already exists");

    let (status, body) = call(
        &app,
        post(
            "/api/auth/register",
            json!({"username": "alice2", "email": "alice@example.com", "password": "hunter22"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already exists");
}

#[tokio::test]
async fn register_validates_input() {
    let app = app();

    let (status, body) = call(
        &app,
        post(
            "/api/auth/register",
            json!({"username": "al", "email": "al@example.com", "password": "hunter22"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, post("/api/auth/register", json!({"username": "alice"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_checks_password() {
    let app = app();
    let registered = register_alice(&app).await;

    let (status, body) = call(
        &app,
        post("/api/auth/login", json!({"username": "alice", "password": "hunter22"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    assert_eq!(body["user"]["id"], registered["user"]["id"]);

    let (status, body) = call(
        &app,
        post("/api/auth/login", json!({"username": "alice", "password": "wrong-one"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid username or password");

    let (status, body) = call(
        &app,
        post("/api/auth/login", json!({"username": "nobody", "password": "hunter22"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid username or password");
}

#[tokio::test]
async fn verify_accepts_issued_token() {
    let app = app();
    let registered = register_alice(&app).await;
    let token = registered["token"].as_str().unwrap();

    let (status, body) = call(&app, verify_with(Some(&format!("Bearer {}", token)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"], registered["user"]);
}

#[tokio::test]
async fn verify_failures() {
    let app = app();

    let (status, body) = call(&app, verify_with(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "No token provided");

    let (status, body) = call(&app, verify_with(Some("Bearer not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired token");

    // Well-formed token for a user this database has never seen.
    let token =
        murmur_api::middleware::create_token(SECRET, uuid::Uuid::new_v4(), "ghost").unwrap();
    let (status, body) = call(&app, verify_with(Some(&format!("Bearer {}", token)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "User not found");
}
