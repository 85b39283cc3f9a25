use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use rand_core::OsRng;
use tracing::info;
use uuid::Uuid;

use murmur_db::{Database, models::UserRow};
use murmur_types::api::{AuthResponse, LoginRequest, RegisterRequest, UserInfo, VerifyResponse};

use crate::error::AuthError;
use crate::middleware::{claims_from_headers, create_token};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

const REGISTER_FAILED: &str = "Server error during registration";
const LOGIN_FAILED: &str = "Server error during login";
const VERIFY_FAILED: &str = "Server error during verification";

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = payload.map_err(|_| AuthError::Validation("Invalid request body"))?;
    let username = req.username.trim();
    let email = req.email.trim();

    validate_registration(username, email, &req.password)?;

    if state
        .db
        .get_user_by_username(username)
        .map_err(AuthError::internal(REGISTER_FAILED))?
        .is_some()
    {
        return Err(AuthError::UsernameTaken);
    }
    if state
        .db
        .get_user_by_email(email)
        .map_err(AuthError::internal(REGISTER_FAILED))?
        .is_some()
    {
        return Err(AuthError::EmailTaken);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| AuthError::Internal {
            context: REGISTER_FAILED,
            source: anyhow::anyhow!("argon2: {}", e),
        })?
        .to_string();

    let user_id = Uuid::new_v4();

    state
        .db
        .create_user(&user_id.to_string(), username, email, &password_hash)
        .map_err(AuthError::internal(REGISTER_FAILED))?;

    let token = create_token(&state.jwt_secret, user_id, username)
        .map_err(AuthError::internal(REGISTER_FAILED))?;

    info!("Registered user {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User registered successfully".into(),
            token,
            user: UserInfo {
                id: user_id,
                username: username.to_string(),
                email: email.to_string(),
            },
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = payload.map_err(|_| AuthError::Validation("Invalid request body"))?;

    let user = state
        .db
        .get_user_by_username(req.username.trim())
        .map_err(AuthError::internal(LOGIN_FAILED))?
        .ok_or(AuthError::InvalidCredentials)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| AuthError::Internal {
        context: LOGIN_FAILED,
        source: anyhow::anyhow!("stored hash: {}", e),
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)?;

    let user = user_info(user).map_err(AuthError::internal(LOGIN_FAILED))?;
    let token = create_token(&state.jwt_secret, user.id, &user.username)
        .map_err(AuthError::internal(LOGIN_FAILED))?;

    info!("User {} logged in", user.username);

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".into(),
        token,
        user,
    }))
}

/// Check a bearer token and return the user it belongs to.
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let claims = claims_from_headers(&headers, &state.jwt_secret)?;

    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(AuthError::internal(VERIFY_FAILED))?
        .ok_or(AuthError::UserNotFound)?;

    let user = user_info(user).map_err(AuthError::internal(VERIFY_FAILED))?;

    Ok(Json(VerifyResponse {
        success: true,
        user,
    }))
}

fn validate_registration(username: &str, email: &str, password: &str) -> Result<(), AuthError> {
    if username.chars().count() < 3 {
        return Err(AuthError::Validation("Username must be at least 3 characters"));
    }
    if password.chars().count() < 6 {
        return Err(AuthError::Validation("Password must be at least 6 characters"));
    }
    if !email.contains('@') {
        return Err(AuthError::Validation("Please provide a valid email"));
    }
    Ok(())
}

fn user_info(row: UserRow) -> anyhow::Result<UserInfo> {
    Ok(UserInfo {
        id: row.id.parse()?,
        username: row.username,
        email: row.email,
    })
}
