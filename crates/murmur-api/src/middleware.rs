use anyhow::Result;
use axum::http::{HeaderMap, header};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use murmur_types::api::Claims;

use crate::error::AuthError;

/// Tokens stay valid for a week.
pub const TOKEN_TTL_DAYS: i64 = 7;

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Extract and validate the JWT from an `Authorization: Bearer` header.
pub fn claims_from_headers(headers: &HeaderMap, secret: &str) -> Result<Claims, AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn issued_token_verifies() {
        let user_id = Uuid::new_v4();
        let token = create_token("secret", user_id, "alice").unwrap();

        let claims = claims_from_headers(&bearer(&token), "secret").unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token("secret", Uuid::new_v4(), "alice").unwrap();
        assert!(matches!(
            claims_from_headers(&bearer(&token), "other"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn missing_header_is_reported() {
        assert!(matches!(
            claims_from_headers(&HeaderMap::new(), "secret"),
            Err(AuthError::MissingToken)
        ));
    }
}
