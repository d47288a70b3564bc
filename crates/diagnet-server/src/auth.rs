use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa_axum::{router::OpenApiRouter, routes};

use diagnet_common::types::{LoginRequest, LoginResponse, TokenValidation};

use crate::api::{error_response, ApiError};
use crate::identity::verify_password;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username the token was issued to.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

pub fn create_token(secret: &str, username: &str, ttl_ms: u64) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: username.to_string(),
        iat: now,
        exp: now + ttl_ms / 1000,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Bearer-token filter for `/data/*` and `/analysis/*`.
///
/// CORS preflight must never be challenged, so OPTIONS passes through.
/// Any auth failure is a bare 401 with an empty body.
pub async fn bearer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let Some(token) = bearer_token(&req) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match validate_token(&state.jwt_secret, token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            if matches!(
                e.kind(),
                jsonwebtoken::errors::ErrorKind::ExpiredSignature
            ) {
                tracing::debug!("rejected expired token");
            } else {
                tracing::debug!(error = %e, "rejected invalid token");
            }
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Issues a bearer token for a configured user.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 400, description = "Missing username or password", body = ApiError),
        (status = 401, description = "Invalid credentials", body = ApiError)
    )
)]
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    if req.username.is_empty() || req.password.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "username and password are required",
        );
    }

    let Some(hash) = state.identity.lookup(&req.username) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid credentials",
        );
    };

    if !verify_password(&req.password, &hash) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid credentials",
        );
    }

    match create_token(&state.jwt_secret, &req.username, state.token_ttl_ms) {
        Ok(token) => {
            tracing::info!(username = %req.username, "issued token");
            Json(LoginResponse {
                token,
                token_type: "Bearer".to_string(),
                username: req.username,
                expires_in_ms: state.token_ttl_ms,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to sign token");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error",
            )
        }
    }
}

/// Reports whether the presented bearer token is currently valid.
#[utoipa::path(
    get,
    path = "/auth/validate",
    tag = "Auth",
    responses(
        (status = 200, description = "Validation outcome", body = TokenValidation)
    )
)]
async fn validate(State(state): State<AppState>, req: Request<Body>) -> Response {
    let result = bearer_token(&req)
        .and_then(|token| validate_token(&state.jwt_secret, token).ok())
        .map(|claims| TokenValidation {
            valid: true,
            username: Some(claims.sub),
        })
        .unwrap_or(TokenValidation {
            valid: false,
            username: None,
        });

    Json(result).into_response()
}

pub fn auth_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(login))
        .routes(routes!(validate))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn issue_then_verify_returns_subject() {
        let token = create_token(SECRET, "admin", 60_000).unwrap();
        let claims = validate_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.exp, claims.iat + 60);
    }

    #[test]
    fn tampered_token_fails() {
        let token = create_token(SECRET, "admin", 60_000).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push('A');
        assert!(validate_token(SECRET, &tampered).is_err());
    }

    #[test]
    fn wrong_secret_fails() {
        let token = create_token(SECRET, "admin", 60_000).unwrap();
        assert!(validate_token("another-secret-another-secret!!!", &token).is_err());
    }

    #[test]
    fn expired_token_fails_with_expired_kind() {
        // Sign claims whose expiry is far enough in the past to clear the
        // default validation leeway.
        let now = chrono::Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: "admin".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = validate_token(SECRET, &token).unwrap_err();
        assert!(matches!(
            err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        ));
    }
}
