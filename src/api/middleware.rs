//! Bearer-token auth middleware. Checks `Authorization: Bearer <token>` on
//! every request except the bypass list (health, register, login), then
//! validates the JWT and stashes the resolved `user_id` as a request
//! extension for handlers to read.

use std::sync::Arc;

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth;
use crate::error::AppError;

use super::server::AppState;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

const BYPASS_PATHS: &[&str] = &["/api/health", "/api/auth/register", "/api/auth/login"];

/// Returns an explicit `Response` for every path — including every
/// rejection — rather than ever raising past this boundary, so a missing
/// or invalid bearer token surfaces as the same problem-detail body every
/// other error path uses instead of framework-default empty 401s.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if BYPASS_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return AppError::InvalidCredentials.into_response();
    };

    match auth::validate_token(token, &state.config.jwt_secret) {
        Ok(user_id) => {
            request.extensions_mut().insert(AuthenticatedUser(user_id));
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
