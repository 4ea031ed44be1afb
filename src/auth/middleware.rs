//! Request authentication middleware
//!
//! Protected routes read the raw token from the `Authorization` header,
//! verify it through the tokenizer and inject the caller's user id into
//! request extensions.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::gateway::state::AppState;

/// Authenticated caller identity, available to handlers behind
/// [`authorize`] via `Extension<AuthUser>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub uuid::Uuid);

pub async fn authorize(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let user_id = state
        .tokenizer
        .verify(token)
        .map_err(|_| ApiError::Unauthorized)?;

    tracing::debug!(%user_id, path = %request.uri().path(), "request authorized");
    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
