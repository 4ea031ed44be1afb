//! HTTP handlers for the user-facing API
//!
//! Content-type and body validation happen here; everything stateful goes
//! through the storage and auth capabilities on [`AppState`]. Status codes
//! and text bodies follow the published API contract.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rust_decimal::Decimal;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{Credentials, Order, OrderRef, OrderStatus, WithdrawRequest};
use crate::storage::StorageError;
use crate::validation::{is_order_number, luhn_valid, normalize_order_number};

use super::state::AppState;

/// Upper bound on how long a submission may wait for a fast-queue slot.
/// Past it the order is parked for the delayed path instead; the row is
/// already durable, so the client still gets its 202.
const QUEUE_PUBLISH_WAIT: Duration = Duration::from_secs(5);

pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    ensure_content_type(&headers, "application/json")?;
    let creds: Credentials = serde_json::from_str(&body).map_err(|_| ApiError::Malformed)?;

    let token = state.auth.register(&creds.login, &creds.password).await?;
    authorized_response(&token, "User registered and authorized successfully")
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    ensure_content_type(&headers, "application/json")?;
    let creds: Credentials = serde_json::from_str(&body).map_err(|_| ApiError::Malformed)?;

    let token = state.auth.login(&creds.login, &creds.password).await?;
    authorized_response(&token, "User authorized successfully")
}

pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    ensure_content_type(&headers, "text/plain")?;

    let number = normalize_order_number(&body);
    if number.is_empty() {
        return Err(ApiError::EmptyBody);
    }
    if !is_order_number(&number) || !luhn_valid(&number) {
        return Err(ApiError::BadOrderNumber);
    }

    if let Some(existing) = state.storage.order_by_number(&number).await? {
        return duplicate_order_response(&existing, user_id);
    }

    let order = Order {
        number: number.clone(),
        status: OrderStatus::New,
        user_id,
        accrual: Decimal::ZERO,
        uploaded_at: Utc::now(),
    };
    match state.storage.add_order(&order).await {
        Ok(()) => {}
        // Lost the insert race: somebody registered the number in between
        // the lookup and the insert. Re-read to pick the right answer.
        Err(StorageError::Duplicate) => {
            let existing = state
                .storage
                .order_by_number(&number)
                .await?
                .ok_or(ApiError::Internal("order vanished after duplicate insert"))?;
            return duplicate_order_response(&existing, user_id);
        }
        Err(e) => return Err(e.into()),
    }

    let order_ref = OrderRef { number, user_id };
    publish_order(&state, order_ref).await?;

    Ok((StatusCode::ACCEPTED, "Order accepted").into_response())
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Response> {
    let orders = state.storage.orders_by_user(user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(orders).into_response())
}

pub async fn balance(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Response> {
    let balance = state.storage.balance_by_user(user_id).await?;
    Ok(Json(balance).into_response())
}

pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    ensure_content_type(&headers, "application/json")?;
    let request: WithdrawRequest = serde_json::from_str(&body).map_err(|_| ApiError::Malformed)?;

    let number = normalize_order_number(&request.order);
    if number.is_empty() {
        return Err(ApiError::EmptyBody);
    }
    if !is_order_number(&number) || !luhn_valid(&number) {
        return Err(ApiError::BadOrderNumber);
    }
    if state.storage.withdrawal_by_order(&number).await?.is_some() {
        return Err(ApiError::OrderAlreadyWithdrawn);
    }
    if request.sum <= Decimal::ZERO {
        return Err(ApiError::BadSum);
    }

    match state.storage.withdraw(user_id, &number, request.sum).await {
        Ok(()) => Ok((StatusCode::OK, "Withdrawal accepted").into_response()),
        Err(StorageError::InsufficientFunds) => Err(ApiError::InsufficientFunds),
        Err(StorageError::Duplicate) => Err(ApiError::OrderAlreadyWithdrawn),
        Err(e) => Err(e.into()),
    }
}

pub async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> ApiResult<Response> {
    let withdrawals = state.storage.withdrawals_by_user(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(withdrawals).into_response())
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Page not found").into_response()
}

/// Block on the fast queue up to [`QUEUE_PUBLISH_WAIT`]; a full or closed
/// queue parks the order for the delayed workers instead of failing the
/// request. A client that drops the connection mid-send leaves the row in
/// `NEW` until the number is referenced again.
async fn publish_order(state: &AppState, order: OrderRef) -> Result<(), ApiError> {
    match tokio::time::timeout(QUEUE_PUBLISH_WAIT, state.order_tx.send(order.clone())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => {
            tracing::warn!(
                order = %order.number,
                "fast queue unavailable, parking order for delayed retry"
            );
            state.storage.park_delayed(&order).await?;
            Ok(())
        }
    }
}

fn duplicate_order_response(existing: &Order, caller: uuid::Uuid) -> ApiResult<Response> {
    if existing.user_id == caller {
        Ok((StatusCode::OK, "Order already uploaded").into_response())
    } else {
        Err(ApiError::OrderOwnedByOther)
    }
}

fn ensure_content_type(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with(expected) {
        return Err(ApiError::BadContentType);
    }
    Ok(())
}

fn authorized_response(token: &str, body: &'static str) -> ApiResult<Response> {
    let value = HeaderValue::from_str(token)
        .map_err(|_| ApiError::Internal("token is not a valid header value"))?;
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(header::AUTHORIZATION, value);
    Ok(response)
}
