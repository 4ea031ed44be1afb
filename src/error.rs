//! HTTP surface errors
//!
//! Every handler failure is an [`ApiError`]; the `IntoResponse` impl is the
//! single place mapping error kinds to status codes and short text bodies.
//! Internal faults are logged at error level with their source chain, client
//! faults only at debug.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::StorageError;

/// Result type for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("wrong request content-type")]
    BadContentType,

    #[error("request body does not parse")]
    Malformed,

    #[error("missing or invalid token")]
    Unauthorized,

    #[error("unknown login or wrong password")]
    BadCredentials,

    #[error("balance is below the requested sum")]
    InsufficientFunds,

    #[error("login is already taken")]
    LoginTaken,

    #[error("order number uploaded by another user")]
    OrderOwnedByOther,

    #[error("order number already used for a withdrawal")]
    OrderAlreadyWithdrawn,

    #[error("request body is empty")]
    EmptyBody,

    #[error("order number fails shape or Luhn check")]
    BadOrderNumber,

    #[error("withdrawal sum must be positive")]
    BadSum,

    #[error("storage failure")]
    Storage(#[from] StorageError),

    #[error("token issuing failure")]
    Token(#[from] crate::auth::TokenError),

    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(e: crate::auth::AuthError) -> Self {
        use crate::auth::AuthError;
        match e {
            AuthError::LoginTaken => ApiError::LoginTaken,
            AuthError::BadCredentials => ApiError::BadCredentials,
            AuthError::Storage(e) => ApiError::Storage(e),
            AuthError::Token(e) => ApiError::Token(e),
        }
    }
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadContentType => (StatusCode::BAD_REQUEST, "Wrong request Content-Type"),
            ApiError::Malformed => (StatusCode::BAD_REQUEST, "Wrong request format"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Access denied"),
            ApiError::BadCredentials => (StatusCode::UNAUTHORIZED, "Wrong username or password"),
            ApiError::InsufficientFunds => {
                (StatusCode::PAYMENT_REQUIRED, "Not enough points on balance")
            }
            ApiError::LoginTaken => (StatusCode::CONFLICT, "Login already used"),
            ApiError::OrderOwnedByOther => (StatusCode::CONFLICT, "Order already exists in system"),
            ApiError::OrderAlreadyWithdrawn => (StatusCode::CONFLICT, "Order already processed"),
            ApiError::EmptyBody => (StatusCode::UNPROCESSABLE_ENTITY, "Request body is empty"),
            ApiError::BadOrderNumber => {
                (StatusCode::UNPROCESSABLE_ENTITY, "Order format is incorrect")
            }
            ApiError::BadSum => (StatusCode::UNPROCESSABLE_ENTITY, "Sum is incorrect"),
            ApiError::Storage(_) | ApiError::Token(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, source = ?std::error::Error::source(&self), "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_faults_map_to_documented_codes() {
        assert_eq!(
            ApiError::BadContentType.status_and_body().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized.status_and_body().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InsufficientFunds.status_and_body().0,
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::LoginTaken.status_and_body().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::BadOrderNumber.status_and_body().0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn storage_faults_are_internal() {
        let err = ApiError::from(StorageError::NotFound);
        assert_eq!(err.status_and_body().0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
