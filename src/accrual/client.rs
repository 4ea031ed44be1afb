//! Remote accrual service client
//!
//! `GET {base}/{order_number}` with three interesting answers: `204` when
//! the order is unknown to the remote, `429` with a `Retry-After` budget,
//! and `200` with a JSON report. Everything else is a retriable fault the
//! envelope in [`super::worker`] deals with.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-order state reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccrualReport {
    pub order: String,
    pub status: AccrualStatus,
    /// Present only on `PROCESSED` reports.
    pub accrual: Option<Decimal>,
}

#[derive(Debug, Error)]
pub enum AccrualError {
    /// Connection-level failure; the envelope retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// `429` with the number of seconds the remote asked us to back off.
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    /// `204`: the remote has never heard of this order.
    #[error("order not registered in accrual system")]
    Unregistered,

    /// Unexpected status code or a body that does not parse; retriable.
    #[error("malformed accrual response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AccrualError {
    fn from(e: reqwest::Error) -> Self {
        AccrualError::Transport(e.to_string())
    }
}

/// Outbound capability the workers poll through; faked in tests.
#[async_trait]
pub trait AccrualApi: Send + Sync {
    async fn order_report(&self, number: &str) -> Result<AccrualReport, AccrualError>;
}

pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AccrualApi for AccrualClient {
    async fn order_report(&self, number: &str) -> Result<AccrualReport, AccrualError> {
        let url = format!("{}/{}", self.base_url, number);
        let response = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Err(AccrualError::Unregistered),
            StatusCode::TOO_MANY_REQUESTS => {
                let secs = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| {
                        AccrualError::Malformed("429 without a usable Retry-After".to_string())
                    })?;
                Err(AccrualError::RateLimited(secs))
            }
            StatusCode::OK => response
                .json::<AccrualReport>()
                .await
                .map_err(|e| AccrualError::Malformed(e.to_string())),
            other => Err(AccrualError::Malformed(format!(
                "unexpected status {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::get;

    #[test]
    fn report_parses_processed_with_accrual() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSED","accrual":42.5}"#)
                .unwrap();
        assert_eq!(report.status, AccrualStatus::Processed);
        assert_eq!(report.accrual, Some(Decimal::new(425, 1)));
    }

    #[test]
    fn report_parses_registered_without_accrual() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"79927398713","status":"REGISTERED"}"#).unwrap();
        assert_eq!(report.status, AccrualStatus::Registered);
        assert_eq!(report.accrual, None);
    }

    #[test]
    fn unknown_status_is_a_parse_error() {
        let report: Result<AccrualReport, _> =
            serde_json::from_str(r#"{"order":"1","status":"MAYBE"}"#);
        assert!(report.is_err());
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/orders/")
    }

    #[tokio::test]
    async fn client_maps_http_answers_to_outcomes() {
        let app = Router::new()
            .route(
                "/api/orders/{number}",
                get(|axum::extract::Path(number): axum::extract::Path<String>| async move {
                    match number.as_str() {
                        "204204204" => axum::http::StatusCode::NO_CONTENT.into_response(),
                        "429429429" => {
                            let mut headers = HeaderMap::new();
                            headers.insert(RETRY_AFTER, "7".parse().unwrap());
                            (axum::http::StatusCode::TOO_MANY_REQUESTS, headers).into_response()
                        }
                        "500500500" => {
                            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
                        }
                        _ => axum::Json(serde_json::json!({
                            "order": number,
                            "status": "PROCESSED",
                            "accrual": 10.0,
                        }))
                        .into_response(),
                    }
                }),
            );

        let base = serve(app).await;
        let client = AccrualClient::new(&base);

        assert!(matches!(
            client.order_report("204204204").await,
            Err(AccrualError::Unregistered)
        ));
        assert!(matches!(
            client.order_report("429429429").await,
            Err(AccrualError::RateLimited(7))
        ));
        assert!(matches!(
            client.order_report("500500500").await,
            Err(AccrualError::Malformed(_))
        ));

        let report = client.order_report("79927398713").await.unwrap();
        assert_eq!(report.order, "79927398713");
        assert_eq!(report.status, AccrualStatus::Processed);
        assert_eq!(report.accrual, Some(Decimal::new(10, 0)));
    }
}
