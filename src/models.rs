//! Domain model types
//!
//! Shared between the HTTP surface, the storage layer and the accrual
//! workers. Monetary values are `rust_decimal::Decimal` and serialize as
//! JSON numbers; timestamps serialize as RFC 3339.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order status
// ============================================================================

/// Order settlement state, backed by the `order_status` lookup table.
///
/// `Invalid` and `Processed` are terminal: once reached, an order never
/// transitions again and `Processed` carries the accrual that was credited
/// exactly once to the owner's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// `order_status.status_id` the variant is stored as.
    pub fn id(self) -> i16 {
        match self {
            OrderStatus::New => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Invalid => 3,
            OrderStatus::Processed => 4,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderStatus::New),
            2 => Some(OrderStatus::Processing),
            3 => Some(OrderStatus::Invalid),
            4 => Some(OrderStatus::Processed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    /// hex(SHA-256(plaintext)) digest, never the plain password.
    pub pwdhash: String,
}

/// Per-user points balance. Exactly one row exists per user, created with
/// zeros at registration.
#[derive(Debug, Clone, Serialize)]
pub struct UserBalance {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub current: Decimal,
    pub withdrawn: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "decimal_is_zero")]
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

/// Reference to an order traveling the settlement pipeline: through the
/// in-memory fast queue and, when a pass could not resolve it, as a row of
/// the `orders_delayed` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRef {
    pub number: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct Withdrawal {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    #[serde(rename = "order")]
    pub order_number: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

// ============================================================================
// Request bodies
// ============================================================================

/// `POST /api/user/register` and `POST /api/user/login` body.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// `POST /api/user/balance/withdraw` body.
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

fn decimal_is_zero(d: &Decimal) -> bool {
    d.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    #[test]
    fn status_ids_round_trip() {
        for st in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert_eq!(OrderStatus::from_id(st.id()), Some(st));
        }
        assert_eq!(OrderStatus::from_id(0), None);
        assert_eq!(OrderStatus::from_id(5), None);
    }

    #[test]
    fn only_invalid_and_processed_are_terminal() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(OrderStatus::Processed.is_terminal());
    }

    #[test]
    fn order_json_hides_owner_and_zero_accrual() {
        let order = Order {
            number: "79927398713".to_string(),
            status: OrderStatus::New,
            user_id: Uuid::new_v4(),
            accrual: Decimal::ZERO,
            uploaded_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["number"], "79927398713");
        assert_eq!(json["status"], "NEW");
        assert!(json.get("accrual").is_none());
        assert!(json.get("user_id").is_none());
        assert_eq!(json["uploaded_at"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn processed_order_json_carries_accrual_as_number() {
        let order = Order {
            number: "79927398713".to_string(),
            status: OrderStatus::Processed,
            user_id: Uuid::new_v4(),
            accrual: Decimal::new(425, 1),
            uploaded_at: Utc::now(),
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "PROCESSED");
        assert_eq!(json["accrual"], 42.5);
    }

    #[test]
    fn balance_json_is_current_and_withdrawn_only() {
        let balance = UserBalance {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            current: Decimal::new(705, 1),
            withdrawn: Decimal::new(30, 0),
        };
        let json = serde_json::to_value(&balance).unwrap();
        assert_eq!(json["current"], 70.5);
        assert_eq!(json["withdrawn"], 30.0);
        assert_eq!(json.as_object().unwrap().len(), 2);
    }
}
