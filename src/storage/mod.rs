//! Persistence layer
//!
//! [`Storage`] is the capability set the rest of the system depends on:
//! user CRUD, order CRUD, atomic balance settlement, the delayed work queue
//! and withdrawal CRUD. [`postgres::PgStorage`] is the production backend;
//! [`memory::MemoryStorage`] backs the handler and worker tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Order, OrderRef, User, UserBalance, Withdrawal};

pub use postgres::PgStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A uniqueness constraint rejected the write (login, order number or
    /// withdrawal order number, depending on the operation).
    #[error("unique constraint violated")]
    Duplicate,

    /// Conditional debit affected no row: the balance is below the sum.
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("row not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Duplicate,
            _ => StorageError::Database(e),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert the user together with their zero balance in one transaction.
    /// A taken login surfaces as [`StorageError::Duplicate`].
    async fn create_user(&self, user: &User, balance: &UserBalance) -> Result<(), StorageError>;

    async fn user_by_login(&self, login: &str) -> Result<Option<User>, StorageError>;

    /// Insert a fresh order. A concurrent insert of the same number
    /// surfaces as [`StorageError::Duplicate`].
    async fn add_order(&self, order: &Order) -> Result<(), StorageError>;

    async fn order_by_number(&self, number: &str) -> Result<Option<Order>, StorageError>;

    /// All orders of one user, oldest upload first.
    async fn orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, StorageError>;

    async fn balance_by_user(&self, user_id: Uuid) -> Result<UserBalance, StorageError>;

    /// Advance a `NEW` order to `PROCESSING`. A no-op when the order moved
    /// on already; terminal states are never touched.
    async fn mark_order_processing(&self, number: &str) -> Result<(), StorageError>;

    /// Move a non-terminal order to `INVALID`.
    async fn mark_order_invalid(&self, number: &str) -> Result<(), StorageError>;

    /// Terminal settlement: flip the order to `PROCESSED`, record the
    /// accrual and credit the owner's balance, all in one transaction. The
    /// status flip is conditional on the order not already being
    /// `PROCESSED`; the credit happens only when the flip won, which is
    /// what makes concurrent settlement credit at most once. Returns
    /// whether this call performed the credit.
    async fn settle_order_processed(
        &self,
        number: &str,
        user_id: Uuid,
        accrual: Decimal,
    ) -> Result<bool, StorageError>;

    /// Debit `sum` and record the withdrawal in one transaction. The debit
    /// is a conditional atomic delta; a balance below `sum` surfaces as
    /// [`StorageError::InsufficientFunds`], a reused order number as
    /// [`StorageError::Duplicate`].
    async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        sum: Decimal,
    ) -> Result<(), StorageError>;

    async fn withdrawal_by_order(&self, order_number: &str)
    -> Result<Option<Withdrawal>, StorageError>;

    /// All withdrawals of one user, oldest first.
    async fn withdrawals_by_user(&self, user_id: Uuid) -> Result<Vec<Withdrawal>, StorageError>;

    /// Park an order for the delayed retry path. Idempotent upsert; a row
    /// already parked stays parked once.
    async fn park_delayed(&self, order: &OrderRef) -> Result<(), StorageError>;

    /// Claim up to `limit` parked orders for this worker pass. Claimed rows
    /// are fenced against concurrent delayed workers; a claim left behind
    /// by a crashed worker expires and becomes claimable again.
    async fn claim_delayed(&self, limit: i64) -> Result<Vec<OrderRef>, StorageError>;

    /// Release a claim so a later tick retries the order.
    async fn release_delayed(&self, number: &str) -> Result<(), StorageError>;

    /// Drop a parked order after resolution.
    async fn delete_delayed(&self, number: &str) -> Result<(), StorageError>;

    /// Close the backing handle; called last in the shutdown sequence.
    async fn close(&self);
}
