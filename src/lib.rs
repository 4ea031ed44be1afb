//! loyaltymart - loyalty points backend
//!
//! Users register, upload order numbers and withdraw accumulated points;
//! a remote accrual service decides what each order is worth. The core is
//! the settlement pipeline: a bounded in-memory queue feeds a pool of
//! polling workers, with a persistent delayed table as the retry path.
//!
//! # Modules
//!
//! - [`config`] - layered flag/env configuration
//! - [`logging`] - process-wide tracing setup
//! - [`models`] - domain types (users, orders, balances, withdrawals)
//! - [`validation`] - order number shape and Luhn checks
//! - [`storage`] - persistence capabilities and the Postgres backend
//! - [`auth`] - password accounts, tokens, request middleware
//! - [`accrual`] - remote accrual client and settlement workers
//! - [`gateway`] - HTTP routing and handlers
//! - [`error`] - HTTP error kinds and status mapping

pub mod accrual;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod storage;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use models::{Order, OrderRef, OrderStatus, User, UserBalance, Withdrawal};
pub use storage::{PgStorage, Storage, StorageError};
