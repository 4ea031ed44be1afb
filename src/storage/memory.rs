//! In-memory storage backend
//!
//! Mirrors the semantics of [`super::postgres::PgStorage`] (uniqueness,
//! conditional transitions, claim fencing) over plain maps so handler and
//! worker tests run without a database. Not wired into the production
//! binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Order, OrderRef, OrderStatus, User, UserBalance, Withdrawal};

use super::{Storage, StorageError};

const CLAIM_STALE_SECS: i64 = 60;

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    balances: HashMap<Uuid, UserBalance>,
    orders: HashMap<String, Order>,
    delayed: HashMap<String, (Uuid, Option<DateTime<Utc>>)>,
    withdrawals: Vec<Withdrawal>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: number of parked delayed rows.
    pub fn delayed_len(&self) -> usize {
        self.inner.lock().unwrap().delayed.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_user(&self, user: &User, balance: &UserBalance) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.login == user.login) {
            return Err(StorageError::Duplicate);
        }
        inner.users.push(user.clone());
        inner.balances.insert(balance.user_id, balance.clone());
        Ok(())
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<User>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|u| u.login == login).cloned())
    }

    async fn add_order(&self, order: &Order) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.orders.contains_key(&order.number) {
            return Err(StorageError::Duplicate);
        }
        inner.orders.insert(order.number.clone(), order.clone());
        Ok(())
    }

    async fn order_by_number(&self, number: &str) -> Result<Option<Order>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.orders.get(number).cloned())
    }

    async fn orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.uploaded_at);
        Ok(orders)
    }

    async fn balance_by_user(&self, user_id: Uuid) -> Result<UserBalance, StorageError> {
        let inner = self.inner.lock().unwrap();
        inner
            .balances
            .get(&user_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn mark_order_processing(&self, number: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.get_mut(number)
            && order.status == OrderStatus::New
        {
            order.status = OrderStatus::Processing;
        }
        Ok(())
    }

    async fn mark_order_invalid(&self, number: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.get_mut(number)
            && !order.status.is_terminal()
        {
            order.status = OrderStatus::Invalid;
        }
        Ok(())
    }

    async fn settle_order_processed(
        &self,
        number: &str,
        user_id: Uuid,
        accrual: Decimal,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(order) = inner.orders.get_mut(number) else {
            return Ok(false);
        };
        if order.status.is_terminal() {
            return Ok(false);
        }
        order.status = OrderStatus::Processed;
        order.accrual = accrual;
        if let Some(balance) = inner.balances.get_mut(&user_id) {
            balance.current += accrual;
        }
        Ok(true)
    }

    async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        sum: Decimal,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .withdrawals
            .iter()
            .any(|w| w.order_number == order_number)
        {
            return Err(StorageError::Duplicate);
        }
        let balance = inner
            .balances
            .get_mut(&user_id)
            .ok_or(StorageError::NotFound)?;
        if balance.current < sum {
            return Err(StorageError::InsufficientFunds);
        }
        balance.current -= sum;
        balance.withdrawn += sum;
        inner.withdrawals.push(Withdrawal {
            id: Uuid::new_v4(),
            user_id,
            order_number: order_number.to_string(),
            sum,
            processed_at: Utc::now(),
        });
        Ok(())
    }

    async fn withdrawal_by_order(
        &self,
        order_number: &str,
    ) -> Result<Option<Withdrawal>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .withdrawals
            .iter()
            .find(|w| w.order_number == order_number)
            .cloned())
    }

    async fn withdrawals_by_user(&self, user_id: Uuid) -> Result<Vec<Withdrawal>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut list: Vec<Withdrawal> = inner
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|w| w.processed_at);
        Ok(list)
    }

    async fn park_delayed(&self, order: &OrderRef) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .delayed
            .entry(order.number.clone())
            .or_insert((order.user_id, None));
        Ok(())
    }

    async fn claim_delayed(&self, limit: i64) -> Result<Vec<OrderRef>, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let stale_before = Utc::now() - Duration::seconds(CLAIM_STALE_SECS);
        let mut numbers: Vec<String> = inner
            .delayed
            .iter()
            .filter(|(_, (_, claimed))| claimed.is_none_or(|at| at < stale_before))
            .map(|(n, _)| n.clone())
            .collect();
        numbers.sort();
        numbers.truncate(limit.max(0) as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(numbers.len());
        for number in numbers {
            let (user_id, at) = inner.delayed.get_mut(&number).unwrap();
            *at = Some(now);
            claimed.push(OrderRef {
                number: number.clone(),
                user_id: *user_id,
            });
        }
        Ok(claimed)
    }

    async fn release_delayed(&self, number: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, claimed)) = inner.delayed.get_mut(number) {
            *claimed = None;
        }
        Ok(())
    }

    async fn delete_delayed(&self, number: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.delayed.remove(number);
        Ok(())
    }

    async fn close(&self) {}
}
