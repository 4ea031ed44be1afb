//! Settlement workers
//!
//! Two pools share one retry envelope ([`Settler::settle`]):
//!
//! - fast workers drain the bounded in-memory queue fed by the submission
//!   handler; an order the envelope cannot resolve is parked in the
//!   `orders_delayed` table;
//! - delayed workers tick on a fixed period, claim a batch of parked
//!   orders and replay the envelope; resolution deletes the row, anything
//!   else releases the claim for a later tick.
//!
//! A single order failure never takes a worker down; faults are logged
//! with order context and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::models::OrderRef;
use crate::storage::Storage;

use super::client::{AccrualApi, AccrualError, AccrualStatus};

/// Retry envelope around the remote accrual call, shared by both pools.
pub struct Settler {
    api: Arc<dyn AccrualApi>,
    storage: Arc<dyn Storage>,
    repeats: u32,
}

impl Settler {
    pub fn new(api: Arc<dyn AccrualApi>, storage: Arc<dyn Storage>, repeats: u32) -> Self {
        Self {
            api,
            storage,
            repeats,
        }
    }

    /// Poll the remote service for one order and apply the outcome.
    ///
    /// Returns `true` when the order reached a terminal state (`INVALID` or
    /// `PROCESSED`), `false` when this pass could not resolve it: the order
    /// is unknown remotely, still in flight, or the attempt budget ran out.
    ///
    /// A `429` honors `Retry-After` and restarts the attempt budget, so a
    /// rate-limited remote stretches the envelope rather than burning it.
    pub async fn settle(&self, order: &OrderRef) -> bool {
        let mut attempt = 1u32;
        while attempt <= self.repeats {
            debug!(order = %order.number, attempt, "requesting accrual");
            match self.api.order_report(&order.number).await {
                Err(AccrualError::Transport(e)) => {
                    warn!(order = %order.number, error = %e, "accrual request failed");
                    attempt += 1;
                }
                Err(AccrualError::RateLimited(secs)) => {
                    debug!(order = %order.number, secs, "accrual rate limited");
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    attempt = 1;
                }
                Err(AccrualError::Unregistered) => {
                    debug!(order = %order.number, "order unknown to accrual system");
                    return false;
                }
                Err(AccrualError::Malformed(e)) => {
                    warn!(order = %order.number, error = %e, "unusable accrual response");
                    attempt += 1;
                }
                Ok(report) => match report.status {
                    AccrualStatus::Registered => {
                        debug!(order = %order.number, "accrual registered, not started");
                        return false;
                    }
                    AccrualStatus::Processing => {
                        if let Err(e) = self.storage.mark_order_processing(&order.number).await {
                            error!(order = %order.number, error = %e, "status update failed");
                            attempt += 1;
                            continue;
                        }
                        return false;
                    }
                    AccrualStatus::Invalid => {
                        if let Err(e) = self.storage.mark_order_invalid(&order.number).await {
                            error!(order = %order.number, error = %e, "status update failed");
                            return false;
                        }
                        info!(order = %order.number, "order settled as INVALID");
                        return true;
                    }
                    AccrualStatus::Processed => {
                        let accrual = report.accrual.unwrap_or_default();
                        match self
                            .storage
                            .settle_order_processed(&order.number, order.user_id, accrual)
                            .await
                        {
                            Ok(true) => {
                                info!(order = %order.number, %accrual, "order settled, balance credited");
                                return true;
                            }
                            Ok(false) => {
                                debug!(order = %order.number, "order was already settled");
                                return true;
                            }
                            Err(e) => {
                                error!(order = %order.number, error = %e, "settlement failed");
                                return false;
                            }
                        }
                    }
                },
            }
        }
        debug!(order = %order.number, "attempt budget exhausted");
        false
    }
}

/// Long-lived fast and delayed worker tasks around one [`Settler`].
pub struct WorkerPool {
    settler: Arc<Settler>,
    storage: Arc<dyn Storage>,
    fast_workers: usize,
    delayed_workers: usize,
    delay: Duration,
    batch: i64,
}

impl WorkerPool {
    pub fn new(settler: Arc<Settler>, storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self {
            settler,
            storage,
            fast_workers: config.accrual_workers,
            delayed_workers: config.accrual_delayed_workers,
            delay: Duration::from_secs(config.accrual_delay),
            batch: config.accrual_delayed_batch,
        }
    }

    /// Spawn every worker task. They run until `shutdown` is cancelled or
    /// the queue sender side is dropped.
    pub fn start(&self, orders: mpsc::Receiver<OrderRef>, shutdown: CancellationToken) {
        let orders = Arc::new(Mutex::new(orders));
        for wid in 0..self.fast_workers {
            tokio::spawn(fast_worker(
                wid,
                self.settler.clone(),
                self.storage.clone(),
                orders.clone(),
                shutdown.clone(),
            ));
        }
        for wid in 0..self.delayed_workers {
            tokio::spawn(delayed_worker(
                wid,
                self.settler.clone(),
                self.storage.clone(),
                self.delay,
                self.batch,
                shutdown.clone(),
            ));
        }
    }
}

async fn fast_worker(
    wid: usize,
    settler: Arc<Settler>,
    storage: Arc<dyn Storage>,
    orders: Arc<Mutex<mpsc::Receiver<OrderRef>>>,
    shutdown: CancellationToken,
) {
    info!(wid, "accrual worker started");
    loop {
        let order = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = async { orders.lock().await.recv().await } => {
                match next {
                    Some(order) => order,
                    None => break,
                }
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(wid, order = %order.number, "settlement abandoned on shutdown");
                break;
            }
            resolved = settler.settle(&order) => {
                if !resolved
                    && let Err(e) = storage.park_delayed(&order).await
                {
                    error!(order = %order.number, error = %e, "parking order for delayed retry failed");
                }
            }
        }
    }
    info!(wid, "accrual worker stopped");
}

async fn delayed_worker(
    wid: usize,
    settler: Arc<Settler>,
    storage: Arc<dyn Storage>,
    delay: Duration,
    batch: i64,
    shutdown: CancellationToken,
) {
    info!(wid, "delayed accrual worker started");
    let mut tick = tokio::time::interval(delay);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await; // interval fires immediately; the first batch waits one period

    'run: loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let claimed = match storage.claim_delayed(batch).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(wid, error = %e, "claiming delayed orders failed");
                        continue;
                    }
                };
                for order in claimed {
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'run,
                        resolved = settler.settle(&order) => {
                            let followup = if resolved {
                                storage.delete_delayed(&order.number).await
                            } else {
                                storage.release_delayed(&order.number).await
                            };
                            if let Err(e) = followup {
                                error!(order = %order.number, error = %e, "delayed row bookkeeping failed");
                            }
                        }
                    }
                }
            }
        }
    }
    info!(wid, "delayed accrual worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::client::AccrualReport;
    use crate::models::{Order, OrderStatus, User, UserBalance};
    use crate::storage::memory::MemoryStorage;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Replays a fixed list of replies, then keeps answering `Unregistered`.
    struct ScriptedApi {
        replies: StdMutex<VecDeque<Result<AccrualReport, AccrualError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(replies: Vec<Result<AccrualReport, AccrualError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AccrualApi for ScriptedApi {
        async fn order_report(&self, _number: &str) -> Result<AccrualReport, AccrualError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AccrualError::Unregistered))
        }
    }

    fn report(status: AccrualStatus, accrual: Option<Decimal>) -> Result<AccrualReport, AccrualError> {
        Ok(AccrualReport {
            order: "79927398713".to_string(),
            status,
            accrual,
        })
    }

    async fn storage_with_order() -> (Arc<MemoryStorage>, OrderRef) {
        let storage = Arc::new(MemoryStorage::new());
        let user_id = Uuid::new_v4();
        let user = User {
            id: user_id,
            login: format!("u-{user_id}"),
            pwdhash: "0".repeat(64),
        };
        let balance = UserBalance {
            id: Uuid::new_v4(),
            user_id,
            current: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        };
        storage.create_user(&user, &balance).await.unwrap();
        let order = Order {
            number: "79927398713".to_string(),
            status: OrderStatus::New,
            user_id,
            accrual: Decimal::ZERO,
            uploaded_at: chrono::Utc::now(),
        };
        storage.add_order(&order).await.unwrap();
        (
            storage,
            OrderRef {
                number: order.number,
                user_id,
            },
        )
    }

    #[tokio::test]
    async fn processed_report_settles_and_credits() {
        let (storage, order) = storage_with_order().await;
        let api = ScriptedApi::new(vec![report(
            AccrualStatus::Processed,
            Some(Decimal::new(425, 1)),
        )]);
        let settler = Settler::new(api.clone(), storage.clone(), 3);

        assert!(settler.settle(&order).await);

        let stored = storage
            .order_by_number(&order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Processed);
        assert_eq!(stored.accrual, Decimal::new(425, 1));
        let balance = storage.balance_by_user(order.user_id).await.unwrap();
        assert_eq!(balance.current, Decimal::new(425, 1));
    }

    #[tokio::test]
    async fn second_processed_settle_does_not_credit_again() {
        let (storage, order) = storage_with_order().await;
        let accrual = Some(Decimal::new(10, 0));
        let api = ScriptedApi::new(vec![
            report(AccrualStatus::Processed, accrual),
            report(AccrualStatus::Processed, accrual),
        ]);
        let settler = Settler::new(api.clone(), storage.clone(), 3);

        assert!(settler.settle(&order).await);
        assert!(settler.settle(&order).await); // resolved, but no second credit

        let balance = storage.balance_by_user(order.user_id).await.unwrap();
        assert_eq!(balance.current, Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn registered_report_is_unresolved_without_writes() {
        let (storage, order) = storage_with_order().await;
        let api = ScriptedApi::new(vec![report(AccrualStatus::Registered, None)]);
        let settler = Settler::new(api, storage.clone(), 3);

        assert!(!settler.settle(&order).await);
        let stored = storage
            .order_by_number(&order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn processing_report_advances_status_but_stays_unresolved() {
        let (storage, order) = storage_with_order().await;
        let api = ScriptedApi::new(vec![report(AccrualStatus::Processing, None)]);
        let settler = Settler::new(api, storage.clone(), 3);

        assert!(!settler.settle(&order).await);
        let stored = storage
            .order_by_number(&order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn invalid_report_resolves_without_credit() {
        let (storage, order) = storage_with_order().await;
        let api = ScriptedApi::new(vec![report(AccrualStatus::Invalid, None)]);
        let settler = Settler::new(api, storage.clone(), 3);

        assert!(settler.settle(&order).await);
        let stored = storage
            .order_by_number(&order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Invalid);
        let balance = storage.balance_by_user(order.user_id).await.unwrap();
        assert_eq!(balance.current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn transport_faults_exhaust_the_attempt_budget() {
        let (storage, order) = storage_with_order().await;
        let api = ScriptedApi::new(vec![
            Err(AccrualError::Transport("refused".to_string())),
            Err(AccrualError::Transport("refused".to_string())),
            Err(AccrualError::Transport("refused".to_string())),
        ]);
        let settler = Settler::new(api.clone(), storage, 3);

        assert!(!settler.settle(&order).await);
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_sleeps_and_restarts_the_budget() {
        let (storage, order) = storage_with_order().await;
        // Budget of 2: the transport fault after the 429 would already be
        // attempt 3 without the reset.
        let api = ScriptedApi::new(vec![
            Err(AccrualError::Transport("refused".to_string())),
            Err(AccrualError::RateLimited(3)),
            Err(AccrualError::Transport("refused".to_string())),
            report(AccrualStatus::Processed, Some(Decimal::new(5, 0))),
        ]);
        let settler = Settler::new(api.clone(), storage.clone(), 2);

        let started = tokio::time::Instant::now();
        assert!(settler.settle(&order).await);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(api.calls(), 4);

        let balance = storage.balance_by_user(order.user_id).await.unwrap();
        assert_eq!(balance.current, Decimal::new(5, 0));
    }

    fn pool_config(delay_secs: u64) -> Config {
        let mut config = Config::default();
        config.accrual_workers = 1;
        config.accrual_delayed_workers = 1;
        config.accrual_delay = delay_secs;
        config.accrual_delayed_batch = 10;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn fast_worker_parks_unresolved_orders() {
        let (storage, order) = storage_with_order().await;
        let api = ScriptedApi::new(vec![Err(AccrualError::Unregistered)]);
        let settler = Arc::new(Settler::new(api, storage.clone(), 3));
        let pool = WorkerPool::new(settler, storage.clone(), &pool_config(3600));

        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        pool.start(rx, shutdown.clone());

        tx.send(order).await.unwrap();
        while storage.delayed_len() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_worker_settles_and_clears_the_row() {
        let (storage, order) = storage_with_order().await;
        storage.park_delayed(&order).await.unwrap();

        let api = ScriptedApi::new(vec![report(
            AccrualStatus::Processed,
            Some(Decimal::new(10, 0)),
        )]);
        let settler = Arc::new(Settler::new(api, storage.clone(), 3));
        let pool = WorkerPool::new(settler, storage.clone(), &pool_config(2));

        let (_tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        pool.start(rx, shutdown.clone());

        while storage.delayed_len() != 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let balance = storage.balance_by_user(order.user_id).await.unwrap();
        assert_eq!(balance.current, Decimal::new(10, 0));
        shutdown.cancel();
    }
}
