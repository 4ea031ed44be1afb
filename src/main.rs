use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use loyaltymart::accrual::{AccrualClient, Settler, WorkerPool};
use loyaltymart::auth::JwtTokenizer;
use loyaltymart::config::Config;
use loyaltymart::gateway::{self, state::AppState};
use loyaltymart::storage::{PgStorage, Storage};
use loyaltymart::{logging, models::OrderRef};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("configuration failed")?;
    let _log_guard = logging::init(&config.log_level);

    tracing::info!(
        version = env!("GIT_HASH"),
        run_address = %config.run_address,
        accrual_system_address = %config.accrual_system_address,
        log_level = %config.log_level,
        orders_queue_size = config.orders_queue_size,
        accrual_workers = config.accrual_workers,
        accrual_delayed_workers = config.accrual_delayed_workers,
        accrual_delay = config.accrual_delay,
        accrual_delayed_batch = config.accrual_delayed_batch,
        accrual_req_repeats = config.accrual_req_repeats,
        "starting loyaltymart"
    );

    let storage: Arc<dyn Storage> = Arc::new(
        PgStorage::connect(&config.database_uri)
            .await
            .context("storage initialization failed")?,
    );

    // Fast queue: submission handlers block here under backpressure.
    let (order_tx, order_rx) = mpsc::channel::<OrderRef>(config.orders_queue_size);

    let shutdown = CancellationToken::new();

    let accrual_api = Arc::new(AccrualClient::new(&config.accrual_system_address));
    let settler = Arc::new(Settler::new(
        accrual_api,
        storage.clone(),
        config.accrual_req_repeats,
    ));
    WorkerPool::new(settler, storage.clone(), &config).start(order_rx, shutdown.clone());

    let tokenizer = Arc::new(JwtTokenizer::new(&config.token_key, config.token_timeout));
    let state = Arc::new(AppState::new(storage.clone(), tokenizer, order_tx));

    gateway::run_server(&config.run_address, state).await?;

    // The listener is closed and in-flight requests are done. Stop the
    // workers, give logging and stray storage writes a moment, then close.
    shutdown.cancel();
    tokio::time::sleep(Duration::from_secs(1)).await;
    storage.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}
