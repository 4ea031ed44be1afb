//! Shared application state for the HTTP surface.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{AuthService, Tokenizer};
use crate::models::OrderRef;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub auth: AuthService,
    /// Producer side of the fast queue; send blocks under backpressure.
    pub order_tx: mpsc::Sender<OrderRef>,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        tokenizer: Arc<dyn Tokenizer>,
        order_tx: mpsc::Sender<OrderRef>,
    ) -> Self {
        let auth = AuthService::new(storage.clone(), tokenizer.clone());
        Self {
            storage,
            tokenizer,
            auth,
            order_tx,
        }
    }
}
