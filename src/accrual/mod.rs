//! Accrual settlement pipeline: remote client, retry envelope, worker pools.

pub mod client;
pub mod worker;

pub use client::{AccrualApi, AccrualClient, AccrualError, AccrualReport, AccrualStatus};
pub use worker::{Settler, WorkerPool};
