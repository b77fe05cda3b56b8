//! `shopledger-infra`: storage and orchestration for the stock ledger.
//!
//! - [`ledger_store`]: the transactional storage boundary (`LedgerStore` /
//!   `UnitOfWork`) with in-memory and Postgres implementations
//! - [`recorder`]: append-only stock movement writes
//! - [`service`]: the inventory engine (quantity mutation, status,
//!   valuation, reads, product creation, reconciliation)
//! - [`retry`]: bounded backoff for callers that hit a retryable conflict
//! - [`config`]: environment-driven settings

pub mod config;
pub mod error;
pub mod ledger_store;
pub mod recorder;
pub mod retry;
pub mod service;

pub use config::{ConfigError, LedgerConfig};
pub use error::ServiceError;
pub use ledger_store::{
    InMemoryLedgerStore, InventoryRef, IsolationLevel, LedgerStore, PostgresLedgerStore,
    StoreError, UnitOfWork,
};
pub use recorder::MovementRecorder;
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use service::InventoryService;
