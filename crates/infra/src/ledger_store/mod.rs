//! Ledger store boundary.
//!
//! The inventory engine delegates every concurrency decision to the store's
//! transaction manager. This module defines that boundary as an explicit
//! unit of work, plus an in-memory backend (tests/dev) and a Postgres
//! backend.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{InventoryRef, IsolationLevel, LedgerStore, StoreError, UnitOfWork};
