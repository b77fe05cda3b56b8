//! Inventory domain module.
//!
//! This crate contains the business rules of the stock ledger, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage): the
//! inventory row and its status/valuation rules, the append-only stock
//! movement record, and the movement-type policy shared by the mutator and
//! the authorization boundary.

pub mod catalog;
pub mod item;
pub mod ledger;
pub mod movement;
pub mod policy;

pub use catalog::{NewProduct, Product, ProductStatus, Store};
pub use item::{
    Inventory, InventoryPatch, InventoryRecord, InventoryStatus, QuantityChange, Revaluation,
};
pub use ledger::{Discrepancy, ReconciliationReport};
pub use movement::{MovementRequest, NewMovement, StockMovement};
pub use policy::{Direction, MovementType, Operation};
