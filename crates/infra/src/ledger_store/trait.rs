use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use shopledger_core::{ExpectedVersion, InventoryId, MovementId, ProductId, StoreId};
use shopledger_inventory::{
    Inventory, InventoryPatch, InventoryRecord, Product, ProductStatus, StockMovement, Store,
};

/// Transaction isolation requested from the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    /// Required for every read-check-write of an inventory quantity.
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// How a caller addresses an inventory row: directly, or through its
/// product (exactly one inventory per product).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InventoryRef {
    Inventory(InventoryId),
    Product(ProductId),
}

impl From<InventoryId> for InventoryRef {
    fn from(value: InventoryId) -> Self {
        InventoryRef::Inventory(value)
    }
}

impl From<ProductId> for InventoryRef {
    fn from(value: ProductId) -> Self {
        InventoryRef::Product(value)
    }
}

/// Ledger store operation error.
///
/// These are **infrastructure errors**. `Serialization` and `LockTimeout`
/// mean the transaction lost a race and was rolled back by the store; the
/// same request may succeed when retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// A table constraint rejected the write (e.g. `quantity >= 0`).
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A scoped transaction.
///
/// Acquired by a mutator for its whole duration and lent (`&mut`) to
/// collaborators such as the movement recorder, so every row operation of one
/// request lands in the same atomic unit. Dropping a unit without `commit`
/// discards its writes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_store(&mut self, store_id: StoreId) -> Result<Option<Store>, StoreError>;

    async fn insert_store(&mut self, store: &Store) -> Result<(), StoreError>;

    /// Read an inventory row for update, joined with its product's scope and
    /// lifecycle.
    async fn find_inventory(
        &mut self,
        target: InventoryRef,
    ) -> Result<Option<InventoryRecord>, StoreError>;

    /// Same row as `find_inventory` without taking a row lock. For reads
    /// that never write the row back.
    async fn read_inventory(
        &mut self,
        target: InventoryRef,
    ) -> Result<Option<InventoryRecord>, StoreError>;

    /// All inventories whose product belongs to `store_id`.
    async fn list_inventories(&mut self, store_id: StoreId) -> Result<Vec<Inventory>, StoreError>;

    /// Conditional update: fails with `Serialization` when the row is no
    /// longer at `expected`. Returns the row as written.
    async fn update_inventory(
        &mut self,
        id: InventoryId,
        patch: &InventoryPatch,
        expected: ExpectedVersion,
    ) -> Result<Inventory, StoreError>;

    /// Append-only.
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    /// Movements of products in `store_id`, oldest first, optionally for one product.
    async fn list_movements(
        &mut self,
        store_id: StoreId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, StoreError>;

    async fn find_movement(
        &mut self,
        store_id: StoreId,
        id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError>;

    async fn find_product_by_sku(
        &mut self,
        store_id: StoreId,
        sku: &str,
    ) -> Result<Option<Product>, StoreError>;

    /// Insert a product together with its single inventory row.
    async fn insert_product(
        &mut self,
        product: &Product,
        inventory: &Inventory,
    ) -> Result<(), StoreError>;

    async fn set_product_status(
        &mut self,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Durable, transactional storage beneath the engine.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin(isolation).await
    }
}
