use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use shopledger_core::{ExpectedVersion, InventoryId, MovementId, ProductId, StoreId};
use shopledger_inventory::{
    Inventory, InventoryPatch, InventoryRecord, Product, ProductStatus, StockMovement, Store,
};

use super::r#trait::{InventoryRef, IsolationLevel, LedgerStore, StoreError, UnitOfWork};

#[derive(Debug, Default)]
struct Tables {
    stores: HashMap<StoreId, Store>,
    products: HashMap<ProductId, Product>,
    inventories: HashMap<InventoryId, Inventory>,
    movements: Vec<StockMovement>,
}

impl Tables {
    fn inventory_of_product(&self, product_id: ProductId) -> Option<&Inventory> {
        self.inventories.values().find(|i| i.product_id == product_id)
    }

    fn sku_taken(&self, store_id: StoreId, sku: &str) -> bool {
        self.products
            .values()
            .any(|p| p.store_id == store_id && p.sku == sku)
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Units of work read committed rows, buffer their
/// writes, and validate at commit under a single write lock: the first
/// committer wins and any unit whose read or written inventory rows moved on
/// in the meantime fails with `StoreError::Serialization`. This gives the
/// same observable outcome as a serializable database transaction for the
/// read-check-write cycles the engine performs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state of one inventory row.
    pub fn inventory(&self, id: InventoryId) -> Option<Inventory> {
        self.tables.read().ok()?.inventories.get(&id).cloned()
    }

    /// Committed movements of one product, oldest first.
    pub fn movements_of(&self, product_id: ProductId) -> Vec<StockMovement> {
        match self.tables.read() {
            Ok(t) => t
                .movements
                .iter()
                .filter(|m| m.product_id == product_id)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            tables: self.tables.clone(),
            isolation,
            reads: HashMap::new(),
            writes: HashMap::new(),
            new_stores: Vec::new(),
            new_products: Vec::new(),
            product_status: HashMap::new(),
            new_movements: Vec::new(),
        }))
    }
}

#[derive(Debug)]
struct PendingWrite {
    row: Inventory,
    /// Committed version the write was based on.
    base_version: u64,
}

#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    isolation: IsolationLevel,
    reads: HashMap<InventoryId, u64>,
    writes: HashMap<InventoryId, PendingWrite>,
    new_stores: Vec<Store>,
    new_products: Vec<(Product, Inventory)>,
    product_status: HashMap<ProductId, ProductStatus>,
    new_movements: Vec<StockMovement>,
}

impl InMemoryUnitOfWork {
    fn read_tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write_tables(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn own_inventory(&self, id: InventoryId) -> Option<&Inventory> {
        self.writes.get(&id).map(|w| &w.row).or_else(|| {
            self.new_products
                .iter()
                .map(|(_, inv)| inv)
                .find(|inv| inv.id == id)
        })
    }

    fn current_product(&self, tables: &Tables, id: ProductId) -> Option<Product> {
        let mut product = self
            .new_products
            .iter()
            .map(|(p, _)| p)
            .find(|p| p.id == id)
            .or_else(|| tables.products.get(&id))
            .cloned()?;
        if let Some(status) = self.product_status.get(&id) {
            product.status = *status;
        }
        Some(product)
    }

    fn current_store(&self, tables: &Tables, id: StoreId) -> Option<Store> {
        self.new_stores
            .iter()
            .find(|s| s.id == id)
            .or_else(|| tables.stores.get(&id))
            .cloned()
    }

    fn resolve(&self, tables: &Tables, target: InventoryRef) -> Option<InventoryId> {
        match target {
            InventoryRef::Inventory(id) => Some(id),
            InventoryRef::Product(product_id) => self
                .new_products
                .iter()
                .find(|(p, _)| p.id == product_id)
                .map(|(_, inv)| inv.id)
                .or_else(|| tables.inventory_of_product(product_id).map(|i| i.id)),
        }
    }

    fn product_in_store(&self, tables: &Tables, product_id: ProductId, store_id: StoreId) -> bool {
        self.current_product(tables, product_id)
            .is_some_and(|p| p.store_id == store_id)
    }

    /// Row as this unit sees it, plus the committed version when the row
    /// came from the shared tables rather than this unit's own writes.
    fn lookup(
        &self,
        target: InventoryRef,
    ) -> Result<Option<(InventoryRecord, Option<u64>)>, StoreError> {
        let tables = self.read_tables()?;
        let Some(id) = self.resolve(&tables, target) else {
            return Ok(None);
        };
        let (row, committed_version) = match self.own_inventory(id) {
            Some(row) => (row.clone(), None),
            None => match tables.inventories.get(&id) {
                Some(row) => (row.clone(), Some(row.version)),
                None => return Ok(None),
            },
        };
        let Some(product) = self.current_product(&tables, row.product_id) else {
            return Ok(None);
        };
        Ok(Some((
            InventoryRecord {
                inventory: row,
                store_id: product.store_id,
                product_status: product.status,
            },
            committed_version,
        )))
    }
}

fn check_version(id: InventoryId, expected: ExpectedVersion, actual: u64) -> Result<(), StoreError> {
    expected
        .check(actual)
        .map_err(|err| StoreError::Serialization(format!("inventory {id}: {err}")))
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_store(&mut self, store_id: StoreId) -> Result<Option<Store>, StoreError> {
        let tables = self.read_tables()?;
        Ok(self.current_store(&tables, store_id))
    }

    async fn insert_store(&mut self, store: &Store) -> Result<(), StoreError> {
        let exists = {
            let tables = self.read_tables()?;
            self.current_store(&tables, store.id).is_some()
        };
        if exists {
            return Err(StoreError::Duplicate(format!("store {} already exists", store.id)));
        }
        self.new_stores.push(store.clone());
        Ok(())
    }

    async fn find_inventory(
        &mut self,
        target: InventoryRef,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        let Some((record, committed_version)) = self.lookup(target)? else {
            return Ok(None);
        };
        if let Some(version) = committed_version {
            self.reads.entry(record.inventory.id).or_insert(version);
        }
        Ok(Some(record))
    }

    // No row locks here, so a plain read is tracked like a locking one.
    async fn read_inventory(
        &mut self,
        target: InventoryRef,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.find_inventory(target).await
    }

    async fn list_inventories(&mut self, store_id: StoreId) -> Result<Vec<Inventory>, StoreError> {
        let tables = self.read_tables()?;
        let mut rows: Vec<Inventory> = tables
            .inventories
            .values()
            .filter(|inv| self.own_inventory(inv.id).is_none())
            .cloned()
            .chain(self.writes.values().map(|w| w.row.clone()))
            .chain(self.new_products.iter().map(|(_, inv)| inv.clone()))
            .filter(|inv| self.product_in_store(&tables, inv.product_id, store_id))
            .collect();
        rows.sort_by_key(|inv| (inv.created_at, *inv.id.as_uuid()));
        Ok(rows)
    }

    async fn update_inventory(
        &mut self,
        id: InventoryId,
        patch: &InventoryPatch,
        expected: ExpectedVersion,
    ) -> Result<Inventory, StoreError> {
        if patch.quantity.is_some_and(|q| q < 0) {
            return Err(StoreError::Constraint("inventories.quantity >= 0".to_string()));
        }

        if let Some((_, inv)) = self.new_products.iter_mut().find(|(_, inv)| inv.id == id) {
            check_version(id, expected, inv.version)?;
            inv.apply(patch, Utc::now());
            return Ok(inv.clone());
        }

        let (mut row, base_version) = match self.writes.remove(&id) {
            Some(pending) => (pending.row, pending.base_version),
            None => {
                let tables = self.read_tables()?;
                let row = tables
                    .inventories
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("inventory {id}")))?;
                let version = row.version;
                (row, version)
            }
        };

        if let Err(err) = check_version(id, expected, row.version) {
            self.writes.insert(id, PendingWrite { row, base_version });
            return Err(err);
        }

        row.apply(patch, Utc::now());
        let written = row.clone();
        self.writes.insert(id, PendingWrite { row, base_version });
        Ok(written)
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        if movement.quantity <= 0 {
            return Err(StoreError::Constraint("stock_movements.quantity > 0".to_string()));
        }
        let product_known = {
            let tables = self.read_tables()?;
            self.current_product(&tables, movement.product_id).is_some()
        };
        if !product_known {
            return Err(StoreError::Constraint(format!(
                "stock_movements.product_id references unknown product {}",
                movement.product_id
            )));
        }
        self.new_movements.push(movement.clone());
        Ok(())
    }

    async fn list_movements(
        &mut self,
        store_id: StoreId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let tables = self.read_tables()?;
        Ok(tables
            .movements
            .iter()
            .chain(self.new_movements.iter())
            .filter(|m| product_id.is_none_or(|p| m.product_id == p))
            .filter(|m| self.product_in_store(&tables, m.product_id, store_id))
            .cloned()
            .collect())
    }

    async fn find_movement(
        &mut self,
        store_id: StoreId,
        id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let tables = self.read_tables()?;
        Ok(tables
            .movements
            .iter()
            .chain(self.new_movements.iter())
            .find(|m| m.id == id)
            .filter(|m| self.product_in_store(&tables, m.product_id, store_id))
            .cloned())
    }

    async fn find_product_by_sku(
        &mut self,
        store_id: StoreId,
        sku: &str,
    ) -> Result<Option<Product>, StoreError> {
        let tables = self.read_tables()?;
        let found = self
            .new_products
            .iter()
            .map(|(p, _)| p)
            .chain(tables.products.values())
            .find(|p| p.store_id == store_id && p.sku == sku)
            .map(|p| p.id);
        Ok(found.and_then(|id| self.current_product(&tables, id)))
    }

    async fn insert_product(
        &mut self,
        product: &Product,
        inventory: &Inventory,
    ) -> Result<(), StoreError> {
        {
            let tables = self.read_tables()?;
            if self.current_store(&tables, product.store_id).is_none() {
                return Err(StoreError::Constraint(format!(
                    "products.store_id references unknown store {}",
                    product.store_id
                )));
            }
            let own_dup = self
                .new_products
                .iter()
                .any(|(p, _)| p.store_id == product.store_id && p.sku == product.sku);
            if own_dup || tables.sku_taken(product.store_id, &product.sku) {
                return Err(StoreError::Duplicate(format!(
                    "sku '{}' already exists in store {}",
                    product.sku, product.store_id
                )));
            }
        }
        self.new_products.push((product.clone(), inventory.clone()));
        Ok(())
    }

    async fn set_product_status(
        &mut self,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<(), StoreError> {
        let known = {
            let tables = self.read_tables()?;
            self.current_product(&tables, product_id).is_some()
        };
        if !known {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }
        self.product_status.insert(product_id, status);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut tables = this.write_tables()?;

        // 1) Validate against whatever committed since this unit read.
        if this.isolation == IsolationLevel::Serializable {
            for (id, read_version) in &this.reads {
                let current = tables.inventories.get(id).map(|i| i.version);
                if current != Some(*read_version) {
                    return Err(StoreError::Serialization(format!(
                        "inventory {id} was modified by a concurrent transaction"
                    )));
                }
            }
        }
        for (id, pending) in &this.writes {
            let current = tables.inventories.get(id).map(|i| i.version);
            if current != Some(pending.base_version) {
                return Err(StoreError::Serialization(format!(
                    "inventory {id} was modified by a concurrent transaction"
                )));
            }
        }
        for store in &this.new_stores {
            if tables.stores.contains_key(&store.id) {
                return Err(StoreError::Duplicate(format!("store {} already exists", store.id)));
            }
        }
        for (product, _) in &this.new_products {
            if tables.sku_taken(product.store_id, &product.sku) {
                return Err(StoreError::Duplicate(format!(
                    "sku '{}' already exists in store {}",
                    product.sku, product.store_id
                )));
            }
        }

        // 2) Apply atomically (we hold the write lock).
        for store in this.new_stores.iter().cloned() {
            tables.stores.insert(store.id, store);
        }
        for (product, inventory) in this.new_products.iter().cloned() {
            tables.products.insert(product.id, product);
            tables.inventories.insert(inventory.id, inventory);
        }
        for (product_id, status) in &this.product_status {
            if let Some(p) = tables.products.get_mut(product_id) {
                p.status = *status;
            }
        }
        for (id, pending) in this.writes.iter() {
            tables.inventories.insert(*id, pending.row.clone());
        }
        tables.movements.extend(this.new_movements.iter().cloned());

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
