//! Inventory engine: the quantity mutator, the status/valuation manager and
//! the store-scoped reads, all behind one authorization boundary.
//!
//! ## Execution model
//!
//! Every public operation:
//! 1. validates its input (no IO),
//! 2. asks the injected [`Authorizer`] whether the actor holds a role the
//!    operation allows,
//! 3. opens one unit of work on the [`LedgerStore`], reads, decides via the
//!    pure domain types, writes,
//! 4. commits, or rolls back on any failure.
//!
//! Quantity changes and their stock movement share one serializable unit of
//! work. A concurrent writer that wins the race surfaces as
//! [`ServiceError::RetryableConflict`]; the engine never retries on its own
//! (see [`crate::retry::with_retry`]).

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use shopledger_auth::Authorizer;
use shopledger_core::{
    ActorId, DomainResult, ExpectedVersion, InventoryId, MovementId, ProductId, StoreId,
    StoreRole,
};
use shopledger_inventory::{
    Inventory, InventoryPatch, InventoryRecord, InventoryStatus, MovementRequest, MovementType,
    NewMovement, NewProduct, Operation, Product, ProductStatus, ReconciliationReport, Revaluation,
    StockMovement,
};

use crate::error::ServiceError;
use crate::ledger_store::{InventoryRef, IsolationLevel, LedgerStore, UnitOfWork};
use crate::recorder::MovementRecorder;

pub struct InventoryService<S, A> {
    store: S,
    authorizer: A,
    recorder: MovementRecorder,
}

impl<S, A> InventoryService<S, A>
where
    S: LedgerStore,
    A: Authorizer,
{
    pub fn new(store: S, authorizer: A) -> Self {
        Self {
            store,
            authorizer,
            recorder: MovementRecorder::new(),
        }
    }

    fn authorize(
        &self,
        store_id: StoreId,
        actor_id: ActorId,
        operation: Operation,
    ) -> Result<StoreRole, ServiceError> {
        let role = self
            .authorizer
            .authorize(store_id, actor_id, operation.allowed_roles())?;
        debug!(%store_id, %actor_id, ?operation, %role, "authorized");
        Ok(role)
    }

    /// Commit on success, roll back on failure. The original error wins over
    /// a rollback failure.
    async fn finish<T>(
        uow: Box<dyn UnitOfWork>,
        result: Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        match result {
            Ok(value) => {
                uow.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                if err.is_retryable() {
                    warn!(error = %err, "unit of work lost a concurrent race");
                }
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Quantity mutation
    // ---------------------------------------------------------------------

    /// Manual adjustment by a signed `delta`.
    ///
    /// Paired with exactly one `ADJUSTMENT` movement of magnitude `|delta|`.
    /// A result below zero is a `Conflict`.
    pub async fn adjust_quantity(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        target: impl Into<InventoryRef>,
        delta: i64,
    ) -> Result<Inventory, ServiceError> {
        self.apply_movement(actor_id, store_id, target, MovementRequest::adjustment(delta))
            .await
    }

    /// Typed inbound/outbound change of `quantity` units.
    ///
    /// `ADJUSTMENT` is not a modification type. An outbound change exceeding
    /// stock is a `BadRequest`. Writes one movement of `movement_type`.
    pub async fn modify(
        &self,
        actor_id: ActorId,
        movement_type: MovementType,
        store_id: StoreId,
        target: impl Into<InventoryRef>,
        quantity: i64,
    ) -> Result<Inventory, ServiceError> {
        movement_type.modification_direction()?;
        self.apply_movement(
            actor_id,
            store_id,
            target,
            MovementRequest::typed(movement_type, quantity),
        )
        .await
    }

    /// The single quantity mutation path: read-for-update, check, write the
    /// new quantity and append the movement, all in one serializable unit.
    #[instrument(
        skip(self, target, request),
        fields(
            store_id = %store_id,
            actor_id = %actor_id,
            movement_type = %request.movement_type,
            delta = request.delta
        ),
        err
    )]
    pub async fn apply_movement(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        target: impl Into<InventoryRef>,
        request: MovementRequest,
    ) -> Result<Inventory, ServiceError> {
        let target = target.into();
        request.resolve()?;
        self.authorize(store_id, actor_id, Operation::Movement(request.movement_type))?;

        let mut uow = self.store.begin(IsolationLevel::Serializable).await?;
        let result = self
            .apply_movement_in(uow.as_mut(), actor_id, store_id, target, &request)
            .await;
        let (inventory, movement) = Self::finish(uow, result).await?;

        info!(
            inventory_id = %inventory.id,
            movement_id = %movement.id,
            quantity = inventory.quantity,
            version = inventory.version,
            "quantity changed"
        );
        Ok(inventory)
    }

    async fn apply_movement_in(
        &self,
        uow: &mut dyn UnitOfWork,
        actor_id: ActorId,
        store_id: StoreId,
        target: InventoryRef,
        request: &MovementRequest,
    ) -> Result<(Inventory, StockMovement), ServiceError> {
        let record = Self::find_in_store(uow, store_id, target).await?;

        let change = record.plan_movement(request)?;
        let updated = uow
            .update_inventory(
                record.inventory.id,
                &change.patch(),
                ExpectedVersion::Exact(record.inventory.version),
            )
            .await?;

        let movement = self
            .recorder
            .record(
                uow,
                NewMovement::for_change(record.inventory.product_id, &change, actor_id, request),
            )
            .await?;

        Ok((updated, movement))
    }

    // ---------------------------------------------------------------------
    // Status / valuation
    // ---------------------------------------------------------------------

    /// Idempotent status change. `SOLD` requires an empty row.
    ///
    /// Single-row update, conditional on the version that was read.
    #[instrument(skip(self), fields(store_id = %store_id, inventory_id = %inventory_id), err)]
    pub async fn set_status(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        inventory_id: InventoryId,
        status: InventoryStatus,
    ) -> Result<Inventory, ServiceError> {
        self.authorize(store_id, actor_id, Operation::SetStatus)?;

        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let result =
            Self::patch_inventory_in(uow.as_mut(), store_id, inventory_id, |inv| {
                inv.plan_status(status)
            })
            .await;
        let (inventory, written) = Self::finish(uow, result).await?;

        if written {
            info!(%status, version = inventory.version, "inventory status changed");
        } else {
            debug!(%status, "status unchanged; no write");
        }
        Ok(inventory)
    }

    /// Update discount and/or total. Fields equal to the current values are
    /// dropped; an empty diff is a no-op.
    #[instrument(skip(self), fields(store_id = %store_id, inventory_id = %inventory_id), err)]
    pub async fn revalue(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        inventory_id: InventoryId,
        revaluation: Revaluation,
    ) -> Result<Inventory, ServiceError> {
        revaluation.validate()?;
        self.authorize(store_id, actor_id, Operation::Revalue)?;

        let mut uow = self.store.begin(IsolationLevel::Serializable).await?;
        let result =
            Self::patch_inventory_in(uow.as_mut(), store_id, inventory_id, |inv| {
                inv.plan_revaluation(&revaluation)
            })
            .await;
        let (inventory, written) = Self::finish(uow, result).await?;

        if written {
            info!(
                discount = inventory.discount,
                total = inventory.total,
                "inventory revalued"
            );
        } else {
            debug!("revaluation matches current values; no write");
        }
        Ok(inventory)
    }

    /// Read, compute a diff, and write it only when non-empty. Returns the
    /// row and whether a write happened.
    async fn patch_inventory_in<F>(
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
        inventory_id: InventoryId,
        plan: F,
    ) -> Result<(Inventory, bool), ServiceError>
    where
        F: FnOnce(&Inventory) -> DomainResult<Option<InventoryPatch>> + Send,
    {
        let record = Self::find_in_store(uow, store_id, inventory_id.into()).await?;

        match plan(&record.inventory)? {
            None => Ok((record.inventory, false)),
            Some(patch) => {
                let updated = uow
                    .update_inventory(
                        inventory_id,
                        &patch,
                        ExpectedVersion::Exact(record.inventory.version),
                    )
                    .await?;
                Ok((updated, true))
            }
        }
    }

    async fn find_in_store(
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
        target: InventoryRef,
    ) -> Result<InventoryRecord, ServiceError> {
        let record = uow.find_inventory(target).await?;
        Self::scoped(record, store_id)
    }

    /// Like `find_in_store`, without locking the row.
    async fn read_in_store(
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
        target: InventoryRef,
    ) -> Result<InventoryRecord, ServiceError> {
        let record = uow.read_inventory(target).await?;
        Self::scoped(record, store_id)
    }

    fn scoped(
        record: Option<InventoryRecord>,
        store_id: StoreId,
    ) -> Result<InventoryRecord, ServiceError> {
        let record =
            record.ok_or_else(|| ServiceError::NotFound("inventory not found".to_string()))?;
        record.ensure_in_store(store_id)?;
        Ok(record)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// All inventories of a store. An empty store is `NotFound`.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn find_all(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
    ) -> Result<Vec<Inventory>, ServiceError> {
        self.authorize(store_id, actor_id, Operation::ReadInventory)?;

        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let result = uow.list_inventories(store_id).await.map_err(ServiceError::from);
        let rows = Self::finish(uow, result).await?;

        if rows.is_empty() {
            return Err(ServiceError::NotFound(
                "no inventory found for store".to_string(),
            ));
        }
        Ok(rows)
    }

    #[instrument(skip(self), fields(store_id = %store_id, inventory_id = %inventory_id), err)]
    pub async fn find_by_id(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        inventory_id: InventoryId,
    ) -> Result<Inventory, ServiceError> {
        self.authorize(store_id, actor_id, Operation::ReadInventory)?;

        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let result = Self::read_in_store(uow.as_mut(), store_id, inventory_id.into())
            .await
            .map(|record| record.inventory);
        Self::finish(uow, result).await
    }

    /// Stock ledger of a store, oldest first, optionally for one product.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn list_movements(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, ServiceError> {
        self.authorize(store_id, actor_id, Operation::ListMovements)?;

        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let result = self
            .recorder
            .list_for_store(uow.as_mut(), store_id, product_id)
            .await;
        Self::finish(uow, result).await
    }

    #[instrument(skip(self), fields(store_id = %store_id, movement_id = %movement_id), err)]
    pub async fn find_movement(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        movement_id: MovementId,
    ) -> Result<StockMovement, ServiceError> {
        self.authorize(store_id, actor_id, Operation::ListMovements)?;

        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let result = self.recorder.find(uow.as_mut(), store_id, movement_id).await;
        Self::finish(uow, result).await
    }

    // ---------------------------------------------------------------------
    // Catalog / maintenance
    // ---------------------------------------------------------------------

    /// Create a product with its single inventory row (quantity 0, ACTIVE).
    /// The SKU must be unique within the store.
    #[instrument(skip(self, new), fields(store_id = %new.store_id, sku = %new.sku), err)]
    pub async fn create_product(
        &self,
        actor_id: ActorId,
        new: NewProduct,
    ) -> Result<(Product, Inventory), ServiceError> {
        new.validate()?;
        let store_id = new.store_id;
        self.authorize(store_id, actor_id, Operation::ManageCatalog)?;

        let now = Utc::now();
        let product = new.into_product(ProductId::new(), now);
        let inventory = Inventory::new(InventoryId::new(), product.id, now);

        let mut uow = self.store.begin(IsolationLevel::Serializable).await?;
        let result = Self::insert_product_in(uow.as_mut(), &product, &inventory).await;
        Self::finish(uow, result).await?;

        info!(product_id = %product.id, inventory_id = %inventory.id, "product created");
        Ok((product, inventory))
    }

    /// Activate or deactivate a product. Quantity changes require an active
    /// product; re-applying the current status is a no-op.
    #[instrument(skip(self), fields(store_id = %store_id, product_id = %product_id), err)]
    pub async fn set_product_status(
        &self,
        actor_id: ActorId,
        store_id: StoreId,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<(), ServiceError> {
        self.authorize(store_id, actor_id, Operation::ManageCatalog)?;

        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let result = Self::set_product_status_in(uow.as_mut(), store_id, product_id, status).await;
        let written = Self::finish(uow, result).await?;

        if written {
            info!(status = status.as_str(), "product status changed");
        } else {
            debug!(status = status.as_str(), "product status unchanged; no write");
        }
        Ok(())
    }

    /// Compare every inventory quantity of a store with the signed sum of
    /// its movements.
    ///
    /// Operator-level maintenance; not gated by store roles.
    #[instrument(skip(self), fields(store_id = %store_id), err)]
    pub async fn reconcile(&self, store_id: StoreId) -> Result<ReconciliationReport, ServiceError> {
        let mut uow = self.store.begin(IsolationLevel::RepeatableRead).await?;
        let result = Self::reconcile_in(uow.as_mut(), store_id).await;
        let report = Self::finish(uow, result).await?;

        if report.is_consistent() {
            info!(checked = report.checked, "ledger reconciles");
        } else {
            warn!(
                checked = report.checked,
                discrepancies = report.discrepancies.len(),
                "ledger does not reconcile"
            );
        }
        Ok(report)
    }

    async fn insert_product_in(
        uow: &mut dyn UnitOfWork,
        product: &Product,
        inventory: &Inventory,
    ) -> Result<(), ServiceError> {
        if uow.find_store(product.store_id).await?.is_none() {
            return Err(ServiceError::NotFound("store not found".to_string()));
        }
        if uow
            .find_product_by_sku(product.store_id, &product.sku)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "sku '{}' already exists in store",
                product.sku
            )));
        }
        uow.insert_product(product, inventory).await?;
        Ok(())
    }

    async fn set_product_status_in(
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<bool, ServiceError> {
        let record = Self::read_in_store(uow, store_id, product_id.into()).await?;
        if record.product_status == status {
            return Ok(false);
        }
        uow.set_product_status(product_id, status).await?;
        Ok(true)
    }

    async fn reconcile_in(
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
    ) -> Result<ReconciliationReport, ServiceError> {
        if uow.find_store(store_id).await?.is_none() {
            return Err(ServiceError::NotFound("store not found".to_string()));
        }
        let inventories = uow.list_inventories(store_id).await?;
        let movements = uow.list_movements(store_id, None).await?;
        Ok(ReconciliationReport::build(store_id, &inventories, &movements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use shopledger_auth::StoreDirectory;
    use shopledger_inventory::{Direction, Store};

    use crate::ledger_store::InMemoryLedgerStore;
    use crate::retry::{with_retry, RetryPolicy};

    type Service = InventoryService<InMemoryLedgerStore, Arc<StoreDirectory>>;

    struct Fixture {
        service: Arc<Service>,
        ledger: InMemoryLedgerStore,
        directory: Arc<StoreDirectory>,
        owner: ActorId,
        member: ActorId,
        shop: StoreId,
        product: ProductId,
        inventory: InventoryId,
    }

    async fn open_store(ledger: &InMemoryLedgerStore, directory: &StoreDirectory, owner: ActorId) -> StoreId {
        let shop = Store {
            id: StoreId::new(),
            name: "Shop".into(),
            owner_id: owner,
        };
        let mut uow = ledger.begin(IsolationLevel::Serializable).await.unwrap();
        uow.insert_store(&shop).await.unwrap();
        uow.commit().await.unwrap();
        directory.register_store(shop.id, owner).unwrap();
        shop.id
    }

    /// One store, one product stocked to `quantity` through an adjustment.
    async fn fixture(quantity: i64) -> Fixture {
        let ledger = InMemoryLedgerStore::new();
        let directory = Arc::new(StoreDirectory::new());
        let owner = ActorId::new();
        let member = ActorId::new();
        let shop = open_store(&ledger, &directory, owner).await;
        directory.add_member(shop, member, StoreRole::Member).unwrap();

        let service = Arc::new(InventoryService::new(ledger.clone(), directory.clone()));
        let (product, inventory) = service
            .create_product(
                owner,
                NewProduct {
                    store_id: shop,
                    sku: "SKU-1".into(),
                    name: "Widget".into(),
                },
            )
            .await
            .unwrap();
        if quantity > 0 {
            service
                .adjust_quantity(owner, shop, inventory.id, quantity)
                .await
                .unwrap();
        }

        Fixture {
            service,
            ledger,
            directory,
            owner,
            member,
            shop,
            product: product.id,
            inventory: inventory.id,
        }
    }

    impl Fixture {
        fn quantity(&self) -> i64 {
            self.ledger.inventory(self.inventory).unwrap().quantity
        }

        fn movements(&self) -> Vec<StockMovement> {
            self.ledger.movements_of(self.product)
        }
    }

    #[tokio::test]
    async fn adjustment_to_zero_then_sold_then_reactivated() {
        let f = fixture(10).await;

        let inv = f
            .service
            .adjust_quantity(f.owner, f.shop, f.inventory, -10)
            .await
            .unwrap();
        assert_eq!(inv.quantity, 0);

        let movements = f.movements();
        assert_eq!(movements.len(), 2);
        let last = movements.last().unwrap();
        assert_eq!(last.movement_type, MovementType::Adjustment);
        assert_eq!(last.quantity, 10);
        assert_eq!(last.direction, Direction::Outbound);
        assert_eq!(last.actor_id, Some(f.owner));

        let sold = f
            .service
            .set_status(f.owner, f.shop, f.inventory, InventoryStatus::Sold)
            .await
            .unwrap();
        assert_eq!(sold.status, InventoryStatus::Sold);

        let err = f
            .service
            .adjust_quantity(f.owner, f.shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::BadRequest("inventory is not active".into()));
        assert_eq!(f.movements().len(), 2);

        f.service
            .set_status(f.owner, f.shop, f.inventory, InventoryStatus::Active)
            .await
            .unwrap();
        let restocked = f
            .service
            .adjust_quantity(f.owner, f.shop, f.inventory, 1)
            .await
            .unwrap();
        assert_eq!(restocked.quantity, 1);
    }

    #[tokio::test]
    async fn adjustment_below_zero_is_a_conflict_and_persists_nothing() {
        let f = fixture(3).await;
        let before = f.ledger.inventory(f.inventory).unwrap();

        let err = f
            .service
            .adjust_quantity(f.owner, f.shop, f.inventory, -4)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)), "{err:?}");
        assert_eq!(f.ledger.inventory(f.inventory).unwrap(), before);
        assert_eq!(f.movements().len(), 1);
    }

    #[tokio::test]
    async fn zero_delta_is_a_bad_request() {
        let f = fixture(3).await;
        let err = f
            .service
            .adjust_quantity(f.owner, f.shop, f.inventory, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));

        let err = f
            .service
            .modify(f.owner, MovementType::Purchase, f.shop, f.inventory, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn product_reference_resolves_to_its_inventory() {
        let f = fixture(2).await;
        let inv = f
            .service
            .adjust_quantity(f.owner, f.shop, f.product, 5)
            .await
            .unwrap();
        assert_eq!(inv.id, f.inventory);
        assert_eq!(inv.quantity, 7);
    }

    #[tokio::test]
    async fn sale_exceeding_stock_is_a_bad_request() {
        let f = fixture(10).await;
        let err = f
            .service
            .modify(f.member, MovementType::Sale, f.shop, f.inventory, 12)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::BadRequest("operation would result in negative inventory".into())
        );
        assert_eq!(f.quantity(), 10);
        assert_eq!(f.movements().len(), 1);
    }

    #[tokio::test]
    async fn modify_rejects_adjustment_type() {
        let f = fixture(10).await;
        let err = f
            .service
            .modify(f.owner, MovementType::Adjustment, f.shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::BadRequest("invalid type for quantity modification".into())
        );
    }

    #[tokio::test]
    async fn typed_movements_write_their_own_ledger_entry() {
        let f = fixture(10).await;
        let order = uuid::Uuid::now_v7();

        let inv = f
            .service
            .apply_movement(
                f.member,
                f.shop,
                f.inventory,
                MovementRequest::typed(MovementType::Sale, 4)
                    .with_note("counter sale")
                    .with_related_order(order),
            )
            .await
            .unwrap();
        assert_eq!(inv.quantity, 6);

        let inv = f
            .service
            .modify(f.member, MovementType::ReturnSale, f.shop, f.inventory, 1)
            .await
            .unwrap();
        assert_eq!(inv.quantity, 7);

        let movements = f.movements();
        assert_eq!(movements.len(), 3);
        let sale = &movements[1];
        assert_eq!(sale.movement_type, MovementType::Sale);
        assert_eq!(sale.quantity, 4);
        assert_eq!(sale.direction, Direction::Outbound);
        assert_eq!(sale.actor_id, Some(f.member));
        assert_eq!(sale.note.as_deref(), Some("counter sale"));
        assert_eq!(sale.related_order_id, Some(order));
        assert_eq!(movements[2].direction, Direction::Inbound);
    }

    #[tokio::test]
    async fn roles_gate_each_movement_type() {
        let f = fixture(10).await;
        let outsider = ActorId::new();

        let err = f
            .service
            .adjust_quantity(f.member, f.shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = f
            .service
            .modify(f.member, MovementType::TransferExport, f.shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        f.service
            .modify(f.owner, MovementType::TransferExport, f.shop, f.inventory, 1)
            .await
            .unwrap();
        f.service
            .modify(f.member, MovementType::Purchase, f.shop, f.inventory, 1)
            .await
            .unwrap();

        let err = f
            .service
            .find_all(outsider, f.shop)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = f
            .service
            .revalue(f.member, f.shop, f.inventory, Revaluation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        f.directory.remove_member(f.shop, f.member).unwrap();
        let err = f
            .service
            .modify(f.member, MovementType::Purchase, f.shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn other_stores_never_see_the_row() {
        let f = fixture(10).await;
        let other_owner = ActorId::new();
        let other_shop = open_store(&f.ledger, &f.directory, other_owner).await;

        let err = f
            .service
            .adjust_quantity(other_owner, other_shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("inventory not found".into()));

        let err = f
            .service
            .find_by_id(other_owner, other_shop, f.inventory)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = f
            .service
            .set_status(other_owner, other_shop, f.inventory, InventoryStatus::Inactive)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = f
            .service
            .find_all(f.owner, StoreId::new())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("store not found".into()));

        assert_eq!(f.quantity(), 10);
    }

    #[tokio::test]
    async fn store_members_read_back_the_committed_row() {
        let f = fixture(6).await;
        let committed = f.ledger.inventory(f.inventory).unwrap();

        let row = f
            .service
            .find_by_id(f.member, f.shop, f.inventory)
            .await
            .unwrap();
        assert_eq!(row, committed);
        assert_eq!(row.quantity, 6);

        let rows = f.service.find_all(f.member, f.shop).await.unwrap();
        assert_eq!(rows, vec![committed]);

        let outsider = ActorId::new();
        let err = f
            .service
            .find_by_id(outsider, f.shop, f.inventory)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        let err = f.service.find_all(outsider, f.shop).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn set_status_twice_writes_once() {
        let f = fixture(0).await;

        let first = f
            .service
            .set_status(f.member, f.shop, f.inventory, InventoryStatus::Inactive)
            .await
            .unwrap();
        let second = f
            .service
            .set_status(f.member, f.shop, f.inventory, InventoryStatus::Inactive)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(f.ledger.inventory(f.inventory).unwrap().version, first.version);
    }

    #[tokio::test]
    async fn sold_requires_empty_stock() {
        let f = fixture(1).await;
        let err = f
            .service
            .set_status(f.owner, f.shop, f.inventory, InventoryStatus::Sold)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let parsed: Result<InventoryStatus, ServiceError> =
            "BROKEN".parse::<InventoryStatus>().map_err(ServiceError::from);
        assert!(matches!(parsed, Err(ServiceError::BadRequest(_))));
    }

    #[tokio::test]
    async fn revalue_writes_only_the_diff() {
        let f = fixture(5).await;

        let changed = f
            .service
            .revalue(
                f.owner,
                f.shop,
                f.inventory,
                Revaluation {
                    discount: Some(10),
                    total: Some(250),
                },
            )
            .await
            .unwrap();
        assert_eq!((changed.discount, changed.total), (10, 250));
        assert_eq!(changed.quantity, 5);

        let same = f
            .service
            .revalue(
                f.owner,
                f.shop,
                f.inventory,
                Revaluation {
                    discount: Some(10),
                    total: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(same, changed);

        let err = f
            .service
            .revalue(
                f.owner,
                f.shop,
                f.inventory,
                Revaluation {
                    discount: Some(-1),
                    total: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn inactive_product_blocks_quantity_changes() {
        let f = fixture(4).await;

        let err = f
            .service
            .set_product_status(f.member, f.shop, f.product, ProductStatus::Inactive)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        f.service
            .set_product_status(f.owner, f.shop, f.product, ProductStatus::Inactive)
            .await
            .unwrap();
        let err = f
            .service
            .modify(f.member, MovementType::Sale, f.shop, f.inventory, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::BadRequest("product is not active".into()));

        f.service
            .set_product_status(f.owner, f.shop, f.product, ProductStatus::Active)
            .await
            .unwrap();
        let inv = f
            .service
            .modify(f.member, MovementType::Sale, f.shop, f.inventory, 1)
            .await
            .unwrap();
        assert_eq!(inv.quantity, 3);
    }

    #[tokio::test]
    async fn empty_store_is_not_found() {
        let ledger = InMemoryLedgerStore::new();
        let directory = Arc::new(StoreDirectory::new());
        let owner = ActorId::new();
        let shop = open_store(&ledger, &directory, owner).await;
        let service = InventoryService::new(ledger, directory);

        let err = service.find_all(owner, shop).await.unwrap_err();
        assert_eq!(err, ServiceError::NotFound("no inventory found for store".into()));
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_conflict() {
        let f = fixture(0).await;
        let err = f
            .service
            .create_product(
                f.owner,
                NewProduct {
                    store_id: f.shop,
                    sku: " SKU-1 ".into(),
                    name: "Other".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let rows = f.service.find_all(f.owner, f.shop).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn movement_reads_are_owner_only_and_scoped() {
        let f = fixture(4).await;

        let all = f.service.list_movements(f.owner, f.shop, None).await.unwrap();
        assert_eq!(all.len(), 1);
        let one = f
            .service
            .find_movement(f.owner, f.shop, all[0].id)
            .await
            .unwrap();
        assert_eq!(one, all[0]);

        assert!(matches!(
            f.service.list_movements(f.member, f.shop, None).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.find_movement(f.owner, f.shop, MovementId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reconcile_flags_quantity_changed_outside_the_ledger() {
        let f = fixture(6).await;
        f.service
            .modify(f.member, MovementType::Sale, f.shop, f.inventory, 2)
            .await
            .unwrap();
        assert!(f.service.reconcile(f.shop).await.unwrap().is_consistent());

        let mut uow = f.ledger.begin(IsolationLevel::Serializable).await.unwrap();
        uow.update_inventory(
            f.inventory,
            &InventoryPatch {
                quantity: Some(9),
                ..InventoryPatch::default()
            },
            ExpectedVersion::Any,
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let report = f.service.reconcile(f.shop).await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].recorded_quantity, 9);
        assert_eq!(report.discrepancies[0].ledger_quantity, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_never_overdraw() {
        for _ in 0..20 {
            let f = fixture(10).await;

            let a = {
                let service = f.service.clone();
                let (owner, shop, inv) = (f.owner, f.shop, f.inventory);
                tokio::spawn(async move { service.adjust_quantity(owner, shop, inv, -5).await })
            };
            let b = {
                let service = f.service.clone();
                let (owner, shop, inv) = (f.owner, f.shop, f.inventory);
                tokio::spawn(async move { service.adjust_quantity(owner, shop, inv, -8).await })
            };
            let results = [a.await.unwrap(), b.await.unwrap()];

            let ok: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(ok.len(), 1, "{results:?}");
            for r in &results {
                if let Err(e) = r {
                    assert!(
                        matches!(e, ServiceError::Conflict(_) | ServiceError::RetryableConflict(_)),
                        "{e:?}"
                    );
                }
            }
            let q = f.quantity();
            assert!(q == 5 || q == 2, "quantity {q}");
            assert_eq!(f.movements().len(), 2);
            assert!(f.service.reconcile(f.shop).await.unwrap().is_consistent());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retried_concurrent_purchases_all_land() {
        let f = fixture(0).await;
        let policy = RetryPolicy::fixed(100, Duration::from_millis(1));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = f.service.clone();
                let policy = policy.clone();
                let (member, shop, inv) = (f.member, f.shop, f.inventory);
                tokio::spawn(async move {
                    with_retry(&policy, || {
                        service.modify(member, MovementType::Purchase, shop, inv, 1)
                    })
                    .await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(f.quantity(), 8);
        assert_eq!(f.movements().len(), 8);
        assert!(f.service.reconcile(f.shop).await.unwrap().is_consistent());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn committed_adjustments_track_the_signed_sum(deltas in prop::collection::vec(-20i64..=20, 1..25)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let f = fixture(0).await;
                    let mut expected = 0i64;
                    for delta in deltas {
                        let before = f.quantity();
                        match f.service.adjust_quantity(f.owner, f.shop, f.inventory, delta).await {
                            Ok(inv) => {
                                expected += delta;
                                assert_eq!(inv.quantity, before + delta);
                            }
                            Err(ServiceError::BadRequest(_)) => assert_eq!(delta, 0),
                            Err(ServiceError::Conflict(_)) => assert!(before + delta < 0),
                            Err(other) => panic!("unexpected error {other:?}"),
                        }
                        assert!(f.quantity() >= 0);
                    }
                    assert_eq!(f.quantity(), expected);
                    assert!(f.service.reconcile(f.shop).await.unwrap().is_consistent());
                });
            }
        }
    }
}
