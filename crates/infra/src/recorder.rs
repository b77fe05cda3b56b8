//! Movement recorder: the only writer of `stock_movements`.

use chrono::Utc;
use tracing::debug;

use shopledger_core::{MovementId, ProductId, StoreId};
use shopledger_inventory::{NewMovement, StockMovement};

use crate::error::ServiceError;
use crate::ledger_store::UnitOfWork;

/// Appends immutable stock movements inside a caller-provided unit of work.
///
/// The recorder never opens its own transaction: the mutator lends it the
/// unit that also carries the quantity update, so both commit or neither does.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovementRecorder;

impl MovementRecorder {
    pub fn new() -> Self {
        Self
    }

    pub async fn record(
        &self,
        uow: &mut dyn UnitOfWork,
        movement: NewMovement,
    ) -> Result<StockMovement, ServiceError> {
        movement.validate()?;
        let movement = movement.into_movement(MovementId::new(), Utc::now());
        uow.insert_movement(&movement).await?;
        debug!(
            movement_id = %movement.id,
            product_id = %movement.product_id,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            "movement recorded"
        );
        Ok(movement)
    }

    /// Store-scoped ledger, oldest first. Unknown stores are `NotFound`.
    pub async fn list_for_store(
        &self,
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, ServiceError> {
        if uow.find_store(store_id).await?.is_none() {
            return Err(ServiceError::NotFound("store not found".to_string()));
        }
        Ok(uow.list_movements(store_id, product_id).await?)
    }

    pub async fn find(
        &self,
        uow: &mut dyn UnitOfWork,
        store_id: StoreId,
        id: MovementId,
    ) -> Result<StockMovement, ServiceError> {
        uow.find_movement(store_id, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("movement not found".to_string()))
    }
}
