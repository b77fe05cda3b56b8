use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{AggregateRoot, DomainError, DomainResult, InventoryId, ProductId, StoreId};

use crate::catalog::ProductStatus;
use crate::movement::MovementRequest;
use crate::policy::{Direction, MovementType};

/// Inventory row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Active,
    Inactive,
    Sold,
}

impl InventoryStatus {
    pub const ALL: [InventoryStatus; 3] = [
        InventoryStatus::Active,
        InventoryStatus::Inactive,
        InventoryStatus::Sold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Active => "ACTIVE",
            InventoryStatus::Inactive => "INACTIVE",
            InventoryStatus::Sold => "SOLD",
        }
    }

    /// Only active rows accept quantity changes. A sold or inactive row must
    /// be set back to `Active` before it can be restocked.
    pub fn accepts_quantity_changes(self) -> bool {
        self == InventoryStatus::Active
    }

    /// Statuses that may only be entered once stock is exhausted.
    pub fn requires_empty_stock(self) -> bool {
        self == InventoryStatus::Sold
    }
}

impl core::fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        InventoryStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| DomainError::validation("invalid inventory status"))
    }
}

/// The single stock record of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub id: InventoryId,
    pub product_id: ProductId,
    /// Always >= 0.
    pub quantity: i64,
    pub discount: i64,
    pub total: i64,
    pub status: InventoryStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    /// Default row created alongside its product.
    pub fn new(id: InventoryId, product_id: ProductId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            product_id,
            quantity: 0,
            discount: 0,
            total: 0,
            status: InventoryStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.accepts_quantity_changes()
    }

    /// Apply a patch, bumping the row version.
    pub fn apply(&mut self, patch: &InventoryPatch, now: DateTime<Utc>) {
        if let Some(q) = patch.quantity {
            self.quantity = q;
        }
        if let Some(d) = patch.discount {
            self.discount = d;
        }
        if let Some(t) = patch.total {
            self.total = t;
        }
        if let Some(s) = patch.status {
            self.status = s;
        }
        self.version += 1;
        self.updated_at = now;
    }

    /// Diff for a status change; `None` when the row already has `status`.
    pub fn plan_status(&self, status: InventoryStatus) -> DomainResult<Option<InventoryPatch>> {
        if self.status == status {
            return Ok(None);
        }
        if status.requires_empty_stock() && self.quantity > 0 {
            return Err(DomainError::conflict(format!(
                "cannot mark as {status} while quantity > 0"
            )));
        }
        Ok(Some(InventoryPatch {
            status: Some(status),
            ..InventoryPatch::default()
        }))
    }

    /// Diff for a revaluation; `None` when nothing would change.
    pub fn plan_revaluation(&self, revaluation: &Revaluation) -> DomainResult<Option<InventoryPatch>> {
        revaluation.validate()?;

        let patch = InventoryPatch {
            discount: revaluation.discount.filter(|d| *d != self.discount),
            total: revaluation.total.filter(|t| *t != self.total),
            ..InventoryPatch::default()
        };
        Ok((!patch.is_empty()).then_some(patch))
    }
}

impl AggregateRoot for Inventory {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Partial update of an inventory row. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPatch {
    pub quantity: Option<i64>,
    pub discount: Option<i64>,
    pub total: Option<i64>,
    pub status: Option<InventoryStatus>,
}

impl InventoryPatch {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none()
            && self.discount.is_none()
            && self.total.is_none()
            && self.status.is_none()
    }
}

/// Requested discount/total values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revaluation {
    pub discount: Option<i64>,
    pub total: Option<i64>,
}

impl Revaluation {
    pub fn validate(&self) -> DomainResult<()> {
        if self.discount.is_some_and(|d| d < 0) {
            return Err(DomainError::validation("discount must be a non-negative integer"));
        }
        if self.total.is_some_and(|t| t < 0) {
            return Err(DomainError::validation("total must be a non-negative integer"));
        }
        Ok(())
    }
}

/// An inventory row as read for update, with the parent product's scope and
/// lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    pub inventory: Inventory,
    pub store_id: StoreId,
    pub product_status: ProductStatus,
}

impl InventoryRecord {
    /// Cross-store access reads as absence.
    pub fn ensure_in_store(&self, store_id: StoreId) -> DomainResult<()> {
        if self.store_id != store_id {
            return Err(DomainError::not_found("inventory not found"));
        }
        Ok(())
    }

    pub fn ensure_mutable(&self) -> DomainResult<()> {
        if !self.inventory.is_active() {
            return Err(DomainError::validation("inventory is not active"));
        }
        if self.product_status != ProductStatus::Active {
            return Err(DomainError::validation("product is not active"));
        }
        Ok(())
    }

    /// Decide the quantity change for a movement request.
    ///
    /// A manual adjustment that would drive stock negative is a state
    /// conflict; a typed outbound movement that exceeds stock is a bad
    /// request. Neither is ever clamped.
    pub fn plan_movement(&self, request: &MovementRequest) -> DomainResult<QuantityChange> {
        let (direction, magnitude) = request.resolve()?;
        self.ensure_mutable()?;

        let previous = self.inventory.quantity;
        let next = previous
            .checked_add(direction.sign() * magnitude)
            .ok_or_else(|| DomainError::validation("quantity overflow"))?;

        if next < 0 {
            return Err(match request.movement_type {
                MovementType::Adjustment => {
                    DomainError::conflict("resulting quantity cannot be negative")
                }
                _ => DomainError::validation("operation would result in negative inventory"),
            });
        }

        Ok(QuantityChange {
            movement_type: request.movement_type,
            direction,
            magnitude,
            previous,
            next,
        })
    }
}

/// Outcome of a validated movement: the new quantity and the ledger entry
/// shape that must accompany it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityChange {
    pub movement_type: MovementType,
    pub direction: Direction,
    /// Always > 0.
    pub magnitude: i64,
    pub previous: i64,
    pub next: i64,
}

impl QuantityChange {
    pub fn signed_delta(&self) -> i64 {
        self.direction.sign() * self.magnitude
    }

    pub fn patch(&self) -> InventoryPatch {
        InventoryPatch {
            quantity: Some(self.next),
            ..InventoryPatch::default()
        }
    }
}
