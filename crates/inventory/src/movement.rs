//! Append-only stock movement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopledger_core::{ActorId, DomainError, DomainResult, MovementId, ProductId};

use crate::item::QuantityChange;
use crate::policy::{Direction, MovementType};

/// An immutable ledger entry. `quantity` is a magnitude; `direction` carries
/// the sign so adjustments can be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    /// Always > 0.
    pub quantity: i64,
    pub direction: Direction,
    pub actor_id: Option<ActorId>,
    pub note: Option<String>,
    pub related_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn signed_quantity(&self) -> i64 {
        self.direction.sign() * self.quantity
    }
}

/// A movement about to be appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub direction: Direction,
    pub actor_id: Option<ActorId>,
    pub note: Option<String>,
    pub related_order_id: Option<Uuid>,
}

impl NewMovement {
    /// Ledger entry matching a validated quantity change.
    pub fn for_change(
        product_id: ProductId,
        change: &QuantityChange,
        actor_id: ActorId,
        request: &MovementRequest,
    ) -> Self {
        Self {
            product_id,
            movement_type: change.movement_type,
            quantity: change.magnitude,
            direction: change.direction,
            actor_id: Some(actor_id),
            note: request.note.clone(),
            related_order_id: request.related_order_id,
        }
    }

    /// Movements carry magnitudes only.
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be a positive integer"));
        }
        if let Some(expected) = self.movement_type.direction() {
            if expected != self.direction {
                return Err(DomainError::validation(format!(
                    "{} movements are {:?}",
                    self.movement_type, expected
                )));
            }
        }
        Ok(())
    }

    pub fn into_movement(self, id: MovementId, now: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            product_id: self.product_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            direction: self.direction,
            actor_id: self.actor_id,
            note: self.note,
            related_order_id: self.related_order_id,
            created_at: now,
        }
    }
}

/// A requested quantity change.
///
/// Adjustments carry a signed delta; every other type carries a positive
/// quantity whose sign comes from the movement-type policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub delta: i64,
    pub note: Option<String>,
    pub related_order_id: Option<Uuid>,
}

impl MovementRequest {
    pub fn adjustment(delta: i64) -> Self {
        Self {
            movement_type: MovementType::Adjustment,
            delta,
            note: None,
            related_order_id: None,
        }
    }

    pub fn typed(movement_type: MovementType, quantity: i64) -> Self {
        Self {
            movement_type,
            delta: quantity,
            note: None,
            related_order_id: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_related_order(mut self, order_id: Uuid) -> Self {
        self.related_order_id = Some(order_id);
        self
    }

    /// Input validation, independent of any stored state.
    pub fn resolve(&self) -> DomainResult<(Direction, i64)> {
        if self.delta == 0 {
            return Err(DomainError::validation("delta must be a non-zero integer"));
        }
        match self.movement_type {
            MovementType::Adjustment => {
                let magnitude = self
                    .delta
                    .checked_abs()
                    .ok_or_else(|| DomainError::validation("quantity overflow"))?;
                // delta != 0, so a direction always exists.
                let direction = Direction::of_delta(self.delta)
                    .ok_or_else(|| DomainError::validation("delta must be a non-zero integer"))?;
                Ok((direction, magnitude))
            }
            t => {
                let direction = t.modification_direction()?;
                if self.delta < 0 {
                    return Err(DomainError::validation(format!(
                        "{t} quantity must be positive; direction is implied by the type"
                    )));
                }
                Ok((direction, self.delta))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delta_is_rejected_for_every_type() {
        for t in MovementType::ALL {
            let err = MovementRequest::typed(t, 0).resolve().unwrap_err();
            assert_eq!(err, DomainError::validation("delta must be a non-zero integer"));
        }
    }

    #[test]
    fn typed_requests_reject_negative_quantities() {
        let err = MovementRequest::typed(MovementType::Purchase, -3)
            .resolve()
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn adjustment_magnitude_is_absolute() {
        assert_eq!(
            MovementRequest::adjustment(-7).resolve().unwrap(),
            (Direction::Outbound, 7)
        );
        assert!(MovementRequest::adjustment(i64::MIN).resolve().is_err());
    }

    #[test]
    fn new_movement_validation_checks_positivity_and_direction() {
        let base = NewMovement {
            product_id: ProductId::new(),
            movement_type: MovementType::Sale,
            quantity: 2,
            direction: Direction::Outbound,
            actor_id: None,
            note: None,
            related_order_id: None,
        };
        assert!(base.validate().is_ok());

        let zero = NewMovement {
            quantity: 0,
            ..base.clone()
        };
        assert_eq!(
            zero.validate().unwrap_err(),
            DomainError::validation("quantity must be a positive integer")
        );

        let wrong_way = NewMovement {
            direction: Direction::Inbound,
            ..base
        };
        assert!(wrong_way.validate().is_err());
    }

    #[test]
    fn movement_serializes_type_field_on_the_wire() {
        let m = NewMovement {
            product_id: ProductId::new(),
            movement_type: MovementType::TransferImport,
            quantity: 4,
            direction: Direction::Inbound,
            actor_id: None,
            note: Some("from warehouse B".into()),
            related_order_id: None,
        }
        .into_movement(MovementId::new(), Utc::now());

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "TRANSFER_IMPORT");
        assert_eq!(json["direction"], "inbound");
        assert_eq!(m.signed_quantity(), 4);
    }
}
