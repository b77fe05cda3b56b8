//! Movement-type policy.
//!
//! Maps every movement type to its direction (inbound/outbound) and to the
//! store roles allowed to author it. The mutator uses the direction; the
//! authorization boundary uses the roles.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use shopledger_core::{DomainError, StoreRole};

/// Why a quantity changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Adjustment,
    Purchase,
    Sale,
    ReturnPurchase,
    ReturnSale,
    TransferImport,
    TransferExport,
}

/// Sign of a movement relative to on-hand quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Inbound => 1,
            Direction::Outbound => -1,
        }
    }

    /// Direction of a signed adjustment delta (`None` for zero).
    pub fn of_delta(delta: i64) -> Option<Self> {
        match delta.signum() {
            1 => Some(Direction::Inbound),
            -1 => Some(Direction::Outbound),
            _ => None,
        }
    }
}

impl MovementType {
    pub const ALL: [MovementType; 7] = [
        MovementType::Adjustment,
        MovementType::Purchase,
        MovementType::Sale,
        MovementType::ReturnPurchase,
        MovementType::ReturnSale,
        MovementType::TransferImport,
        MovementType::TransferExport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Purchase => "PURCHASE",
            MovementType::Sale => "SALE",
            MovementType::ReturnPurchase => "RETURN_PURCHASE",
            MovementType::ReturnSale => "RETURN_SALE",
            MovementType::TransferImport => "TRANSFER_IMPORT",
            MovementType::TransferExport => "TRANSFER_EXPORT",
        }
    }

    /// Fixed direction of a typed movement.
    ///
    /// `Adjustment` has none: its direction is the sign of the caller's delta.
    pub fn direction(self) -> Option<Direction> {
        match self {
            MovementType::Purchase | MovementType::ReturnSale | MovementType::TransferImport => {
                Some(Direction::Inbound)
            }
            MovementType::Sale | MovementType::ReturnPurchase | MovementType::TransferExport => {
                Some(Direction::Outbound)
            }
            MovementType::Adjustment => None,
        }
    }

    /// Classification used by typed quantity modification; adjustments are
    /// not a valid modification type.
    pub fn modification_direction(self) -> Result<Direction, DomainError> {
        self.direction()
            .ok_or_else(|| DomainError::validation("invalid type for quantity modification"))
    }

    /// Roles allowed to author a movement of this type.
    pub fn allowed_roles(self) -> &'static [StoreRole] {
        match self {
            MovementType::Adjustment
            | MovementType::TransferImport
            | MovementType::TransferExport => StoreRole::OWNER_ONLY,
            MovementType::Purchase
            | MovementType::Sale
            | MovementType::ReturnPurchase
            | MovementType::ReturnSale => StoreRole::ALL,
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("invalid movement type '{s}'")))
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            _ => Err(DomainError::validation(format!("invalid direction '{s}'"))),
        }
    }
}

/// Every operation the engine exposes, for role lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    Movement(MovementType),
    SetStatus,
    Revalue,
    ReadInventory,
    ListMovements,
    /// Product creation and product lifecycle changes.
    ManageCatalog,
}

impl Operation {
    pub fn allowed_roles(self) -> &'static [StoreRole] {
        match self {
            Operation::Movement(t) => t.allowed_roles(),
            Operation::SetStatus | Operation::ReadInventory => StoreRole::ALL,
            Operation::Revalue | Operation::ListMovements | Operation::ManageCatalog => {
                StoreRole::OWNER_ONLY
            }
        }
    }
}
