//! Ledger reconciliation.
//!
//! Quantity is maintained incrementally; the movement ledger is the audit
//! trail. For every product the signed sum of its movements must equal the
//! inventory's quantity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use shopledger_core::{InventoryId, ProductId, StoreId};

use crate::item::Inventory;
use crate::movement::StockMovement;

/// Signed running sum of one product's movements.
fn ledger_balance<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(StockMovement::signed_quantity).sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub recorded_quantity: i64,
    pub ledger_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub store_id: StoreId,
    pub checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    pub fn build(store_id: StoreId, inventories: &[Inventory], movements: &[StockMovement]) -> Self {
        let mut by_product: HashMap<ProductId, Vec<&StockMovement>> = HashMap::new();
        for m in movements {
            by_product.entry(m.product_id).or_default().push(m);
        }

        let discrepancies = inventories
            .iter()
            .filter_map(|inv| {
                let ledger_quantity = by_product
                    .get(&inv.product_id)
                    .map_or(0, |ms| ledger_balance(ms.iter().copied()));
                (ledger_quantity != inv.quantity).then(|| Discrepancy {
                    inventory_id: inv.id,
                    product_id: inv.product_id,
                    recorded_quantity: inv.quantity,
                    ledger_quantity,
                })
            })
            .collect();

        Self {
            store_id,
            checked: inventories.len(),
            discrepancies,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shopledger_core::{ActorId, MovementId};

    use crate::catalog::ProductStatus;
    use crate::item::{InventoryRecord, InventoryStatus};
    use crate::movement::{MovementRequest, NewMovement};
    use crate::policy::MovementType;

    fn fresh_record() -> InventoryRecord {
        InventoryRecord {
            inventory: Inventory::new(InventoryId::new(), ProductId::new(), Utc::now()),
            store_id: StoreId::new(),
            product_status: ProductStatus::Active,
        }
    }

    /// Run a request through the domain exactly like the service does,
    /// returning the ledger entry when it was accepted.
    fn step(rec: &mut InventoryRecord, req: &MovementRequest) -> Option<StockMovement> {
        let change = rec.plan_movement(req).ok()?;
        rec.inventory.apply(&change.patch(), Utc::now());
        Some(
            NewMovement::for_change(rec.inventory.product_id, &change, ActorId::new(), req)
                .into_movement(MovementId::new(), Utc::now()),
        )
    }

    #[test]
    fn tampered_quantity_is_reported() {
        let mut rec = fresh_record();
        let movements: Vec<_> = [
            MovementRequest::typed(MovementType::Purchase, 10),
            MovementRequest::adjustment(-3),
        ]
        .iter()
        .filter_map(|r| step(&mut rec, r))
        .collect();

        let report = ReconciliationReport::build(rec.store_id, &[rec.inventory.clone()], &movements);
        assert!(report.is_consistent());
        assert_eq!(ledger_balance(&movements), 7);

        rec.inventory.quantity = 9;
        let report = ReconciliationReport::build(rec.store_id, &[rec.inventory.clone()], &movements);
        assert_eq!(report.checked, 1);
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy {
                inventory_id: rec.inventory.id,
                product_id: rec.inventory.product_id,
                recorded_quantity: 9,
                ledger_quantity: 7,
            }]
        );
    }

    #[test]
    fn untouched_inventory_reconciles_with_empty_ledger() {
        let rec = fresh_record();
        let report = ReconciliationReport::build(rec.store_id, &[rec.inventory], &[]);
        assert!(report.is_consistent());
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_request() -> impl Strategy<Value = MovementRequest> {
            prop_oneof![
                (-50i64..50).prop_map(MovementRequest::adjustment),
                (0usize..MovementType::ALL.len(), 1i64..50)
                    .prop_map(|(i, q)| MovementRequest::typed(MovementType::ALL[i], q)),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: after any sequence of accepted movements the ledger
            /// reconciles with the inventory and stock never went negative.
            #[test]
            fn ledger_reconciles_with_quantity(
                requests in prop::collection::vec(any_request(), 1..60)
            ) {
                let mut rec = fresh_record();
                let mut movements = Vec::new();
                for req in &requests {
                    if let Some(m) = step(&mut rec, req) {
                        prop_assert!(m.quantity > 0);
                        movements.push(m);
                    }
                    prop_assert!(rec.inventory.quantity >= 0);
                }

                prop_assert_eq!(ledger_balance(&movements), rec.inventory.quantity);
                let report = ReconciliationReport::build(
                    rec.store_id,
                    &[rec.inventory.clone()],
                    &movements,
                );
                prop_assert!(report.is_consistent());
            }
        }
    }
}
