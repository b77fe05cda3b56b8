//! `shopledger-reconcile <store-id>`
//!
//! Compares every inventory quantity of a store with its movement ledger and
//! prints the report as JSON. Exits with status 2 when the ledger does not
//! reconcile.

use anyhow::Context;

use shopledger_auth::StoreDirectory;
use shopledger_core::StoreId;
use shopledger_infra::{with_retry, InventoryService, LedgerConfig, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopledger_observability::init();

    let store_id: StoreId = std::env::args()
        .nth(1)
        .context("usage: shopledger-reconcile <store-id>")?
        .parse()
        .context("store id must be a UUID")?;

    let config = LedgerConfig::from_env().context("invalid configuration")?;
    let ledger = PostgresLedgerStore::connect(&config)
        .await
        .context("failed to connect to the ledger database")?;
    ledger
        .ensure_schema()
        .await
        .context("failed to prepare ledger schema")?;

    // Reconciliation is an operator task; no store roles are consulted.
    let service = InventoryService::new(ledger, StoreDirectory::new());
    let report = with_retry(&config.retry, || service.reconcile(store_id))
        .await
        .with_context(|| format!("reconciliation of store {store_id} failed"))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        tracing::error!(
            store_id = %store_id,
            discrepancies = report.discrepancies.len(),
            "ledger does not reconcile"
        );
        std::process::exit(2);
    }
    Ok(())
}
