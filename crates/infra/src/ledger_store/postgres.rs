//! Postgres-backed ledger store.
//!
//! Every unit of work is one database transaction. `find_inventory` locks
//! the row (`FOR UPDATE OF i`) and `read_inventory` does not. Inventory
//! writes are conditional on the row's `version`, so concurrent
//! read-check-write cycles on the same inventory are serialized by the
//! database. Table constraints (`quantity >= 0`, `quantity > 0` on
//! movements, unique `(store_id, sku)`) back the domain rules.
//!
//! ## Error Mapping
//!
//! | SQLSTATE | StoreError | Scenario |
//! |----------|------------|----------|
//! | `40001` | `Serialization` | Serializable transaction lost a race |
//! | `40P01` | `Serialization` | Deadlock victim |
//! | `55P03` | `LockTimeout` | Row lock not acquired within `lock_timeout` |
//! | `23505` | `Duplicate` | Unique violation (e.g. sku taken in store) |
//! | `23503` / `23514` | `Constraint` | Foreign key or check constraint |
//! | other | `Backend` | Connection failures, pool closed, decode errors |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use shopledger_core::{ActorId, ExpectedVersion, InventoryId, MovementId, ProductId, StoreId};
use shopledger_inventory::{
    Direction, Inventory, InventoryPatch, InventoryRecord, InventoryStatus, MovementType, Product,
    ProductStatus, StockMovement, Store,
};

use crate::config::LedgerConfig;

use super::r#trait::{InventoryRef, IsolationLevel, LedgerStore, StoreError, UnitOfWork};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS stores (
        id         UUID PRIMARY KEY,
        name       TEXT NOT NULL,
        owner_id   UUID NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id         UUID PRIMARY KEY,
        store_id   UUID NOT NULL REFERENCES stores (id),
        sku        TEXT NOT NULL,
        name       TEXT NOT NULL,
        status     TEXT NOT NULL DEFAULT 'ACTIVE',
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (store_id, sku)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventories (
        id         UUID PRIMARY KEY,
        product_id UUID NOT NULL UNIQUE REFERENCES products (id),
        quantity   BIGINT NOT NULL DEFAULT 0 CHECK (quantity >= 0),
        discount   BIGINT NOT NULL DEFAULT 0 CHECK (discount >= 0),
        total      BIGINT NOT NULL DEFAULT 0 CHECK (total >= 0),
        status     TEXT NOT NULL DEFAULT 'ACTIVE',
        version    BIGINT NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        id               UUID PRIMARY KEY,
        product_id       UUID NOT NULL REFERENCES products (id),
        type             TEXT NOT NULL,
        quantity         BIGINT NOT NULL CHECK (quantity > 0),
        direction        TEXT NOT NULL,
        actor_id         UUID NULL,
        note             TEXT NULL,
        related_order_id UUID NULL,
        created_at       TIMESTAMPTZ NOT NULL
    )
    "#,
];

const INVENTORY_COLUMNS: &str = r#"
    i.id, i.product_id, i.quantity, i.discount, i.total, i.status, i.version,
    i.created_at, i.updated_at, p.store_id, p.status AS product_status
"#;

const MOVEMENT_COLUMNS: &str = r#"
    m.id, m.product_id, m.type, m.quantity, m.direction, m.actor_id, m.note,
    m.related_order_id, m.created_at
"#;

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Open a pool sized and tuned from `config`.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, config.lock_timeout))
    }

    /// Create the ledger tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(isolation = isolation.as_sql()), err)]
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let set_isolation = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&set_isolation)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PostgresUnitOfWork { tx }))
    }
}

/// One open Postgres transaction.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PostgresUnitOfWork {
    async fn current_version(&mut self, id: InventoryId) -> Result<Option<u64>, StoreError> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM inventories WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("current_version", e))?;
        Ok(version.map(|v| v as u64))
    }

    async fn select_inventory(
        &mut self,
        target: InventoryRef,
        for_update: bool,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        let (filter, key) = match target {
            InventoryRef::Inventory(id) => ("i.id", *id.as_uuid()),
            InventoryRef::Product(id) => ("i.product_id", *id.as_uuid()),
        };
        let lock = if for_update { " FOR UPDATE OF i" } else { "" };
        let sql = format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventories i \
             JOIN products p ON p.id = i.product_id \
             WHERE {filter} = $1{lock}"
        );

        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("select_inventory", e))?;

        row.map(|r| -> Result<InventoryRecord, StoreError> { decode::<InventoryRow>(&r)?.into_record() })
            .transpose()
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn find_store(&mut self, store_id: StoreId) -> Result<Option<Store>, StoreError> {
        let row = sqlx::query("SELECT id, name, owner_id FROM stores WHERE id = $1")
            .bind(store_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_store", e))?;

        row.map(|r| decode::<StoreRow>(&r).map(Store::from)).transpose()
    }

    async fn insert_store(&mut self, store: &Store) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO stores (id, name, owner_id) VALUES ($1, $2, $3)")
            .bind(store.id.as_uuid())
            .bind(&store.name)
            .bind(store.owner_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_store", e))?;
        Ok(())
    }

    async fn find_inventory(
        &mut self,
        target: InventoryRef,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.select_inventory(target, true).await
    }

    async fn read_inventory(
        &mut self,
        target: InventoryRef,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.select_inventory(target, false).await
    }

    async fn list_inventories(&mut self, store_id: StoreId) -> Result<Vec<Inventory>, StoreError> {
        let sql = format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventories i \
             JOIN products p ON p.id = i.product_id \
             WHERE p.store_id = $1 \
             ORDER BY i.created_at ASC, i.id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(store_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_inventories", e))?;

        rows.iter()
            .map(|r| -> Result<Inventory, StoreError> {
                Ok(decode::<InventoryRow>(r)?.into_record()?.inventory)
            })
            .collect()
    }

    #[instrument(skip(self, patch), fields(inventory_id = %id, expected = ?expected), err)]
    async fn update_inventory(
        &mut self,
        id: InventoryId,
        patch: &InventoryPatch,
        expected: ExpectedVersion,
    ) -> Result<Inventory, StoreError> {
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };

        let row = sqlx::query(
            r#"
            UPDATE inventories i
            SET quantity   = COALESCE($3, i.quantity),
                discount   = COALESCE($4, i.discount),
                total      = COALESCE($5, i.total),
                status     = COALESCE($6, i.status),
                version    = i.version + 1,
                updated_at = $7
            FROM products p
            WHERE i.id = $1
              AND p.id = i.product_id
              AND ($2::BIGINT IS NULL OR i.version = $2)
            RETURNING i.id, i.product_id, i.quantity, i.discount, i.total, i.status,
                      i.version, i.created_at, i.updated_at, p.store_id,
                      p.status AS product_status
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected_version)
        .bind(patch.quantity)
        .bind(patch.discount)
        .bind(patch.total)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(Utc::now())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_inventory", e))?;

        match row {
            Some(row) => Ok(decode::<InventoryRow>(&row)?.into_record()?.inventory),
            None => match self.current_version(id).await? {
                None => Err(StoreError::NotFound(format!("inventory {id}"))),
                Some(actual) => {
                    debug!(actual, "conditional inventory update matched no row");
                    Err(StoreError::Serialization(format!(
                        "inventory {id} is at version {actual}, expected {expected:?}"
                    )))
                }
            },
        }
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, type, quantity, direction,
                actor_id, note, related_order_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.product_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(movement.direction.as_str())
        .bind(movement.actor_id.map(|a| *a.as_uuid()))
        .bind(movement.note.as_deref())
        .bind(movement.related_order_id)
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn list_movements(
        &mut self,
        store_id: StoreId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements m \
             JOIN products p ON p.id = m.product_id \
             WHERE p.store_id = $1 AND ($2::UUID IS NULL OR m.product_id = $2) \
             ORDER BY m.created_at ASC, m.id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(store_id.as_uuid())
            .bind(product_id.map(|p| *p.as_uuid()))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter()
            .map(|r| -> Result<StockMovement, StoreError> { decode::<MovementRow>(r)?.try_into() })
            .collect()
    }

    async fn find_movement(
        &mut self,
        store_id: StoreId,
        id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements m \
             JOIN products p ON p.id = m.product_id \
             WHERE m.id = $1 AND p.store_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(store_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_movement", e))?;

        row.map(|r| -> Result<StockMovement, StoreError> { decode::<MovementRow>(&r)?.try_into() })
            .transpose()
    }

    async fn find_product_by_sku(
        &mut self,
        store_id: StoreId,
        sku: &str,
    ) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, store_id, sku, name, status, created_at
            FROM products
            WHERE store_id = $1 AND sku = $2
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(sku)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_product_by_sku", e))?;

        row.map(|r| -> Result<Product, StoreError> { decode::<ProductRow>(&r)?.try_into() })
            .transpose()
    }

    async fn insert_product(
        &mut self,
        product: &Product,
        inventory: &Inventory,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, store_id, sku, name, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.store_id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.status.as_str())
        .bind(product.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        sqlx::query(
            r#"
            INSERT INTO inventories (
                id, product_id, quantity, discount, total, status, version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(inventory.id.as_uuid())
        .bind(inventory.product_id.as_uuid())
        .bind(inventory.quantity)
        .bind(inventory.discount)
        .bind(inventory.total)
        .bind(inventory.status.as_str())
        .bind(inventory.version as i64)
        .bind(inventory.created_at)
        .bind(inventory.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_inventory", e))?;

        Ok(())
    }

    async fn set_product_status(
        &mut self,
        product_id: ProductId,
        status: ProductStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET status = $2 WHERE id = $1")
            .bind(product_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_product_status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => StoreError::Serialization(msg),
                Some("55P03") => StoreError::LockTimeout(msg),
                Some("23505") => StoreError::Duplicate(msg),
                Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode<'r, T>(row: &'r PgRow) -> Result<T, StoreError>
where
    T: FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::Backend(format!("failed to decode row: {}", e)))
}

fn parse_column<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: FromStr,
{
    value
        .parse()
        .map_err(|_| StoreError::Backend(format!("unexpected {} value '{}'", column, value)))
}

// SQLx row types

#[derive(Debug)]
struct StoreRow {
    id: uuid::Uuid,
    name: String,
    owner_id: uuid::Uuid,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoreRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoreRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner_id: row.try_get("owner_id")?,
        })
    }
}

impl From<StoreRow> for Store {
    fn from(row: StoreRow) -> Self {
        Store {
            id: StoreId::from_uuid(row.id),
            name: row.name,
            owner_id: ActorId::from_uuid(row.owner_id),
        }
    }
}

#[derive(Debug)]
struct ProductRow {
    id: uuid::Uuid,
    store_id: uuid::Uuid,
    sku: String,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            store_id: row.try_get("store_id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: ProductId::from_uuid(row.id),
            store_id: StoreId::from_uuid(row.store_id),
            sku: row.sku,
            name: row.name,
            status: parse_column("products.status", &row.status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
struct InventoryRow {
    id: uuid::Uuid,
    product_id: uuid::Uuid,
    quantity: i64,
    discount: i64,
    total: i64,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    store_id: uuid::Uuid,
    product_status: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InventoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            discount: row.try_get("discount")?,
            total: row.try_get("total")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            store_id: row.try_get("store_id")?,
            product_status: row.try_get("product_status")?,
        })
    }
}

impl InventoryRow {
    fn into_record(self) -> Result<InventoryRecord, StoreError> {
        let status: InventoryStatus = parse_column("inventories.status", &self.status)?;
        let product_status: ProductStatus = parse_column("products.status", &self.product_status)?;
        Ok(InventoryRecord {
            inventory: Inventory {
                id: InventoryId::from_uuid(self.id),
                product_id: ProductId::from_uuid(self.product_id),
                quantity: self.quantity,
                discount: self.discount,
                total: self.total,
                status,
                version: self.version as u64,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            store_id: StoreId::from_uuid(self.store_id),
            product_status,
        })
    }
}

#[derive(Debug)]
struct MovementRow {
    id: uuid::Uuid,
    product_id: uuid::Uuid,
    movement_type: String,
    quantity: i64,
    direction: String,
    actor_id: Option<uuid::Uuid>,
    note: Option<String>,
    related_order_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            movement_type: row.try_get("type")?,
            quantity: row.try_get("quantity")?,
            direction: row.try_get("direction")?,
            actor_id: row.try_get("actor_id")?,
            note: row.try_get("note")?,
            related_order_id: row.try_get("related_order_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type: MovementType = parse_column("stock_movements.type", &row.movement_type)?;
        let direction: Direction = parse_column("stock_movements.direction", &row.direction)?;
        Ok(StockMovement {
            id: MovementId::from_uuid(row.id),
            product_id: ProductId::from_uuid(row.product_id),
            movement_type,
            quantity: row.quantity,
            direction,
            actor_id: row.actor_id.map(ActorId::from_uuid),
            note: row.note,
            related_order_id: row.related_order_id,
            created_at: row.created_at,
        })
    }
}
