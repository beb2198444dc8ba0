//! Postgres-backed inventory store.
//!
//! Schema: `migrations/0001_stocktaking.sql`.
//!
//! ## Sync over async
//!
//! The store boundary is synchronous (request/response, one transaction per
//! call). Each statement is driven on the ambient tokio runtime with
//! `block_in_place` + `Handle::block_on`, so callers must run on a
//! multi-threaded runtime (or outside any runtime with a handle supplied).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (numeric value out of range) | `22003` | `Constraint` |
//! | Database (other) | any other | `Backend` |
//! | ColumnDecode / Decode | N/A | `Decode` |
//! | anything else | N/A | `Backend` |

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use stockroom_core::{CategoryId, ItemId, LocationId, MovementId, StocktakingId, TenantId, UserId};
use stockroom_inventory::{
    CatalogItem, Direction, LineKey, Location, MovementType, StockBalance, StockKey, StockMovement, StocktakingLine,
    StocktakingSession, StocktakingStatus,
};

use super::{InventoryStore, StoreTx};
use crate::config::DatabaseConfig;
use crate::error::StoreError;

/// Schema applied by [`PostgresStore::ensure_schema`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_stocktaking.sql");

/// Postgres-backed transactional store.
///
/// Every query includes `tenant_id` in its WHERE clause (sessions and lines
/// are reached through a tenant-checked session).
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresStore {
    /// Wrap an existing pool; statements run on `handle`.
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Connect using the database section of the configuration.
    ///
    /// Must be called from within a tokio runtime; its handle drives later statements.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool, Handle::current()))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn block_on<F: Future>(handle: &Handle, fut: F) -> F::Output {
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl InventoryStore for PostgresStore {
    fn in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let tx = block_on(&self.handle, self.pool.begin()).map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let mut pg = PgTx {
            tx,
            handle: self.handle.clone(),
        };

        match work(&mut pg) {
            Ok(value) => {
                block_on(&self.handle, pg.tx.commit()).map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = block_on(&self.handle, pg.tx.rollback()) {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
    handle: Handle,
}

impl StoreTx for PgTx {
    fn item(&mut self, tenant_id: TenantId, item_id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
        let row = block_on(
            &self.handle,
            sqlx::query(
                r#"
                SELECT id, tenant_id, name, category_id, active, home_location_id
                FROM items
                WHERE tenant_id = $1 AND id = $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(item_id.as_uuid())
            .fetch_optional(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("load_item", e))?;

        row.as_ref().map(item_from_row).transpose()
    }

    fn location(&mut self, tenant_id: TenantId, location_id: LocationId) -> Result<Option<Location>, StoreError> {
        let row = block_on(
            &self.handle,
            sqlx::query("SELECT id, tenant_id, name FROM locations WHERE tenant_id = $1 AND id = $2")
                .bind(tenant_id.as_uuid())
                .bind(location_id.as_uuid())
                .fetch_optional(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("load_location", e))?;

        row.as_ref()
            .map(|r| {
                Ok(Location {
                    id: LocationId::from_uuid(get(r, "id")?),
                    tenant_id: TenantId::from_uuid(get(r, "tenant_id")?),
                    name: get(r, "name")?,
                })
            })
            .transpose()
    }

    fn category_exists(&mut self, tenant_id: TenantId, category_id: CategoryId) -> Result<bool, StoreError> {
        let row = block_on(
            &self.handle,
            sqlx::query("SELECT 1 AS found FROM categories WHERE tenant_id = $1 AND id = $2")
                .bind(tenant_id.as_uuid())
                .bind(category_id.as_uuid())
                .fetch_optional(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("check_category", e))?;

        Ok(row.is_some())
    }

    fn active_items(
        &mut self,
        tenant_id: TenantId,
        category_id: Option<CategoryId>,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let rows = block_on(
            &self.handle,
            sqlx::query(
                r#"
                SELECT id, tenant_id, name, category_id, active, home_location_id
                FROM items
                WHERE tenant_id = $1
                    AND active
                    AND ($2::uuid IS NULL OR category_id = $2)
                ORDER BY name ASC, id ASC
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(category_id.map(Uuid::from))
            .fetch_all(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("list_active_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    fn balance(&mut self, key: StockKey) -> Result<Option<StockBalance>, StoreError> {
        let row = block_on(
            &self.handle,
            sqlx::query(
                r#"
                SELECT tenant_id, item_id, location_id, quantity
                FROM stock_balances
                WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.item_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .fetch_optional(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("load_balance", e))?;

        row.as_ref().map(balance_from_row).transpose()
    }

    fn balances(
        &mut self,
        tenant_id: TenantId,
        location_id: Option<LocationId>,
    ) -> Result<Vec<StockBalance>, StoreError> {
        let rows = block_on(
            &self.handle,
            sqlx::query(
                r#"
                SELECT tenant_id, item_id, location_id, quantity
                FROM stock_balances
                WHERE tenant_id = $1 AND ($2::uuid IS NULL OR location_id = $2)
                ORDER BY item_id, location_id
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(location_id.map(Uuid::from))
            .fetch_all(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("list_balances", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    fn balances_for_item(&mut self, tenant_id: TenantId, item_id: ItemId) -> Result<Vec<StockBalance>, StoreError> {
        let rows = block_on(
            &self.handle,
            sqlx::query(
                r#"
                SELECT tenant_id, item_id, location_id, quantity
                FROM stock_balances
                WHERE tenant_id = $1 AND item_id = $2
                ORDER BY location_id
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(item_id.as_uuid())
            .fetch_all(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("list_item_balances", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    fn add_to_balance(&mut self, key: StockKey, delta: i64) -> Result<StockBalance, StoreError> {
        let row = block_on(
            &self.handle,
            sqlx::query(
                r#"
                INSERT INTO stock_balances (tenant_id, item_id, location_id, quantity)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, item_id, location_id)
                DO UPDATE SET
                    quantity = stock_balances.quantity + EXCLUDED.quantity,
                    updated_at = NOW()
                RETURNING tenant_id, item_id, location_id, quantity
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.item_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .bind(delta)
            .fetch_one(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("upsert_balance", e))?;

        balance_from_row(&row)
    }

    fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        block_on(
            &self.handle,
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id,
                    tenant_id,
                    item_id,
                    location_id,
                    movement_type,
                    direction,
                    quantity,
                    occurred_on,
                    recorded_by,
                    note,
                    session_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(movement.id.as_uuid())
            .bind(movement.tenant_id.as_uuid())
            .bind(movement.item_id.as_uuid())
            .bind(movement.location_id.as_uuid())
            .bind(movement.movement_type.as_str())
            .bind(movement.direction.as_str())
            .bind(movement.quantity)
            .bind(movement.occurred_on)
            .bind(movement.recorded_by.as_uuid())
            .bind(movement.note.as_deref())
            .bind(movement.session_id.map(Uuid::from))
            .execute(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        debug!(movement_id = %movement.id, delta = movement.signed_delta(), "movement inserted");
        Ok(())
    }

    fn movements(&mut self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        let rows = block_on(
            &self.handle,
            sqlx::query(
                r#"
                SELECT
                    id,
                    tenant_id,
                    item_id,
                    location_id,
                    movement_type,
                    direction,
                    quantity,
                    occurred_on,
                    recorded_by,
                    note,
                    session_id
                FROM stock_movements
                WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3
                ORDER BY seq ASC
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(key.item_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .fetch_all(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    fn insert_session(&mut self, session: &StocktakingSession) -> Result<(), StoreError> {
        block_on(
            &self.handle,
            sqlx::query(
                r#"
                INSERT INTO stocktaking_sessions (
                    id,
                    tenant_id,
                    location_id,
                    category_id,
                    include_zero_stock,
                    status,
                    started_by,
                    started_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(session.id.as_uuid())
            .bind(session.tenant_id.as_uuid())
            .bind(session.location_id.map(Uuid::from))
            .bind(session.category_id.map(Uuid::from))
            .bind(session.include_zero_stock)
            .bind(session.status.as_str())
            .bind(session.started_by.as_uuid())
            .bind(session.started_at)
            .execute(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    fn update_session(&mut self, session: &StocktakingSession) -> Result<(), StoreError> {
        let result = block_on(
            &self.handle,
            sqlx::query(
                r#"
                UPDATE stocktaking_sessions
                SET status = $3,
                    completed_by = $4,
                    completed_at = $5,
                    cancelled_by = $6,
                    cancelled_at = $7
                WHERE tenant_id = $1 AND id = $2
                "#,
            )
            .bind(session.tenant_id.as_uuid())
            .bind(session.id.as_uuid())
            .bind(session.status.as_str())
            .bind(session.completed_by.map(Uuid::from))
            .bind(session.completed_at)
            .bind(session.cancelled_by.map(Uuid::from))
            .bind(session.cancelled_at)
            .execute(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("update_session", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Constraint(format!("stocktaking session {} does not exist", session.id)));
        }
        Ok(())
    }

    fn session(
        &mut self,
        tenant_id: TenantId,
        session_id: StocktakingId,
    ) -> Result<Option<StocktakingSession>, StoreError> {
        // Row lock: concurrent complete/cancel on one session serialize here.
        let row = block_on(
            &self.handle,
            sqlx::query(&format!("{SESSION_SELECT} WHERE tenant_id = $1 AND id = $2 FOR UPDATE"))
                .bind(tenant_id.as_uuid())
                .bind(session_id.as_uuid())
                .fetch_optional(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("load_session", e))?;

        row.as_ref().map(session_from_row).transpose()
    }

    fn sessions(
        &mut self,
        tenant_id: TenantId,
        status: Option<StocktakingStatus>,
    ) -> Result<Vec<StocktakingSession>, StoreError> {
        let rows = block_on(
            &self.handle,
            sqlx::query(&format!(
                "{SESSION_SELECT} WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2) ORDER BY started_at DESC, id DESC"
            ))
            .bind(tenant_id.as_uuid())
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("list_sessions", e))?;

        rows.iter().map(session_from_row).collect()
    }

    fn insert_lines(&mut self, lines: &[StocktakingLine]) -> Result<(), StoreError> {
        for line in lines {
            block_on(
                &self.handle,
                sqlx::query(
                    r#"
                    INSERT INTO stocktaking_lines (
                        session_id,
                        item_id,
                        location_id,
                        expected_quantity
                    )
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(line.session_id.as_uuid())
                .bind(line.item_id.as_uuid())
                .bind(line.location_id.map(Uuid::from))
                .bind(line.expected_quantity)
                .execute(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("insert_line", e))?;
        }
        Ok(())
    }

    fn lines(&mut self, session_id: StocktakingId) -> Result<Vec<StocktakingLine>, StoreError> {
        let rows = block_on(
            &self.handle,
            sqlx::query(&format!("{LINE_SELECT} WHERE session_id = $1 ORDER BY seq ASC"))
                .bind(session_id.as_uuid())
                .fetch_all(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("list_lines", e))?;

        rows.iter().map(line_from_row).collect()
    }

    fn line(&mut self, session_id: StocktakingId, key: LineKey) -> Result<Option<StocktakingLine>, StoreError> {
        let row = block_on(
            &self.handle,
            sqlx::query(&format!(
                "{LINE_SELECT} WHERE session_id = $1 AND item_id = $2 AND location_id IS NOT DISTINCT FROM $3"
            ))
            .bind(session_id.as_uuid())
            .bind(key.item_id.as_uuid())
            .bind(key.location_id.map(Uuid::from))
            .fetch_optional(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("load_line", e))?;

        row.as_ref().map(line_from_row).transpose()
    }

    fn update_line(&mut self, line: &StocktakingLine) -> Result<(), StoreError> {
        let result = block_on(
            &self.handle,
            sqlx::query(
                r#"
                UPDATE stocktaking_lines
                SET counted_quantity = $4,
                    note = $5,
                    counted_by = $6,
                    counted_at = $7
                WHERE session_id = $1 AND item_id = $2 AND location_id IS NOT DISTINCT FROM $3
                "#,
            )
            .bind(line.session_id.as_uuid())
            .bind(line.item_id.as_uuid())
            .bind(line.location_id.map(Uuid::from))
            .bind(line.counted_quantity)
            .bind(line.note.as_deref())
            .bind(line.counted_by.map(Uuid::from))
            .bind(line.counted_at)
            .execute(&mut *self.tx),
        )
        .map_err(|e| map_sqlx_error("update_line", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Constraint(format!(
                "stocktaking line for item {} does not exist",
                line.item_id
            )));
        }
        Ok(())
    }
}

const SESSION_SELECT: &str = r#"
    SELECT
        id,
        tenant_id,
        location_id,
        category_id,
        include_zero_stock,
        status,
        started_by,
        started_at,
        completed_by,
        completed_at,
        cancelled_by,
        cancelled_at
    FROM stocktaking_sessions
"#;

const LINE_SELECT: &str = r#"
    SELECT
        session_id,
        item_id,
        location_id,
        expected_quantity,
        counted_quantity,
        note,
        counted_by,
        counted_at
    FROM stocktaking_lines
"#;

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("column {column}: {e}")))
}

fn item_from_row(row: &PgRow) -> Result<CatalogItem, StoreError> {
    Ok(CatalogItem {
        id: ItemId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        name: get(row, "name")?,
        category_id: get::<Option<Uuid>>(row, "category_id")?.map(CategoryId::from_uuid),
        active: get(row, "active")?,
        home_location_id: get::<Option<Uuid>>(row, "home_location_id")?.map(LocationId::from_uuid),
    })
}

fn balance_from_row(row: &PgRow) -> Result<StockBalance, StoreError> {
    Ok(StockBalance {
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        item_id: ItemId::from_uuid(get(row, "item_id")?),
        location_id: LocationId::from_uuid(get(row, "location_id")?),
        quantity: get(row, "quantity")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let movement_type: String = get(row, "movement_type")?;
    let direction: String = get(row, "direction")?;
    Ok(StockMovement {
        id: MovementId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        item_id: ItemId::from_uuid(get(row, "item_id")?),
        location_id: LocationId::from_uuid(get(row, "location_id")?),
        movement_type: MovementType::parse(&movement_type).map_err(|e| StoreError::Decode(e.to_string()))?,
        direction: Direction::parse(&direction).map_err(|e| StoreError::Decode(e.to_string()))?,
        quantity: get(row, "quantity")?,
        occurred_on: get::<NaiveDate>(row, "occurred_on")?,
        recorded_by: UserId::from_uuid(get(row, "recorded_by")?),
        note: get(row, "note")?,
        session_id: get::<Option<Uuid>>(row, "session_id")?.map(StocktakingId::from_uuid),
    })
}

fn session_from_row(row: &PgRow) -> Result<StocktakingSession, StoreError> {
    let status: String = get(row, "status")?;
    Ok(StocktakingSession {
        id: StocktakingId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        location_id: get::<Option<Uuid>>(row, "location_id")?.map(LocationId::from_uuid),
        category_id: get::<Option<Uuid>>(row, "category_id")?.map(CategoryId::from_uuid),
        include_zero_stock: get(row, "include_zero_stock")?,
        status: StocktakingStatus::parse(&status).map_err(|e| StoreError::Decode(e.to_string()))?,
        started_by: UserId::from_uuid(get(row, "started_by")?),
        started_at: get::<DateTime<Utc>>(row, "started_at")?,
        completed_by: get::<Option<Uuid>>(row, "completed_by")?.map(UserId::from_uuid),
        completed_at: get(row, "completed_at")?,
        cancelled_by: get::<Option<Uuid>>(row, "cancelled_by")?.map(UserId::from_uuid),
        cancelled_at: get(row, "cancelled_at")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<StocktakingLine, StoreError> {
    Ok(StocktakingLine {
        session_id: StocktakingId::from_uuid(get(row, "session_id")?),
        item_id: ItemId::from_uuid(get(row, "item_id")?),
        location_id: get::<Option<Uuid>>(row, "location_id")?.map(LocationId::from_uuid),
        expected_quantity: get(row, "expected_quantity")?,
        counted_quantity: get(row, "counted_quantity")?,
        note: get(row, "note")?,
        counted_by: get::<Option<Uuid>>(row, "counted_by")?.map(UserId::from_uuid),
        counted_at: get(row, "counted_at")?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("23514") | Some("22003") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
