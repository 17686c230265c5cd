//! PostgreSQL ledger store and vehicle directory.
//!
//! # Schema
//!
//! ## vehicle_balances
//! - vehicle_id: UUID primary key (row removed with its vehicle by the owner of `vehicles`)
//! - purchase_price, investment: NUMERIC(18,2), never null
//! - sale_price, profit: NUMERIC(18,2), null until sold
//! - profit_margin: NUMERIC(20,2), null until sold
//! - created_at, updated_at: TIMESTAMPTZ
//!
//! ## vehicles
//! Owned by the inventory module; read here only for tenant scoping.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealerbooks_common::{DealerBooksError, Result, TenantId, VehicleId};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::balance::{MergeOutcome, VehicleBalance};
use crate::directory::{VehicleDirectory, VehicleRef};
use crate::store::{BalanceMutator, BalanceStore, UpsertResult};

const BALANCE_COLUMNS: &str = "vehicle_id, purchase_price, investment, sale_price, profit, \
                               profit_margin, created_at, updated_at";

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| DealerBooksError::StoreUnavailable(format!("Failed to connect: {}", e)))
}

/// Create the ledger table if it does not exist.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running ledger migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicle_balances (
            vehicle_id UUID PRIMARY KEY,
            purchase_price NUMERIC(18, 2) NOT NULL DEFAULT 0,
            investment NUMERIC(18, 2) NOT NULL DEFAULT 0,
            sale_price NUMERIC(18, 2),
            profit NUMERIC(18, 2),
            profit_margin NUMERIC(20, 2),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK ((sale_price IS NULL) = (profit IS NULL)),
            CHECK ((sale_price IS NULL) = (profit_margin IS NULL))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    info!("Ledger migrations complete");
    Ok(())
}

fn map_sqlx_error(err: sqlx::Error) -> DealerBooksError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DealerBooksError::StoreUnavailable(err.to_string())
        }
        _ => DealerBooksError::DatabaseError(err.to_string()),
    }
}

fn balance_from_row(row: &PgRow) -> std::result::Result<VehicleBalance, sqlx::Error> {
    Ok(VehicleBalance {
        vehicle_id: VehicleId::from_uuid(row.try_get::<Uuid, _>("vehicle_id")?),
        purchase_price: row.try_get::<Decimal, _>("purchase_price")?,
        investment: row.try_get::<Decimal, _>("investment")?,
        sale_price: row.try_get::<Option<Decimal>, _>("sale_price")?,
        profit: row.try_get::<Option<Decimal>, _>("profit")?,
        profit_margin: row.try_get::<Option<Decimal>, _>("profit_margin")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// Ledger store backed by the `vehicle_balances` table.
///
/// `upsert` runs in one transaction: the row is created if missing, then
/// locked with `SELECT ... FOR UPDATE`, so concurrent writers for the same
/// vehicle queue on the row lock.
#[derive(Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get(&self, vehicle_id: VehicleId) -> Result<Option<VehicleBalance>> {
        let sql = format!("SELECT {} FROM vehicle_balances WHERE vehicle_id = $1", BALANCE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(*vehicle_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(balance_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn get_many(&self, vehicle_ids: &[VehicleId]) -> Result<Vec<VehicleBalance>> {
        if vehicle_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = vehicle_ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = format!(
            "SELECT {} FROM vehicle_balances WHERE vehicle_id = ANY($1)",
            BALANCE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter()
            .map(balance_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlx_error)
    }

    async fn upsert(&self, vehicle_id: VehicleId, mutate: BalanceMutator) -> Result<UpsertResult> {
        let id = *vehicle_id.as_uuid();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO vehicle_balances (vehicle_id, purchase_price, investment, created_at, updated_at)
            VALUES ($1, 0, 0, NOW(), NOW())
            ON CONFLICT (vehicle_id) DO NOTHING
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();
        let created = inserted == 1;

        let sql = format!(
            "SELECT {} FROM vehicle_balances WHERE vehicle_id = $1 FOR UPDATE",
            BALANCE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let mut balance = balance_from_row(&row).map_err(map_sqlx_error)?;

        // An error here drops the transaction, rolling back a fresh insert.
        let outcome = mutate(&mut balance)?;

        if outcome == MergeOutcome::Applied {
            // Read back what NUMERIC stored, so the caller sees the row as persisted.
            let sql = format!(
                r#"
                UPDATE vehicle_balances
                SET purchase_price = $2, investment = $3, sale_price = $4,
                    profit = $5, profit_margin = $6, updated_at = $7
                WHERE vehicle_id = $1
                RETURNING {}
                "#,
                BALANCE_COLUMNS
            );
            let row = sqlx::query(&sql)
                .bind(id)
                .bind(balance.purchase_price)
                .bind(balance.investment)
                .bind(balance.sale_price)
                .bind(balance.profit)
                .bind(balance.profit_margin)
                .bind(balance.updated_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            balance = balance_from_row(&row).map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(|e| {
            error!(vehicle_id = %vehicle_id, error = %e, "Failed to commit ledger update");
            map_sqlx_error(e)
        })?;

        debug!(vehicle_id = %vehicle_id, ?outcome, created, "Ledger row upserted");

        Ok(UpsertResult {
            balance,
            outcome,
            created,
        })
    }
}

/// Tenant-scoped reader over the inventory module's `vehicles` table.
#[derive(Clone)]
pub struct PgVehicleDirectory {
    pool: PgPool,
}

impl PgVehicleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn vehicle_from_row(row: &PgRow) -> std::result::Result<VehicleRef, sqlx::Error> {
    Ok(VehicleRef {
        id: VehicleId::from_uuid(row.try_get::<Uuid, _>("id")?),
        brand: row.try_get("brand")?,
        model: row.try_get("model")?,
        year: row.try_get("year")?,
        plate: row.try_get("plate")?,
    })
}

#[async_trait]
impl VehicleDirectory for PgVehicleDirectory {
    async fn find_vehicle(&self, tenant_id: TenantId, vehicle_id: VehicleId) -> Result<Option<VehicleRef>> {
        let row = sqlx::query(
            "SELECT id, brand, model, year, plate FROM vehicles WHERE id = $1 AND tenant_id = $2",
        )
        .bind(*vehicle_id.as_uuid())
        .bind(*tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(vehicle_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn list_vehicles(&self, tenant_id: TenantId) -> Result<Vec<VehicleRef>> {
        let rows = sqlx::query(
            "SELECT id, brand, model, year, plate FROM vehicles WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(*tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(vehicle_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlx_error)
    }
}
