//! PostgreSQL store.
//!
//! Each batch runs in one transaction; every row gets its own savepoint so a
//! constraint violation only discards that row.

use super::{check_group_fields, Batch, BatchReport, GroupField, RecordFilter, Store, SumField};
use crate::error::{StoreError, StoreResult};
use crate::model::{LossRecord, RecordKind, WeightRecord};
use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::QueryAs;
use sqlx::{Acquire, PgConnection, PgPool, Postgres};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS weight_data (
        record_id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL,
        item_no TEXT NOT NULL,
        date DATE NOT NULL,
        kt INTEGER NOT NULL CHECK (kt BETWEEN 1 AND 24),
        gross_wt DOUBLE PRECISION NOT NULL CHECK (gross_wt >= 0),
        net_wt DOUBLE PRECISION NOT NULL CHECK (net_wt >= 0),
        pure_gold_weight DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS weight_data_item_no_idx ON weight_data (item_no)",
    r#"
    CREATE TABLE IF NOT EXISTS loss_data (
        record_id UUID PRIMARY KEY,
        seq BIGSERIAL NOT NULL,
        item_no TEXT NOT NULL,
        date DATE NOT NULL,
        kt INTEGER NOT NULL CHECK (kt BETWEEN 1 AND 24),
        karigar TEXT NOT NULL,
        process TEXT NOT NULL,
        loss DOUBLE PRECISION NOT NULL CHECK (loss >= 0),
        pure_gold_loss DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS loss_data_item_no_idx ON loss_data (item_no)",
];

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(classify)?;
        Ok(Self { pool })
    }

    /// Create tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }
        info!("schema ready");
        Ok(())
    }
}

/// Split sqlx errors into row rejections, outages and everything else.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if matches!(
            db.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ) {
            return StoreError::Rejected {
                reason: db.message().to_string(),
            };
        }
    }
    if matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    ) {
        return StoreError::Unavailable(err.to_string());
    }
    StoreError::Database(err)
}

fn table_for(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Weight => "weight_data",
        RecordKind::Loss => "loss_data",
    }
}

/// WHERE clause for a filter. Placeholders are numbered in the same order
/// `bind_filter` binds them.
fn filter_sql(filter: &RecordFilter) -> String {
    let mut sql = String::from(" WHERE 1=1");
    let mut idx = 1;

    if filter.item_nos.is_some() {
        sql.push_str(&format!(" AND item_no = ANY(${})", idx));
        idx += 1;
    }
    if filter.date_from.is_some() {
        sql.push_str(&format!(" AND date >= ${}", idx));
        idx += 1;
    }
    if filter.date_to.is_some() {
        sql.push_str(&format!(" AND date < ${}", idx));
    }
    sql
}

fn bind_filter<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    filter: &RecordFilter,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    if let Some(items) = &filter.item_nos {
        query = query.bind(items.iter().cloned().collect::<Vec<String>>());
    }
    if let Some(from) = filter.date_from {
        query = query.bind(from);
    }
    if let Some(to) = filter.date_to {
        query = query.bind(to);
    }
    query
}

async fn insert_weight_row(conn: &mut PgConnection, record: &WeightRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO weight_data (record_id, item_no, date, kt, gross_wt, net_wt, pure_gold_weight)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&record.item_no)
    .bind(record.date)
    .bind(record.kt)
    .bind(record.gross_wt)
    .bind(record.net_wt)
    .bind(record.pure_gold_weight)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_loss_row(conn: &mut PgConnection, record: &LossRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO loss_data (record_id, item_no, date, kt, karigar, process, loss, pure_gold_loss)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&record.item_no)
    .bind(record.date)
    .bind(record.kt)
    .bind(&record.karigar)
    .bind(&record.process)
    .bind(record.loss)
    .bind(record.pure_gold_loss)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_weight(&self, record: &WeightRecord) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        insert_weight_row(&mut conn, record).await.map_err(classify)
    }

    async fn insert_loss(&self, record: &LossRecord) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        insert_loss_row(&mut conn, record).await.map_err(classify)
    }

    async fn write_batch(&self, batch: Batch<'_>) -> StoreResult<BatchReport> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut report = BatchReport::default();

        for index in 0..batch.len() {
            let mut savepoint = tx.begin().await.map_err(classify)?;
            let outcome = match batch {
                Batch::Weight(rows) => insert_weight_row(&mut savepoint, &rows[index]).await,
                Batch::Loss(rows) => insert_loss_row(&mut savepoint, &rows[index]).await,
            }
            .map_err(classify);

            if outcome.is_ok() {
                savepoint.commit().await.map_err(classify)?;
            } else {
                savepoint.rollback().await.map_err(classify)?;
            }
            report.record(batch, index, outcome)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(report)
    }

    async fn delete_all_weight(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM weight_data")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn delete_all_loss(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM loss_data")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn list_weight(&self, filter: &RecordFilter) -> StoreResult<Vec<WeightRecord>> {
        let sql = format!(
            "SELECT item_no, date, kt, gross_wt, net_wt, pure_gold_weight FROM weight_data{} ORDER BY seq",
            filter_sql(filter)
        );
        bind_filter(sqlx::query_as::<_, WeightRecord>(&sql), filter)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    async fn list_loss(&self, filter: &RecordFilter) -> StoreResult<Vec<LossRecord>> {
        let sql = format!(
            "SELECT item_no, date, kt, karigar, process, loss, pure_gold_loss FROM loss_data{} ORDER BY seq",
            filter_sql(filter)
        );
        bind_filter(sqlx::query_as::<_, LossRecord>(&sql), filter)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    async fn group_sum(
        &self,
        kind: RecordKind,
        by: GroupField,
        sum: SumField,
        filter: &RecordFilter,
    ) -> StoreResult<BTreeMap<String, f64>> {
        check_group_fields(kind, by, sum)?;

        let bucket = match by {
            GroupField::Month => "to_char(date, 'YYYY-MM')",
            other => other.column(),
        };
        let sql = format!(
            "SELECT {} AS bucket, COALESCE(SUM({}), 0)::float8 AS total FROM {}{} GROUP BY 1 ORDER BY 1",
            bucket,
            sum.column(),
            table_for(kind),
            filter_sql(filter)
        );

        let rows: Vec<(String, f64)> = bind_filter(sqlx::query_as(&sql), filter)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().collect())
    }
}
