use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use position_types::{MeasurementBatch, ResolvedPosition, SolveMethod};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use super::PositionStore;
use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS positions (
        tag_id       TEXT             NOT NULL,
        x            DOUBLE PRECISION NOT NULL,
        y            DOUBLE PRECISION NOT NULL,
        z            DOUBLE PRECISION NOT NULL,
        computed_at  TIMESTAMPTZ      NOT NULL,
        accuracy     DOUBLE PRECISION NOT NULL,
        anchors_used TEXT[]           NOT NULL,
        method       TEXT             NOT NULL,
        collected_at TIMESTAMPTZ,
        PRIMARY KEY (tag_id, computed_at)
    )",
    "CREATE TABLE IF NOT EXISTS raw_measurements (
        id              BIGSERIAL        PRIMARY KEY,
        gateway_id      TEXT             NOT NULL,
        batch_timestamp TIMESTAMPTZ      NOT NULL,
        anchor_id       TEXT             NOT NULL,
        tag_id          TEXT             NOT NULL,
        distance_m      DOUBLE PRECISION NOT NULL,
        received_at     TIMESTAMPTZ      NOT NULL DEFAULT now()
    )",
];

const POSITION_COLUMNS: &str =
    "tag_id, x, y, z, computed_at, accuracy, anchors_used, method, collected_at";

/// PostgreSQL-backed history store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Create the tables this store needs if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        info!("History store schema ready");
        Ok(())
    }
}

fn position_from_row(row: &PgRow) -> Result<ResolvedPosition, StoreError> {
    let method: String = row.try_get("method")?;
    let method = SolveMethod::parse(&method)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown solve method '{method}'")))?;
    let anchors_used: Vec<String> = row.try_get("anchors_used")?;
    Ok(ResolvedPosition {
        tag_id: row.try_get("tag_id")?,
        x: row.try_get("x")?,
        y: row.try_get("y")?,
        z: row.try_get("z")?,
        computed_at: row.try_get("computed_at")?,
        accuracy_m: row.try_get("accuracy")?,
        anchors_used: anchors_used.into_iter().collect(),
        method,
        collected_at: row.try_get("collected_at")?,
    })
}

#[async_trait]
impl PositionStore for PgStore {
    async fn append_position(&self, position: &ResolvedPosition) -> Result<(), StoreError> {
        let anchors: Vec<String> = position.anchors_used.iter().cloned().collect();
        let done = sqlx::query(
            "INSERT INTO positions (tag_id, x, y, z, computed_at, accuracy, anchors_used, method, collected_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (tag_id, computed_at) DO NOTHING",
        )
        .bind(&position.tag_id)
        .bind(position.x)
        .bind(position.y)
        .bind(position.z)
        .bind(position.computed_at)
        .bind(position.accuracy_m)
        .bind(anchors)
        .bind(position.method.as_str())
        .bind(position.collected_at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() > 0 {
            return Ok(());
        }

        // Key already taken: a retry of the same record is fine, anything else is not durable.
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE tag_id = $1 AND computed_at = $2");
        let row = sqlx::query(&sql)
            .bind(&position.tag_id)
            .bind(position.computed_at)
            .fetch_optional(&self.pool)
            .await?;
        match row.as_ref().map(position_from_row).transpose()? {
            Some(existing) if existing == *position => Ok(()),
            _ => Err(StoreError::Conflict {
                tag_id: position.tag_id.clone(),
                computed_at: position.computed_at,
            }),
        }
    }

    async fn query_history(
        &self,
        tag_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ResolvedPosition>, StoreError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions
             WHERE tag_id = $1 AND computed_at BETWEEN $2 AND $3
             ORDER BY computed_at ASC LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(tag_id)
            .bind(from)
            .bind(to)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn latest(&self, tag_id: &str) -> Result<Option<ResolvedPosition>, StoreError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions
             WHERE tag_id = $1 ORDER BY computed_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(tag_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn append_measurements(&self, batch: &MeasurementBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for m in &batch.measurements {
            sqlx::query(
                "INSERT INTO raw_measurements (gateway_id, batch_timestamp, anchor_id, tag_id, distance_m)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&batch.gateway_id)
            .bind(batch.collected_at)
            .bind(&m.anchor_id)
            .bind(&m.tag_id)
            .bind(m.distance_m)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
