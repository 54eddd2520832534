/**
 * SQLITE STORE - Table `pongs` via sqlx
 *
 * SCHÉMA :
 * host (PK) | region | cluster | rack | is_active | updated_ns
 *
 * `updated_ns` = last_seen en nanosecondes unix UTC : comparaisons numériques
 * exactes pour le scan des hosts périmés et pour le compare-and-set.
 */

use super::{DemoteOutcome, HostCounts, HostStore, StoreError};
use crate::models::{HostRecord, HostUpsert, Location};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pongs (
    host TEXT PRIMARY KEY NOT NULL,
    region TEXT NOT NULL,
    cluster TEXT NOT NULL,
    rack TEXT NOT NULL,
    is_active INTEGER NOT NULL,
    updated_ns INTEGER NOT NULL
)
"#;

const INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS pongs_active_updated ON pongs (is_active, updated_ns)";

const COLUMNS: &str = "host, region, cluster, rack, is_active, updated_ns";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = pool_options(in_memory).connect_with(options).await?;
        Ok(Self { pool })
    }
}

/// Une base `:memory:` n'existe que dans sa connexion : une seule, jamais recyclée
fn pool_options(in_memory: bool) -> SqlitePoolOptions {
    if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    }
}

fn to_nanos(ts: OffsetDateTime) -> i64 {
    ts.unix_timestamp_nanos() as i64
}

fn record_from_row(row: &SqliteRow) -> Result<HostRecord, StoreError> {
    let host: String = row.try_get("host")?;
    let nanos: i64 = row.try_get("updated_ns")?;
    let last_seen = OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|_| StoreError::InvalidTimestamp { host: host.clone(), nanos })?;
    Ok(HostRecord {
        location: Location {
            region: row.try_get("region")?,
            cluster: row.try_get("cluster")?,
            rack: row.try_get("rack")?,
        },
        is_active: row.try_get("is_active")?,
        last_seen,
        host_id: host,
    })
}

#[async_trait]
impl HostStore for SqliteStore {
    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        sqlx::query(INDEX_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert(&self, upsert: HostUpsert) -> Result<HostRecord, StoreError> {
        let row = match &upsert.location {
            Some(location) => {
                let sql = format!(
                    r#"
                    INSERT INTO pongs ({COLUMNS})
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(host) DO UPDATE SET
                        region = excluded.region,
                        cluster = excluded.cluster,
                        rack = excluded.rack,
                        is_active = excluded.is_active,
                        updated_ns = excluded.updated_ns
                    RETURNING {COLUMNS}
                    "#
                );
                sqlx::query(&sql)
                    .bind(&upsert.host_id)
                    .bind(&location.region)
                    .bind(&location.cluster)
                    .bind(&location.rack)
                    .bind(upsert.is_active)
                    .bind(to_nanos(upsert.last_seen))
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "UPDATE pongs SET is_active = ?1, updated_ns = ?2 WHERE host = ?3 RETURNING {COLUMNS}"
                );
                sqlx::query(&sql)
                    .bind(upsert.is_active)
                    .bind(to_nanos(upsert.last_seen))
                    .bind(&upsert.host_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| StoreError::IncompleteRecord(upsert.host_id.clone()))?
            }
        };
        record_from_row(&row)
    }

    async fn get(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM pongs WHERE host = ?1");
        let row = sqlx::query(&sql)
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<HostRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM pongs WHERE is_active = 1");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn list_stale(&self, threshold: OffsetDateTime) -> Result<Vec<HostRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM pongs WHERE is_active = 1 AND updated_ns < ?1");
        let rows = sqlx::query(&sql)
            .bind(to_nanos(threshold))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn set_active(&self, host_id: &str, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE pongs SET is_active = ?1 WHERE host = ?2")
            .bind(active)
            .bind(host_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            tracing::warn!("[store] set_active: host {} vanished", host_id);
            return Ok(false);
        }
        Ok(true)
    }

    async fn demote_if_unchanged(
        &self,
        host_id: &str,
        observed_last_seen: OffsetDateTime,
    ) -> Result<DemoteOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE pongs SET is_active = 0 WHERE host = ?1 AND is_active = 1 AND updated_ns = ?2",
        )
        .bind(host_id)
        .bind(to_nanos(observed_last_seen))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(DemoteOutcome::Demoted);
        }

        let still_there = sqlx::query("SELECT 1 FROM pongs WHERE host = ?1")
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(if still_there {
            DemoteOutcome::Refreshed
        } else {
            DemoteOutcome::Vanished
        })
    }

    async fn count(&self) -> Result<HostCounts, StoreError> {
        let (total, active): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM pongs")
                .fetch_one(&self.pool)
                .await?;
        Ok(HostCounts {
            total: total.max(0) as u64,
            active: active.max(0) as u64,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
