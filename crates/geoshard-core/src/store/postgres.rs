//! PostgreSQL backend over a sqlx connection pool.
//!
//! Partition and view names are runtime values, so statements are built as
//! dynamic SQL. Every identifier that ends up in a statement is validated by
//! [`ensure_identifier`] first; row values always go through bind parameters.

use crate::config::StoreConfig;
use crate::partition::view_definition;
use crate::record::{BboxRecord, QualityFlag};
use crate::store::{OverlapRow, StoreBackend, SummaryRow, ViewRow};
use crate::{Error, Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

/// PostgreSQL-backed store.
pub struct PostgresStore {
    pool: PgPool,
    insert_chunk_size: usize,
}

impl PostgresStore {
    /// Connect a pool using the store configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.dsn)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                dsn: config.dsn.clone(),
                message: e.to_string(),
            })?;

        info!(max_connections = config.max_connections, "Store connected");

        Ok(Self {
            pool,
            insert_chunk_size: config.insert_chunk_size.max(1),
        })
    }

    fn decode_record(row: &PgRow) -> Result<BboxRecord> {
        let quality: String = get(row, "quality")?;
        let metadata: String = get(row, "metadata")?;
        Ok(BboxRecord {
            id: get(row, "id")?,
            group_key: get(row, "group_key")?,
            subgroup: get(row, "subgroup")?,
            geometry_wkt: get(row, "geometry")?,
            quality: QualityFlag::parse(&quality).ok_or_else(|| {
                StoreError::RowDecode(format!("unknown quality flag {:?}", quality))
            })?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        })
    }
}

/// Reject anything that is not a plain lowercase SQL identifier.
fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    if valid_first && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid SQL identifier: {:?}", name)))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::RowDecode(format!("column {}: {}", column, e)).into())
}

#[async_trait]
impl StoreBackend for PostgresStore {
    async fn create_record_table(&self, table: &str) -> Result<()> {
        ensure_identifier(table)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
               id TEXT PRIMARY KEY, \
               group_key TEXT NOT NULL, \
               subgroup TEXT NOT NULL, \
               geometry TEXT NOT NULL, \
               quality TEXT NOT NULL, \
               metadata TEXT NOT NULL DEFAULT 'null', \
               ingested_at TIMESTAMPTZ NOT NULL DEFAULT now())"
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::TableCreate {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        debug!(table, "Partition table ensured");
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pg_tables WHERE schemaname = 'public' AND tablename = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Introspection(e.to_string()))?;
        Ok(exists)
    }

    async fn insert_records(&self, table: &str, records: &[BboxRecord]) -> Result<u64> {
        ensure_identifier(table)?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::InsertFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?;

        let mut inserted = 0u64;
        for chunk in records.chunks(self.insert_chunk_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} (id, group_key, subgroup, geometry, quality, metadata) "
            ));
            builder.push_values(chunk, |mut b, rec| {
                b.push_bind(&rec.id)
                    .push_bind(&rec.group_key)
                    .push_bind(&rec.subgroup)
                    .push_bind(&rec.geometry_wkt)
                    .push_bind(rec.quality.as_str())
                    .push_bind(rec.metadata.to_string());
            });
            builder.push(" ON CONFLICT (id) DO NOTHING");

            let result =
                builder
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StoreError::InsertFailed {
                        table: table.to_string(),
                        message: e.to_string(),
                    })?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| StoreError::InsertFailed {
            table: table.to_string(),
            message: e.to_string(),
        })?;

        Ok(inserted)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        ensure_identifier(table)?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(count as u64)
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        // LIKE treats '_' as a wildcard, so the prefix is escaped.
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT tablename FROM pg_tables \
             WHERE schemaname = 'public' AND tablename LIKE $1 ESCAPE '\\' \
             ORDER BY tablename",
        )
        .bind(format!("{escaped}%"))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Introspection(e.to_string()))?;
        Ok(tables)
    }

    async fn create_or_replace_view(&self, view: &str, partitions: &[String]) -> Result<()> {
        ensure_identifier(view)?;
        for partition in partitions {
            ensure_identifier(partition)?;
        }

        let definition = view_definition(view, partitions);
        sqlx::query(&definition)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::ViewCreate {
                view: view.to_string(),
                message: e.to_string(),
            })?;
        info!(view, partitions = partitions.len(), "Unified view rebuilt");
        Ok(())
    }

    async fn fetch_view_rows(&self, view: &str) -> Result<Vec<ViewRow>> {
        ensure_identifier(view)?;
        let sql = format!(
            "SELECT id, group_key, subgroup, geometry, quality, metadata, source_partition \
             FROM {view}"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(ViewRow {
                    record: Self::decode_record(row)?,
                    source_partition: get(row, "source_partition")?,
                })
            })
            .collect()
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        ensure_identifier(table)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        info!(table, "Table dropped");
        Ok(())
    }

    async fn fetch_overlap_rows(&self, table: &str) -> Result<Vec<OverlapRow>> {
        ensure_identifier(table)?;
        let sql = format!(
            "SELECT analysis_key, params, overlap_area, subgroup_count, scene_count, \
                    geometry, \"rank\", analysed_at \
             FROM {table}"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(OverlapRow {
                    analysis_key: get(row, "analysis_key")?,
                    params: get(row, "params")?,
                    overlap_area: get::<f64>(row, "overlap_area")?,
                    subgroup_count: get::<i64>(row, "subgroup_count")?,
                    scene_count: get::<i64>(row, "scene_count")?,
                    geometry_wkt: get(row, "geometry")?,
                    rank: get::<i64>(row, "rank")?,
                    analysed_at: get::<DateTime<Utc>>(row, "analysed_at")?,
                })
            })
            .collect()
    }

    async fn init_summary_table(&self, table: &str) -> Result<()> {
        ensure_identifier(table)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::TableCreate {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        let sql = format!(
            "CREATE TABLE {table} (\
               group_key TEXT NOT NULL, \
               overlap_area DOUBLE PRECISION NOT NULL, \
               subgroup_count BIGINT NOT NULL, \
               scene_count BIGINT NOT NULL, \
               geometry TEXT NOT NULL, \
               grid_x BIGINT NOT NULL, \
               grid_y BIGINT NOT NULL, \
               \"rank\" BIGINT NOT NULL, \
               analysed_at TIMESTAMPTZ NOT NULL)"
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::TableCreate {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn insert_summary_rows(&self, table: &str, rows: &[SummaryRow]) -> Result<u64> {
        ensure_identifier(table)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {table} (group_key, overlap_area, subgroup_count, scene_count, \
             geometry, grid_x, grid_y, \"rank\", analysed_at) "
        ));
        builder.push_values(rows, |mut b, row| {
            b.push_bind(&row.group_key)
                .push_bind(row.overlap_area)
                .push_bind(row.subgroup_count)
                .push_bind(row.scene_count)
                .push_bind(&row.geometry_wkt)
                .push_bind(row.grid_x)
                .push_bind(row.grid_y)
                .push_bind(row.rank)
                .push_bind(row.analysed_at);
        });

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::InsertFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!("Store connection pool closed");
        Ok(())
    }
}
