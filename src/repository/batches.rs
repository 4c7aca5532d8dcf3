//! Raw batch descriptor repository and the claim protocol.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel_async::RunQueryDsl;

use super::diesel_models::{NewRawBatch, RawBatchRecord};
use super::pool::{DbPool, DieselError};
use super::util::now_timestamp;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{BatchStatus, RawBatch};
use crate::schema::raw_batches;
use crate::{with_conn, with_conn_split};

/// Claim statement for SQLite.
///
/// A single UPDATE takes the database write lock for its whole duration, so
/// two claimants can never select the same rows.
const CLAIM_SQLITE: &str = "\
UPDATE raw_batches
SET etl_status = 'processing', etl_started_at = ?
WHERE batch_id IN (
    SELECT batch_id FROM raw_batches
    WHERE etl_status = 'pending'
       OR (etl_status = 'processing' AND etl_started_at < ?)
    ORDER BY batch_id
    LIMIT ?
)
RETURNING batch_id, category, s3_path, record_count, etl_status, created_at,
          etl_started_at, etl_finished_at, error_msg";

/// Claim statement for PostgreSQL.
///
/// Rows locked by a concurrent claimant are skipped rather than waited on.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
const CLAIM_POSTGRES: &str = "\
UPDATE raw_batches
SET etl_status = 'processing', etl_started_at = $1
WHERE batch_id IN (
    SELECT batch_id FROM raw_batches
    WHERE etl_status = 'pending'
       OR (etl_status = 'processing' AND etl_started_at < $2)
    ORDER BY batch_id
    LIMIT $3
    FOR UPDATE SKIP LOCKED
)
RETURNING batch_id, category, s3_path, record_count, etl_status, created_at,
          etl_started_at, etl_finished_at, error_msg";

impl TryFrom<RawBatchRecord> for RawBatch {
    type Error = DieselError;

    fn try_from(record: RawBatchRecord) -> Result<Self, Self::Error> {
        Ok(RawBatch {
            etl_status: BatchStatus::from_str(&record.etl_status).ok_or_else(|| {
                DieselError::DeserializationError(
                    format!("Invalid etl_status: '{}'", record.etl_status).into(),
                )
            })?,
            batch_id: record.batch_id,
            category: record.category,
            object_path: record.s3_path,
            record_count: record.record_count.max(0) as u32,
            created_at: parse_datetime(&record.created_at),
            etl_started_at: parse_datetime_opt(record.etl_started_at),
            etl_finished_at: parse_datetime_opt(record.etl_finished_at),
            error_msg: record.error_msg,
        })
    }
}

/// Diesel-based raw batch repository.
#[derive(Clone)]
pub struct BatchRepository {
    pool: DbPool,
}

impl BatchRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a committed object as a pending batch.
    ///
    /// A descriptor with the same `batch_id` is left as it is.
    pub async fn register(
        &self,
        batch_id: &str,
        category: &str,
        object_path: &str,
        record_count: u32,
    ) -> Result<usize, DieselError> {
        let now = now_timestamp();
        let row = NewRawBatch {
            batch_id,
            category,
            s3_path: object_path,
            record_count: record_count as i32,
            etl_status: BatchStatus::Pending.as_str(),
            created_at: &now,
        };

        with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::insert_or_ignore_into(raw_batches::table)
                    .values(&row)
                    .execute(&mut conn)
                    .await
            },
            postgres: conn => {
                diesel::insert_into(raw_batches::table)
                    .values(&row)
                    .on_conflict(raw_batches::batch_id)
                    .do_nothing()
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// Atomically claim up to `limit` pending batches, oldest `batch_id` first.
    ///
    /// Claimed rows move to `processing` with `etl_started_at` stamped. When
    /// `lease_cutoff` is set, rows stuck in `processing` since before the
    /// cutoff are claimable too.
    pub async fn claim_pending(
        &self,
        limit: u32,
        lease_cutoff: Option<&str>,
    ) -> Result<Vec<RawBatch>, DieselError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now_timestamp();
        let limit = i64::from(limit);

        let records: Vec<RawBatchRecord> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(CLAIM_SQLITE)
                    .bind::<Text, _>(&now)
                    .bind::<Nullable<Text>, _>(lease_cutoff)
                    .bind::<BigInt, _>(limit)
                    .load::<RawBatchRecord>(&mut conn)
                    .await?
            },
            postgres: conn => {
                diesel::sql_query(CLAIM_POSTGRES)
                    .bind::<Text, _>(&now)
                    .bind::<Nullable<Text>, _>(lease_cutoff)
                    .bind::<BigInt, _>(limit)
                    .load::<RawBatchRecord>(&mut conn)
                    .await?
            }
        );

        // RETURNING does not promise an order.
        let mut claimed = records
            .into_iter()
            .map(RawBatch::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        Ok(claimed)
    }

    /// Mark a claimed batch as loaded.
    pub async fn mark_finished(&self, batch_id: &str) -> Result<usize, DieselError> {
        let now = now_timestamp();
        with_conn!(self.pool, conn, {
            diesel::update(raw_batches::table.find(batch_id))
                .set((
                    raw_batches::etl_status.eq(BatchStatus::Finished.as_str()),
                    raw_batches::etl_finished_at.eq(Some(now.as_str())),
                    raw_batches::error_msg.eq(None::<String>),
                ))
                .execute(&mut conn)
                .await
        })
    }

    /// Mark a claimed batch as failed with a reason.
    pub async fn mark_failed(&self, batch_id: &str, error: &str) -> Result<usize, DieselError> {
        let now = now_timestamp();
        with_conn!(self.pool, conn, {
            diesel::update(raw_batches::table.find(batch_id))
                .set((
                    raw_batches::etl_status.eq(BatchStatus::Failed.as_str()),
                    raw_batches::etl_finished_at.eq(Some(now.as_str())),
                    raw_batches::error_msg.eq(Some(error)),
                ))
                .execute(&mut conn)
                .await
        })
    }

    /// Return failed batches to `pending` so the next load retries them.
    pub async fn requeue_failed(&self) -> Result<usize, DieselError> {
        with_conn!(self.pool, conn, {
            diesel::update(
                raw_batches::table.filter(raw_batches::etl_status.eq(BatchStatus::Failed.as_str())),
            )
            .set((
                raw_batches::etl_status.eq(BatchStatus::Pending.as_str()),
                raw_batches::etl_started_at.eq(None::<String>),
                raw_batches::etl_finished_at.eq(None::<String>),
                raw_batches::error_msg.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await
        })
    }

    /// Number of batches waiting to be claimed.
    pub async fn count_pending(&self) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            raw_batches::table
                .filter(raw_batches::etl_status.eq(BatchStatus::Pending.as_str()))
                .count()
                .get_result::<i64>(&mut conn)
                .await
        })
    }

    /// Batch counts per ETL status.
    pub async fn count_by_status(&self) -> Result<Vec<(BatchStatus, i64)>, DieselError> {
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn, {
            raw_batches::table
                .group_by(raw_batches::etl_status)
                .select((raw_batches::etl_status, diesel::dsl::count_star()))
                .load::<(String, i64)>(&mut conn)
                .await?
        });

        Ok(BatchStatus::ALL
            .iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map(|(_, c)| *c)
                    .unwrap_or(0);
                (*status, count)
            })
            .collect())
    }

    /// Get a batch descriptor by id.
    pub async fn get(&self, batch_id: &str) -> Result<Option<RawBatch>, DieselError> {
        with_conn!(self.pool, conn, {
            raw_batches::table
                .find(batch_id)
                .select(RawBatchRecord::as_select())
                .first::<RawBatchRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(RawBatch::try_from).transpose())
        })
    }

    /// All descriptors for a category, oldest `batch_id` first.
    pub async fn get_by_category(&self, category: &str) -> Result<Vec<RawBatch>, DieselError> {
        with_conn!(self.pool, conn, {
            raw_batches::table
                .filter(raw_batches::category.eq(category))
                .order(raw_batches::batch_id.asc())
                .select(RawBatchRecord::as_select())
                .load::<RawBatchRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(RawBatch::try_from).collect())
        })
    }
}
