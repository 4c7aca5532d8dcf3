//! Paper ingestion attempt repository (`downloaded_papers`).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{DownloadedPaperRecord, NewDownloadedPaper};
use super::pool::{DbPool, DieselError};
use super::util::format_timestamp;
use crate::models::TrackingStatus;
use crate::schema::downloaded_papers;
use crate::{with_conn, with_conn_split};

/// Diesel-based repository for per-paper ingestion attempts.
///
/// Rows are append-only: a retried paper gets a new row.
#[derive(Clone)]
pub struct DownloadRepository {
    pool: DbPool,
}

impl DownloadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Entry ids successfully uploaded at or after `since`.
    ///
    /// Failed attempts are excluded so those papers are admitted again.
    pub async fn uploaded_entry_ids_since(
        &self,
        since: &DateTime<Utc>,
    ) -> Result<Vec<String>, DieselError> {
        let since = format_timestamp(since);
        with_conn!(self.pool, conn, {
            downloaded_papers::table
                .filter(downloaded_papers::last_attempt.ge(&since))
                .filter(downloaded_papers::status.eq(TrackingStatus::Uploaded.as_str()))
                .select(downloaded_papers::entry_id)
                .distinct()
                .load::<String>(&mut conn)
                .await
        })
    }

    /// Insert tracking rows as one multi-row statement.
    pub async fn insert_batch(&self, rows: &[NewDownloadedPaper]) -> Result<usize, DieselError> {
        if rows.is_empty() {
            return Ok(0);
        }
        with_conn_split!(self.pool,
            sqlite: conn => {
                let rows = rows.to_vec();
                conn.spawn_blocking(move |c| {
                    diesel::RunQueryDsl::execute(
                        diesel::insert_into(downloaded_papers::table).values(&rows),
                        c,
                    )
                })
                .await
            },
            postgres: conn => {
                diesel::insert_into(downloaded_papers::table)
                    .values(rows)
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// All attempts recorded for one raw batch.
    pub async fn get_by_batch(
        &self,
        batch_id: &str,
    ) -> Result<Vec<DownloadedPaperRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            downloaded_papers::table
                .filter(downloaded_papers::etl_batch_id.eq(batch_id))
                .order(downloaded_papers::id.asc())
                .select(DownloadedPaperRecord::as_select())
                .load::<DownloadedPaperRecord>(&mut conn)
                .await
        })
    }

    /// Attempt counts grouped by tracking status.
    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, DieselError> {
        with_conn!(self.pool, conn, {
            downloaded_papers::table
                .group_by(downloaded_papers::status)
                .select((downloaded_papers::status, diesel::dsl::count_star()))
                .order(downloaded_papers::status.asc())
                .load::<(String, i64)>(&mut conn)
                .await
        })
    }
}
