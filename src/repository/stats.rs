//! Category run statistics repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{CategoryRunStatsRecord, NewCategoryRunStats};
use super::parse_datetime;
use super::pool::{DbPool, DieselError};
use super::util::format_timestamp;
use crate::models::CategoryRunStats;
use crate::schema::category_run_stats;
use crate::{with_conn, with_conn_split};

impl From<CategoryRunStatsRecord> for CategoryRunStats {
    fn from(record: CategoryRunStatsRecord) -> Self {
        CategoryRunStats {
            category: record.category_name,
            elapsed_seconds: record.time_sec,
            s3_count: record.s3_count.max(0) as u32,
            pg_count: record.pg_count.max(0) as u32,
            recorded_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based repository for run statistics. Rows are write-once.
#[derive(Clone)]
pub struct StatsRepository {
    pool: DbPool,
}

impl StatsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record one row per category for this run.
    pub async fn record(&self, stats: &[CategoryRunStats]) -> Result<usize, DieselError> {
        if stats.is_empty() {
            return Ok(0);
        }
        let rows: Vec<NewCategoryRunStats> = stats
            .iter()
            .map(|s| NewCategoryRunStats {
                category_name: s.category.clone(),
                time_sec: s.elapsed_seconds,
                s3_count: s.s3_count as i32,
                pg_count: s.pg_count as i32,
                updated_at: format_timestamp(&s.recorded_at),
            })
            .collect();

        with_conn_split!(self.pool,
            sqlite: conn => {
                conn.spawn_blocking(move |c| {
                    diesel::RunQueryDsl::execute(
                        diesel::insert_into(category_run_stats::table).values(&rows),
                        c,
                    )
                })
                .await
            },
            postgres: conn => {
                diesel::insert_into(category_run_stats::table)
                    .values(&rows)
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// Most recent stats row for each category, ordered by category name.
    pub async fn latest_per_category(&self) -> Result<Vec<CategoryRunStats>, DieselError> {
        let records: Vec<CategoryRunStatsRecord> = with_conn!(self.pool, conn, {
            category_run_stats::table
                .order((
                    category_run_stats::category_name.asc(),
                    category_run_stats::id.desc(),
                ))
                .select(CategoryRunStatsRecord::as_select())
                .load::<CategoryRunStatsRecord>(&mut conn)
                .await?
        });

        let mut latest: Vec<CategoryRunStats> = Vec::new();
        for record in records {
            if latest
                .last()
                .is_some_and(|prev| prev.category == record.category_name)
            {
                continue;
            }
            latest.push(record.into());
        }
        Ok(latest)
    }
}
