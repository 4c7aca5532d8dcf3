//! Category progress repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{CategoryProgressRecord, NewCategoryProgress};
use super::parse_datetime;
use super::pool::{DbPool, DieselError};
use super::util::now_timestamp;
use crate::models::{CategoryProgress, CategoryStatus};
use crate::schema::category_progress;
use crate::{with_conn, with_conn_split};

impl From<CategoryProgressRecord> for CategoryProgress {
    fn from(record: CategoryProgressRecord) -> Self {
        CategoryProgress {
            name: record.category_name,
            status: CategoryStatus::from_str(&record.status),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based category progress repository.
#[derive(Clone)]
pub struct CategoryProgressRepository {
    pool: DbPool,
}

impl CategoryProgressRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All progress rows in insertion order.
    pub async fn get_all(&self) -> Result<Vec<CategoryProgress>, DieselError> {
        with_conn!(self.pool, conn, {
            category_progress::table
                .order(category_progress::id.asc())
                .select(CategoryProgressRecord::as_select())
                .load::<CategoryProgressRecord>(&mut conn)
                .await
                .map(|records| records.into_iter().map(CategoryProgress::from).collect())
        })
    }

    /// Names of all categories that are not finished, in insertion order.
    pub async fn pending_names(&self) -> Result<Vec<String>, DieselError> {
        with_conn!(self.pool, conn, {
            category_progress::table
                .filter(category_progress::status.ne(CategoryStatus::Finished.as_str()))
                .order(category_progress::id.asc())
                .select(category_progress::category_name)
                .load::<String>(&mut conn)
                .await
        })
    }

    /// Insert `Pending` rows for the given names in order.
    ///
    /// Names that already have a row are left untouched.
    pub async fn insert_pending(&self, names: &[String]) -> Result<usize, DieselError> {
        if names.is_empty() {
            return Ok(0);
        }
        let now = now_timestamp();
        let rows: Vec<NewCategoryProgress> = names
            .iter()
            .map(|name| NewCategoryProgress {
                category_name: name.clone(),
                status: CategoryStatus::Pending.as_str().to_string(),
                updated_at: now.clone(),
            })
            .collect();

        with_conn_split!(self.pool,
            sqlite: conn => {
                conn.spawn_blocking(move |c| {
                    diesel::RunQueryDsl::execute(
                        diesel::insert_or_ignore_into(category_progress::table).values(&rows),
                        c,
                    )
                })
                .await
            },
            postgres: conn => {
                diesel::insert_into(category_progress::table)
                    .values(&rows)
                    .on_conflict(category_progress::category_name)
                    .do_nothing()
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// Set the status of one category.
    pub async fn set_status(
        &self,
        name: &str,
        status: CategoryStatus,
    ) -> Result<usize, DieselError> {
        let now = now_timestamp();
        with_conn!(self.pool, conn, {
            diesel::update(
                category_progress::table.filter(category_progress::category_name.eq(name)),
            )
            .set((
                category_progress::status.eq(status.as_str()),
                category_progress::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })
    }

    /// Return every finished category to `Pending`.
    pub async fn reset_all(&self) -> Result<usize, DieselError> {
        let now = now_timestamp();
        with_conn!(self.pool, conn, {
            diesel::update(
                category_progress::table
                    .filter(category_progress::status.eq(CategoryStatus::Finished.as_str())),
            )
            .set((
                category_progress::status.eq(CategoryStatus::Pending.as_str()),
                category_progress::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
        })
    }
}
