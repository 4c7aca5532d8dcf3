//! Paper content and history repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_models::{NewPaper, NewPaperHistory, PaperContentRecord};
use super::pool::{DbPool, DieselError};
use crate::schema::{arxiv_papers, arxiv_papers_history};
use crate::{with_conn, with_conn_split};

/// Diesel-based repository for loaded papers.
#[derive(Clone)]
pub struct PaperRepository {
    pool: DbPool,
}

impl PaperRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert content rows as one statement, skipping entry ids already stored.
    ///
    /// Returns the number of rows actually inserted; the first write of an
    /// entry id wins.
    pub async fn insert_content(&self, rows: &[NewPaper]) -> Result<usize, DieselError> {
        if rows.is_empty() {
            return Ok(0);
        }
        with_conn_split!(self.pool,
            sqlite: conn => {
                let rows = rows.to_vec();
                conn.spawn_blocking(move |c| {
                    diesel::RunQueryDsl::execute(
                        diesel::insert_or_ignore_into(arxiv_papers::table).values(&rows),
                        c,
                    )
                })
                .await
            },
            postgres: conn => {
                diesel::insert_into(arxiv_papers::table)
                    .values(rows)
                    .on_conflict(arxiv_papers::entry_id)
                    .do_nothing()
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// Append history rows as one statement.
    pub async fn append_history(&self, rows: &[NewPaperHistory]) -> Result<usize, DieselError> {
        if rows.is_empty() {
            return Ok(0);
        }
        with_conn_split!(self.pool,
            sqlite: conn => {
                let rows = rows.to_vec();
                conn.spawn_blocking(move |c| {
                    diesel::RunQueryDsl::execute(
                        diesel::insert_into(arxiv_papers_history::table).values(&rows),
                        c,
                    )
                })
                .await
            },
            postgres: conn => {
                diesel::insert_into(arxiv_papers_history::table)
                    .values(rows)
                    .execute(&mut conn)
                    .await
            }
        )
    }

    /// Get stored content for an entry id.
    pub async fn get(&self, entry_id: &str) -> Result<Option<PaperContentRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            arxiv_papers::table
                .find(entry_id)
                .select(PaperContentRecord::as_select())
                .first::<PaperContentRecord>(&mut conn)
                .await
                .optional()
        })
    }

    /// Number of distinct papers loaded.
    pub async fn count_content(&self) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            arxiv_papers::table
                .count()
                .get_result::<i64>(&mut conn)
                .await
        })
    }

    /// Number of history events, optionally for a single entry id.
    pub async fn count_history(&self, entry_id: Option<&str>) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            let mut query = arxiv_papers_history::table.into_boxed();
            if let Some(id) = entry_id {
                query = query.filter(arxiv_papers_history::entry_id.eq(id));
            }
            query.count().get_result::<i64>(&mut conn).await
        })
    }
}
