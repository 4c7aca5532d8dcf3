//! Database context for managing connections and repository access.
//!
//! The DbContext is the entry point for all database operations. It holds the
//! connection factory and hands out repositories that share it.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;
use tracing::info;

use super::batches::BatchRepository;
use super::downloads::DownloadRepository;
use super::papers::PaperRepository;
use super::pool::{DbPool, DieselError, SqliteConn};
use super::progress::CategoryProgressRepository;
use super::stats::StatsRepository;

/// Database context that manages the connection factory and provides
/// repository access.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:/var/lib/paperharvest/harvest.db")?;
/// let pending = ctx.batches().count_pending().await?;
/// ```
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Create a context from a database file path (SQLite only).
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::sqlite_from_path(db_path),
        }
    }

    /// Create a context from a database URL.
    ///
    /// Supports:
    /// - SQLite: file paths or `sqlite:` URLs
    /// - PostgreSQL: `postgres://` or `postgresql://` URLs
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        Ok(Self {
            pool: DbPool::from_url(url)?,
        })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn progress(&self) -> CategoryProgressRepository {
        CategoryProgressRepository::new(self.pool.clone())
    }

    pub fn downloads(&self) -> DownloadRepository {
        DownloadRepository::new(self.pool.clone())
    }

    pub fn batches(&self) -> BatchRepository {
        BatchRepository::new(self.pool.clone())
    }

    pub fn papers(&self) -> PaperRepository {
        PaperRepository::new(self.pool.clone())
    }

    pub fn stats(&self) -> StatsRepository {
        StatsRepository::new(self.pool.clone())
    }

    /// Create all tables and indexes that do not exist yet.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        crate::with_conn_split!(self.pool,
            sqlite: conn => {
                init_sqlite_schema(&mut conn).await
            },
            postgres: conn => {
                init_postgres_schema(&mut conn).await
            }
        )?;
        info!("Database schema ready");
        Ok(())
    }
}

/// Initialize SQLite schema.
async fn init_sqlite_schema(conn: &mut SqliteConn) -> Result<(), DieselError> {
    conn.batch_execute(include_str!("schema_sqlite.sql")).await
}

/// Initialize PostgreSQL schema.
#[cfg(feature = "postgres")]
async fn init_postgres_schema(conn: &mut super::pool::PgConn) -> Result<(), DieselError> {
    use diesel_async::RunQueryDsl;

    for stmt in sql_statements(include_str!("schema_postgres.sql")) {
        diesel::sql_query(stmt).execute(conn).await?;
    }
    Ok(())
}

/// Split a DDL script into statements.
///
/// `--` comments are removed before splitting, so a `;` inside a comment
/// never ends a statement.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
fn sql_statements(script: &str) -> Vec<String> {
    let code: Vec<&str> = script
        .lines()
        .map(|line| strip_line_comment(line).trim_end())
        .collect();
    code.join("\n")
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// The part of a line before any `--` comment outside a string literal.
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
fn strip_line_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut prev_dash = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' => {
                in_string = !in_string;
                prev_dash = false;
            }
            '-' if !in_string => {
                if prev_dash {
                    return &line[..i - 1];
                }
                prev_dash = true;
            }
            _ => prev_dash = false,
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_statements_skip_comments() {
        let stmts = sql_statements(
            "-- header\n-- more\n\nCREATE TABLE a (x INTEGER);\n-- trailing\nCREATE INDEX i ON a(x);\n",
        );
        assert_eq!(
            stmts,
            vec![
                "CREATE TABLE a (x INTEGER)".to_string(),
                "CREATE INDEX i ON a(x)".to_string()
            ]
        );
    }

    #[test]
    fn test_semicolons_in_comments_do_not_split() {
        let stmts = sql_statements(
            "-- times are text; lists are JSON\n\
             CREATE TABLE a (\n    x TEXT DEFAULT 'a--b' -- note; here\n);\n",
        );
        assert_eq!(
            stmts,
            vec!["CREATE TABLE a (\n    x TEXT DEFAULT 'a--b'\n)".to_string()]
        );
    }

    #[test]
    fn test_postgres_script_has_every_table() {
        let stmts = sql_statements(include_str!("schema_postgres.sql"));
        for table in [
            "category_progress",
            "downloaded_papers",
            "raw_batches",
            "arxiv_papers",
            "arxiv_papers_history",
            "category_run_stats",
        ] {
            let create = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(
                stmts.iter().any(|s| s.starts_with(&create)),
                "missing {table}"
            );
        }
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("harvest.db"));
        ctx.init_schema().await.unwrap();
        ctx.init_schema().await.unwrap();
        assert_eq!(ctx.batches().count_pending().await.unwrap(), 0);
    }
}
