//! Unified database connection factory supporting SQLite and PostgreSQL.
//!
//! The backend is determined at runtime from the database URL. Connections
//! are never reused between calls: every repository operation establishes a
//! connection, runs its statement, and drops the connection on return. The
//! pipeline runs in short-lived invocations where a pooled connection would
//! outlive the work it was opened for.

use std::path::Path;
use std::time::Duration;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::util::{is_postgres_url, to_diesel_error};

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Async PostgreSQL connection type.
#[cfg(feature = "postgres")]
pub type PgConn = AsyncPgConnection;

/// How long a SQLite connection waits on a locked database before failing.
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite connection factory.
#[derive(Clone, Debug)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    /// Create a new SQLite pool.
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Create pool from a file path.
    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Open a connection.
    ///
    /// Concurrent invocations share one database file, so writers wait on
    /// the lock (WAL journal, busy timeout) instead of failing immediately.
    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
            SQLITE_BUSY_TIMEOUT.as_millis()
        ))
        .await?;
        Ok(conn)
    }

    /// Get the database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// PostgreSQL connection factory.
#[cfg(feature = "postgres")]
#[derive(Clone, Debug)]
pub struct PgPool {
    database_url: String,
}

#[cfg(feature = "postgres")]
impl PgPool {
    /// Create a new PostgreSQL pool.
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
        }
    }

    /// Open a connection.
    pub async fn get(&self) -> Result<PgConn, DieselError> {
        PgConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)
    }
}

/// Unified database pool that supports both SQLite and PostgreSQL.
#[derive(Clone, Debug)]
pub enum DbPool {
    Sqlite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl DbPool {
    /// Create a pool from a database URL.
    ///
    /// Detects the backend from the URL:
    /// - `postgres://` or `postgresql://` → PostgreSQL
    /// - Everything else → SQLite
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        if is_postgres_url(url) {
            #[cfg(feature = "postgres")]
            {
                return Ok(DbPool::Postgres(PgPool::new(url)));
            }
            #[cfg(not(feature = "postgres"))]
            {
                return Err(DieselError::QueryBuilderError(
                    "PostgreSQL support not compiled. Use --features postgres".into(),
                ));
            }
        }

        Ok(DbPool::Sqlite(SqlitePool::new(url)))
    }

    /// Create a SQLite pool from a file path.
    pub fn sqlite_from_path(path: &Path) -> Self {
        DbPool::Sqlite(SqlitePool::from_path(path))
    }

    /// Check if this is a SQLite backend.
    pub fn is_sqlite(&self) -> bool {
        matches!(self, DbPool::Sqlite(_))
    }

    /// Check if this is a PostgreSQL backend.
    #[cfg(feature = "postgres")]
    pub fn is_postgres(&self) -> bool {
        matches!(self, DbPool::Postgres(_))
    }
}

/// Run a database operation on a fresh connection for either backend.
///
/// The same Diesel DSL body is compiled once per backend; the connection is
/// dropped when the block ends.
///
/// # Example
/// ```ignore
/// with_conn!(self.pool, conn, {
///     raw_batches::table.count().get_result::<i64>(&mut conn).await
/// })
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:block) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                #[allow(unused_mut)]
                let mut $conn = pool.get().await?;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                #[allow(unused_mut)]
                let mut $conn = pool.get().await?;
                $body
            }
        }
    }};
}

/// Run a database operation that needs different SQL per backend.
///
/// # Example
/// ```ignore
/// with_conn_split!(self.pool,
///     sqlite: conn => {
///         diesel::insert_or_ignore_into(table).values(rows).execute(&mut conn).await
///     },
///     postgres: conn => {
///         diesel::insert_into(table).values(rows).on_conflict_do_nothing().execute(&mut conn).await
///     }
/// )
/// ```
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, sqlite: $sqlite_conn:ident => $sqlite_body:block, postgres: $pg_conn:ident => $pg_body:block) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                #[allow(unused_mut)]
                let mut $sqlite_conn = pool.get().await?;
                $sqlite_body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                #[allow(unused_mut)]
                let mut $pg_conn = pool.get().await?;
                $pg_body
            }
        }
    }};
}
