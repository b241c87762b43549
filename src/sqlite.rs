use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{
    types::{ToSqlOutput, Value as SqlValue},
    Connection, OpenFlags, ToSql,
};
use tracing::{debug, info, warn};

use crate::{error::StoreError, materialize, source::ItemSource, value::Row, value::Value};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// rusqlite's busy timeout for a freshly opened connection.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Positional parameter bindings for SQL queries
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: Vec<Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Append the value for the next `?` placeholder
    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.push(value);
        self
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SQL Query with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Boolean(b) => ToSqlOutput::from(*b),
        })
    }
}

/// SQLite store configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    pub max_connections: u32,
    /// Capped at `max_connections` when the pool is built.
    pub min_idle: u32,
    pub max_lifetime: Duration,
    /// How long startup waits for the initial idle connections.
    pub connect_timeout: Duration,
}

impl SqliteConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_MIN_IDLE: u32 = 10;
    pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a new SQLite config for the database at `db_path`
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            min_idle: Self::DEFAULT_MIN_IDLE,
            max_lifetime: Self::DEFAULT_MAX_LIFETIME,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }
    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }
    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Pooled, read-only handle on the SQLite database.
///
/// Cloning shares the same pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the pool. Fails if the initial idle connections cannot be
    /// established within `connect_timeout`.
    pub fn open(config: &SqliteConfig) -> Result<Self, StoreError> {
        info!(path = %config.db_path, max_connections = config.max_connections, "opening sqlite pool");
        let manager = SqliteConnectionManager::file(&config.db_path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let max_connections = config.max_connections.max(1);
        let pool = r2d2::Pool::builder()
            .max_size(max_connections)
            .min_idle(Some(config.min_idle.min(max_connections)))
            .max_lifetime(Some(config.max_lifetime))
            .connection_timeout(config.connect_timeout)
            .build(manager)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `work` on a pooled connection on the blocking thread pool,
    /// bounded by `deadline`.
    async fn with_connection<T, F>(&self, deadline: Instant, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        if Instant::now() >= deadline {
            return Err(StoreError::DeadlineExceeded);
        }
        let pool = self.pool.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let conn = pool.get_timeout(remaining)?;
            if Instant::now() >= deadline {
                return Err(StoreError::DeadlineExceeded);
            }
            let _guard = DeadlineGuard::install(&*conn, deadline, flag)?;
            work(&*conn).map_err(StoreError::or_deadline)
        });

        match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), task).await {
            Ok(joined) => joined?,
            Err(_) => {
                cancelled.store(true, Ordering::Relaxed);
                Err(StoreError::DeadlineExceeded)
            }
        }
    }
}

#[async_trait]
impl ItemSource for SqliteStore {
    async fn fetch(&self, query: SqlQuery, deadline: Instant) -> Result<Vec<Row>, StoreError> {
        debug!(statement = %query.statement, params = query.params.len(), "executing query");
        self.with_connection(deadline, move |conn| materialize::query_rows(conn, &query))
            .await
    }

    async fn ping(&self, deadline: Instant) -> Result<(), StoreError> {
        self.with_connection(deadline, |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(StoreError::Query)
        })
        .await
    }
}

/// Aborts the running statement once the deadline passes or the waiting
/// side gives up, and caps lock waits at the time left. Both are undone on
/// drop so the pooled connection comes back clean.
struct DeadlineGuard<'c> {
    conn: &'c Connection,
}

impl<'c> DeadlineGuard<'c> {
    fn install(
        conn: &'c Connection,
        deadline: Instant,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self, StoreError> {
        // The progress handler never runs while SQLite sleeps on a lock.
        conn.busy_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(StoreError::Query)?;
        conn.progress_handler(
            PROGRESS_CHECK_OPS,
            Some(move || cancelled.load(Ordering::Relaxed) || Instant::now() >= deadline),
        );
        Ok(Self { conn })
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
        if let Err(err) = self.conn.busy_timeout(DEFAULT_BUSY_TIMEOUT) {
            warn!(error = %err, "failed to restore busy timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_keep_bind_order() {
        let params = Params::new().with_value("ring").with_value(71_i64).with_value(50_u32);
        assert_eq!(
            params.values,
            vec![Value::from("ring"), Value::Integer(71), Value::Integer(50)]
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn values_bind_through_rusqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let params = Params::new()
            .with_value(7_i64)
            .with_value(1.5)
            .with_value("gold")
            .with_value(true)
            .with_value(None::<i64>);
        let row: (i64, f64, String, i64, Option<i64>) = conn
            .query_row(
                "SELECT ?, ?, ?, ?, ?",
                rusqlite::params_from_iter(params.values.iter()),
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .unwrap();
        assert_eq!(row, (7, 1.5, "gold".to_string(), 1, None));
    }

    #[test]
    fn config_builders_apply() {
        let config = SqliteConfig::new("items.db")
            .with_max_connections(0)
            .with_min_idle(2)
            .with_max_lifetime(Duration::from_secs(60));
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.min_idle, 2);
        assert_eq!(config.max_lifetime, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, SqliteConfig::DEFAULT_CONNECT_TIMEOUT);
    }
}
