use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::sqlite::SqliteConfig;

/// Log directives used when `RUST_LOG` is unset or blank.
pub const DEFAULT_LOG_FILTER: &str = "items_api=info";

/// Build the log filter from `RUST_LOG`-style directives, falling back to
/// [`DEFAULT_LOG_FILTER`] when they are absent, blank or unparsable.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Read-only listing API for the `items` table
#[derive(Parser, Debug, Clone)]
#[command(name = "items-api")]
#[command(about = "Read-only, seek-paginated listing API over a SQLite items table")]
pub struct Config {
    /// Path to the SQLite database file
    #[arg(long, env = "DB_PATH")]
    pub db_path: String,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Upper bound on pooled connections
    #[arg(
        long,
        env = "DB_MAX_CONNECTIONS",
        default_value_t = SqliteConfig::DEFAULT_MAX_CONNECTIONS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_connections: u32,

    /// Connections kept open while idle (capped at --max-connections)
    #[arg(long, env = "DB_MIN_IDLE", default_value_t = SqliteConfig::DEFAULT_MIN_IDLE)]
    pub min_idle: u32,

    /// Recycle pooled connections after this many seconds
    #[arg(long, env = "DB_CONN_MAX_LIFETIME_SECS", default_value_t = 300)]
    pub conn_max_lifetime_secs: u64,

    /// Deadline for each listing query and health ping, in milliseconds
    #[arg(long, env = "QUERY_TIMEOUT_MS", default_value_t = 2000)]
    pub query_timeout_ms: u64,

    /// Close connections that have not sent complete request headers
    /// within this many milliseconds
    #[arg(long, env = "HEADER_READ_TIMEOUT_MS", default_value_t = 5000)]
    pub header_read_timeout_ms: u64,
}

impl Config {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_millis(self.header_read_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        SqliteConfig::new(self.db_path.clone())
            .with_max_connections(self.max_connections)
            .with_min_idle(self.min_idle)
            .with_max_lifetime(Duration::from_secs(self.conn_max_lifetime_secs))
    }
}
