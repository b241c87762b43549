//! Read-only listing API over a SQLite `items` table.
//!
//! # Intention
//!
//! - Serve filterable, seek-paginated pages of rows from a single table.
//! - Materialize rows without a compile-time schema, preserving column order.
//! - Keep every caller-supplied value in bind-parameter slots.
//!
//! # Architectural Boundaries
//!
//! - Read path only: no writes, joins, migrations or offsets.
//! - SQLite specifics live in [`sqlite`] and [`materialize`]; the planner and
//!   HTTP layer only see [`source::ItemSource`].

pub mod config;
pub mod error;
pub mod materialize;
pub mod planner;
pub mod server;
pub mod source;
pub mod sqlite;
pub mod value;

pub use config::Config;
pub use error::StoreError;
pub use planner::{list_items, FilterField, FilterSet, ListRequest, Page, PageMeta, PageRequest};
pub use source::ItemSource;
pub use sqlite::{Params, SqlQuery, SqliteConfig, SqliteStore};
pub use value::{Row, Value};
