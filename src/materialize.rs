//! Schema-agnostic row materialization.
//!
//! Columns are discovered from the prepared statement, never assumed. Byte
//! backed cells (SQLite TEXT and BLOB) are normalized to strings so every
//! row serializes as plain JSON.

use std::sync::Arc;

use rusqlite::{types::ValueRef, Connection, Rows, Statement};

use crate::{
    error::StoreError,
    sqlite::SqlQuery,
    value::{Row, Value},
};

/// Lazy, single-pass stream of [`Row`]s over an executing statement.
///
/// Yields at most one error, after which the stream is exhausted.
pub struct RowStream<'stmt> {
    columns: Arc<[String]>,
    rows: Rows<'stmt>,
    done: bool,
}

impl<'stmt> RowStream<'stmt> {
    /// Bind `query.params` and start stepping `stmt`.
    pub fn open(stmt: &'stmt mut Statement<'_>, query: &SqlQuery) -> Result<Self, StoreError> {
        let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query(rusqlite::params_from_iter(query.params.values.iter()))
            .map_err(StoreError::Query)?;
        Ok(Self {
            columns,
            rows,
            done: false,
        })
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Row, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rows.next() {
            Ok(Some(row)) => {
                let decoded = decode_row(&self.columns, row);
                self.done = decoded.is_err();
                Some(decoded)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(StoreError::Query(err)))
            }
        }
    }
}

/// Prepare and run `query`, draining every row. Zero matches yield an empty
/// vector; the first failure discards everything read so far.
pub fn query_rows(conn: &Connection, query: &SqlQuery) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(&query.statement).map_err(StoreError::Query)?;
    let stream = RowStream::open(&mut stmt, query)?;
    stream.collect()
}

fn decode_row(columns: &[String], row: &rusqlite::Row<'_>) -> Result<Row, StoreError> {
    let mut out = Row::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        let cell = row.get_ref(idx).map_err(StoreError::Decode)?;
        out.insert(name.clone(), decode_cell(cell));
    }
    Ok(out)
}

fn decode_cell(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
