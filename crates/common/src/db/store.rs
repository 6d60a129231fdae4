//! Store abstraction over the SQL collaborator
//!
//! Everything the persistence layer needs from a database fits in three
//! operations: a parameterised batch INSERT (optionally ignoring conflicts and
//! returning generated ids), a natural-key -> id lookup, and explicit
//! transactions. `PgStore` runs them against Postgres, `MemoryStore` keeps the
//! same constraints in process.

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Surrogate identifier assigned by the store
pub type Id = i64;

/// Postgres caps bind parameters per statement at 65535
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    BigInt(Option<i64>),
    Int(Option<i32>),
    Bool(bool),
    Json(Option<serde_json::Value>),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(Some(value.into()))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            SqlValue::BigInt(v) => *v,
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            SqlValue::Int(v) => *v,
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            SqlValue::Json(v) => v.as_ref(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            SqlValue::Text(None) | SqlValue::BigInt(None) | SqlValue::Int(None) | SqlValue::Json(None)
        )
    }
}

impl From<SqlValue> for sea_orm::Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Text(v) => v.into(),
            SqlValue::BigInt(v) => v.into(),
            SqlValue::Int(v) => v.into(),
            SqlValue::Bool(v) => v.into(),
            SqlValue::Json(v) => v.into(),
            SqlValue::Timestamp(v) => v.into(),
        }
    }
}

/// Conflict policy of a batch insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// A unique violation fails the statement
    Fail,
    /// Conflicting rows are skipped
    DoNothing,
}

/// Multi-row INSERT
#[derive(Debug, Clone)]
pub struct BatchInsert {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub rows: Vec<Vec<SqlValue>>,
    pub on_conflict: OnConflict,
    pub returning_id: bool,
}

impl BatchInsert {
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            rows: Vec::new(),
            on_conflict: OnConflict::Fail,
            returning_id: false,
        }
    }

    pub fn ignore_conflicts(mut self) -> Self {
        self.on_conflict = OnConflict::DoNothing;
        self
    }

    pub fn returning_id(mut self) -> Self {
        self.returning_id = true;
        self
    }

    pub fn row(mut self, values: Vec<SqlValue>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn rows(mut self, rows: Vec<Vec<SqlValue>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// SQL text with `$n` placeholders for the current rows
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            insert_placeholder(self.columns.len(), self.rows.len(), 1)
        );
        if self.on_conflict == OnConflict::DoNothing {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }
        if self.returning_id {
            sql.push_str(" RETURNING id");
        }
        sql
    }

    /// Bind values in placeholder order
    pub fn bind_values(&self) -> Vec<sea_orm::Value> {
        self.rows
            .iter()
            .flat_map(|row| row.iter().cloned().map(sea_orm::Value::from))
            .collect()
    }

    /// Split into statements that stay under the bind-parameter limit
    pub fn into_chunks(self) -> Vec<BatchInsert> {
        let per_statement = (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1);
        if self.rows.len() <= per_statement {
            return vec![self];
        }

        let BatchInsert {
            table,
            columns,
            rows,
            on_conflict,
            returning_id,
        } = self;

        let mut chunks = Vec::with_capacity(rows.len() / per_statement + 1);
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            chunks.push(BatchInsert {
                table,
                columns,
                rows: rows.by_ref().take(per_statement).collect(),
                on_conflict,
                returning_id,
            });
        }
        chunks
    }
}

/// Natural-key -> id lookup for a set of keys
#[derive(Debug, Clone)]
pub struct KeyLookup {
    pub table: &'static str,
    pub key_column: &'static str,
    pub keys: Vec<String>,
}

impl KeyLookup {
    pub fn new(table: &'static str, key_column: &'static str, keys: Vec<String>) -> Self {
        let mut keys = keys;
        keys.sort();
        keys.dedup();
        Self {
            table,
            key_column,
            keys,
        }
    }

    pub fn to_sql(&self) -> String {
        format!(
            "SELECT id, {key} FROM {table} WHERE {key} IN {placeholder}",
            key = self.key_column,
            table = self.table,
            placeholder = insert_placeholder(self.keys.len(), 1, 1)
        )
    }
}

/// `($1, $2), ($3, $4)` for `column_count = 2, row_count = 2, first_param = 1`
pub fn insert_placeholder(column_count: usize, row_count: usize, first_param: usize) -> String {
    let mut param = first_param;
    let rows: Vec<String> = (0..row_count)
        .map(|_| {
            let row: Vec<String> = (0..column_count)
                .map(|_| {
                    let p = format!("${}", param);
                    param += 1;
                    p
                })
                .collect();
            format!("({})", row.join(", "))
        })
        .collect();
    rows.join(", ")
}

/// SQL execution interface
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a batch insert.
    ///
    /// With `returning_id`, yields the ids of the rows actually inserted, in
    /// input order. Rows skipped by `ON CONFLICT DO NOTHING` yield nothing.
    async fn insert(&self, insert: BatchInsert) -> Result<Vec<Id>>;

    /// Map each existing natural key among `lookup.keys` to its id
    async fn lookup_ids(&self, lookup: KeyLookup) -> Result<HashMap<String, Id>>;

    /// Read text columns of every row of a table
    async fn select_text(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
    ) -> Result<Vec<Vec<Option<String>>>>;
}

/// Explicit unit of work
#[async_trait]
pub trait Transaction: Executor {
    fn as_executor(&self) -> &dyn Executor;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Database handle; statements issued directly on it autocommit
#[async_trait]
pub trait Store: Executor {
    fn as_executor(&self) -> &dyn Executor;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
