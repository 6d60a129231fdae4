//! In-process store
//!
//! Mirrors the bundled schema's unique constraints, `ON CONFLICT DO NOTHING`
//! semantics and per-table id sequences. Transactions work on a copy of the
//! tables and hold the store lock until commit or rollback, so they are
//! serialized against each other and against autocommit statements.

use super::store::{BatchInsert, Executor, Id, KeyLookup, OnConflict, SqlValue, Store, Transaction};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Unique constraints per table, as declared in the schema
fn unique_constraints(table: &str) -> &'static [&'static [&'static str]] {
    match table {
        "groups" => &[&["name"]],
        "archives" => &[&["code"]],
        "categories" => &[&["code"]],
        "organisations" => &[&["name"]],
        "authors" => &[&["full_name"]],
        "eprints" => &[&["source_id"]],
        "websites" => &[&["name"]],
        "authors_organisations" => &[&["author_id", "organisation_id"]],
        "papers_authors" => &[&["paper_id", "author_id"]],
        "eprints_categories" => &[&["eprint_id", "category_id"]],
        _ => &[],
    }
}

/// Association tables have composite primary keys and no id column
fn has_id_column(table: &str) -> bool {
    !matches!(
        table,
        "authors_organisations" | "papers_authors" | "eprints_categories"
    )
}

/// Stored row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: Option<Id>,
    pub values: HashMap<String, SqlValue>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(SqlValue::as_text)
    }

    pub fn bigint(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_bigint)
    }

    fn conflicts_with(&self, other: &HashMap<String, SqlValue>, columns: &[&str]) -> bool {
        columns.iter().all(|column| {
            match (self.values.get(*column), other.get(*column)) {
                // NULLs never collide, as in Postgres
                (Some(a), Some(b)) => !a.is_null() && a == b,
                _ => false,
            }
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    last_id: Id,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: HashMap<String, Table>,
}

impl Tables {
    fn insert(&mut self, insert: &BatchInsert, failing: Option<&str>) -> Result<Vec<Id>> {
        if failing == Some(insert.table) {
            return Err(AppError::Internal {
                message: format!("simulated failure writing {}", insert.table),
            });
        }

        let constraints = unique_constraints(insert.table);
        let with_id = has_id_column(insert.table);

        // Statement-level atomicity: mutate a copy, swap it in on success
        let mut table = self.tables.get(insert.table).cloned().unwrap_or_default();
        let mut ids = Vec::new();

        for values in &insert.rows {
            if values.len() != insert.columns.len() {
                return Err(AppError::Internal {
                    message: format!(
                        "{} values for {} columns of {}",
                        values.len(),
                        insert.columns.len(),
                        insert.table
                    ),
                });
            }

            let values: HashMap<String, SqlValue> = insert
                .columns
                .iter()
                .map(|c| c.to_string())
                .zip(values.iter().cloned())
                .collect();

            let conflict = constraints
                .iter()
                .find(|columns| table.rows.iter().any(|row| row.conflicts_with(&values, columns)));

            if let Some(columns) = conflict {
                match insert.on_conflict {
                    OnConflict::DoNothing => continue,
                    OnConflict::Fail => {
                        return Err(AppError::ConstraintViolation {
                            table: insert.table.to_string(),
                            message: format!("duplicate key on ({})", columns.join(", ")),
                        })
                    }
                }
            }

            let id = if with_id {
                table.last_id += 1;
                Some(table.last_id)
            } else {
                None
            };

            if insert.returning_id {
                if let Some(id) = id {
                    ids.push(id);
                }
            }
            table.rows.push(Row { id, values });
        }

        self.tables.insert(insert.table.to_string(), table);
        Ok(ids)
    }

    fn lookup_ids(&self, lookup: &KeyLookup) -> HashMap<String, Id> {
        let wanted: HashSet<&str> = lookup.keys.iter().map(String::as_str).collect();
        let Some(table) = self.tables.get(lookup.table) else {
            return HashMap::new();
        };

        table
            .rows
            .iter()
            .filter_map(|row| {
                let key = row.text(lookup.key_column)?;
                let id = row.id?;
                wanted.contains(key).then(|| (key.to_string(), id))
            })
            .collect()
    }

    fn select_text(&self, table: &str, columns: &[&str]) -> Vec<Vec<Option<String>>> {
        self.tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| row.text(c).map(str::to_string))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

/// In-memory `Store`
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failing_table: Arc<RwLock<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert into `table` fail until cleared with `None`
    pub fn fail_inserts_into(&self, table: Option<&str>) {
        if let Ok(mut failing) = self.failing_table.write() {
            *failing = table.map(str::to_string);
        }
    }

    /// Snapshot of a table's committed rows, in insertion order
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().await.rows(table)
    }

    /// Number of committed rows in a table
    pub async fn count(&self, table: &str) -> usize {
        self.rows(table).await.len()
    }

    fn failing_table(&self) -> Option<String> {
        self.failing_table.read().ok().and_then(|f| f.clone())
    }
}

#[async_trait]
impl Executor for MemoryStore {
    async fn insert(&self, insert: BatchInsert) -> Result<Vec<Id>> {
        let failing = self.failing_table();
        let mut tables = self.tables.lock().await;
        tables.insert(&insert, failing.as_deref())
    }

    async fn lookup_ids(&self, lookup: KeyLookup) -> Result<HashMap<String, Id>> {
        Ok(self.tables.lock().await.lookup_ids(&lookup))
    }

    async fn select_text(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
    ) -> Result<Vec<Vec<Option<String>>>> {
        Ok(self.tables.lock().await.select_text(table, columns))
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn as_executor(&self) -> &dyn Executor {
        self
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = Tables::clone(&guard);
        Ok(Box::new(MemoryTransaction {
            guard,
            working: StdMutex::new(working),
            failing_table: self.failing_table(),
        }))
    }
}

/// Transaction over a private copy of the tables
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: StdMutex<Tables>,
    failing_table: Option<String>,
}

impl MemoryTransaction {
    fn poisoned() -> AppError {
        AppError::Internal {
            message: "memory transaction state poisoned".to_string(),
        }
    }
}

#[async_trait]
impl Executor for MemoryTransaction {
    async fn insert(&self, insert: BatchInsert) -> Result<Vec<Id>> {
        let mut working = self.working.lock().map_err(|_| Self::poisoned())?;
        working.insert(&insert, self.failing_table.as_deref())
    }

    async fn lookup_ids(&self, lookup: KeyLookup) -> Result<HashMap<String, Id>> {
        let working = self.working.lock().map_err(|_| Self::poisoned())?;
        Ok(working.lookup_ids(&lookup))
    }

    async fn select_text(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
    ) -> Result<Vec<Vec<Option<String>>>> {
        let working = self.working.lock().map_err(|_| Self::poisoned())?;
        Ok(working.select_text(table, columns))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn as_executor(&self) -> &dyn Executor {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working.into_inner().map_err(|_| Self::poisoned())?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}
