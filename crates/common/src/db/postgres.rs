//! Postgres-backed store

use super::store::{BatchInsert, Executor, Id, KeyLookup, Store, Transaction, MAX_BIND_PARAMS};
use super::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, Statement, TransactionTrait,
};
use std::collections::HashMap;
use tracing::debug;

/// Store over a sea-orm connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Open Postgres transaction
pub struct PgTransaction {
    tx: DatabaseTransaction,
}

async fn run_insert<C>(conn: &C, insert: BatchInsert) -> Result<Vec<Id>>
where
    C: ConnectionTrait + Sync,
{
    if insert.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::with_capacity(insert.rows.len());
    for chunk in insert.into_chunks() {
        let sql = chunk.to_sql();
        debug!(table = chunk.table, rows = chunk.rows.len(), "Batch insert");
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, chunk.bind_values());

        if chunk.returning_id {
            let rows = conn.query_all(stmt).await?;
            for row in rows {
                ids.push(row.try_get_by_index::<i64>(0)?);
            }
        } else {
            conn.execute(stmt).await?;
        }
    }

    Ok(ids)
}

async fn run_lookup<C>(conn: &C, lookup: KeyLookup) -> Result<HashMap<String, Id>>
where
    C: ConnectionTrait + Sync,
{
    let mut ids = HashMap::with_capacity(lookup.keys.len());
    for keys in lookup.keys.chunks(MAX_BIND_PARAMS) {
        let chunk = KeyLookup {
            table: lookup.table,
            key_column: lookup.key_column,
            keys: keys.to_vec(),
        };
        let values: Vec<sea_orm::Value> = chunk.keys.iter().cloned().map(Into::into).collect();
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, chunk.to_sql(), values);

        for row in conn.query_all(stmt).await? {
            let id: i64 = row.try_get_by_index(0)?;
            let key: String = row.try_get_by_index(1)?;
            ids.insert(key, id);
        }
    }
    Ok(ids)
}

async fn run_select_text<C>(
    conn: &C,
    table: &'static str,
    columns: &'static [&'static str],
) -> Result<Vec<Vec<Option<String>>>>
where
    C: ConnectionTrait + Sync,
{
    let sql = format!("SELECT {} FROM {} ORDER BY id", columns.join(", "), table);
    let stmt = Statement::from_string(DbBackend::Postgres, sql);

    let mut out = Vec::new();
    for row in conn.query_all(stmt).await? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(row.try_get_by_index::<Option<String>>(idx)?);
        }
        out.push(values);
    }
    Ok(out)
}

#[async_trait]
impl Executor for PgStore {
    async fn insert(&self, insert: BatchInsert) -> Result<Vec<Id>> {
        run_insert(self.pool.write(), insert).await
    }

    async fn lookup_ids(&self, lookup: KeyLookup) -> Result<HashMap<String, Id>> {
        run_lookup(self.pool.write(), lookup).await
    }

    async fn select_text(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
    ) -> Result<Vec<Vec<Option<String>>>> {
        run_select_text(self.pool.read(), table, columns).await
    }
}

#[async_trait]
impl Store for PgStore {
    fn as_executor(&self) -> &dyn Executor {
        self
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.write().begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

#[async_trait]
impl Executor for PgTransaction {
    async fn insert(&self, insert: BatchInsert) -> Result<Vec<Id>> {
        run_insert(&self.tx, insert).await
    }

    async fn lookup_ids(&self, lookup: KeyLookup) -> Result<HashMap<String, Id>> {
        run_lookup(&self.tx, lookup).await
    }

    async fn select_text(
        &self,
        table: &'static str,
        columns: &'static [&'static str],
    ) -> Result<Vec<Vec<Option<String>>>> {
        run_select_text(&self.tx, table, columns).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn as_executor(&self) -> &dyn Executor {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
