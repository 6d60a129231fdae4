//! Idempotent batch upsert keyed by natural key
//!
//! One multi-row `INSERT .. ON CONFLICT DO NOTHING RETURNING id` per batch.
//! Rows are sent sorted by natural key so concurrent transactions lock shared
//! keys in the same order. When every row was new, the returned ids are
//! assigned back through that ordering.
//! Otherwise the ids of the whole batch are fetched by natural key and
//! assigned by key, so entities that already existed get their stored id.

use super::store::{BatchInsert, Executor, Id, KeyLookup, SqlValue};
use crate::errors::{AppError, Result};
use tracing::{debug, instrument};

/// Entity with a unique natural key and a store-assigned id
pub trait NaturalKeyed {
    /// Entity name used in errors and logs
    const ENTITY: &'static str;
    const TABLE: &'static str;
    const KEY_COLUMN: &'static str;
    /// Insert columns, in the order of `row()`
    const COLUMNS: &'static [&'static str];

    fn natural_key(&self) -> &str;

    /// Column values. Fails if a required parent id is still unresolved.
    fn row(&self) -> Result<Vec<SqlValue>>;

    fn id(&self) -> Option<Id>;

    fn set_id(&mut self, id: Id);
}

impl<T: NaturalKeyed + ?Sized> NaturalKeyed for &mut T {
    const ENTITY: &'static str = T::ENTITY;
    const TABLE: &'static str = T::TABLE;
    const KEY_COLUMN: &'static str = T::KEY_COLUMN;
    const COLUMNS: &'static [&'static str] = T::COLUMNS;

    fn natural_key(&self) -> &str {
        (**self).natural_key()
    }

    fn row(&self) -> Result<Vec<SqlValue>> {
        (**self).row()
    }

    fn id(&self) -> Option<Id> {
        (**self).id()
    }

    fn set_id(&mut self, id: Id) {
        (**self).set_id(id)
    }
}

/// Insert missing entities and assign every entity its id.
///
/// After success each entity's `id()` is `Some`. An empty slice is a no-op.
#[instrument(skip(exec, entities), fields(entity = E::ENTITY, count = entities.len()))]
pub async fn upsert_all<E>(exec: &dyn Executor, entities: &mut [E]) -> Result<()>
where
    E: NaturalKeyed + Send,
{
    if entities.is_empty() {
        return Ok(());
    }

    let mut order: Vec<usize> = (0..entities.len()).collect();
    order.sort_by(|&a, &b| entities[a].natural_key().cmp(entities[b].natural_key()));

    let mut rows = Vec::with_capacity(entities.len());
    for &position in &order {
        let entity = &entities[position];
        if entity.natural_key().trim().is_empty() {
            return Err(AppError::InvalidEntity {
                entity: E::ENTITY,
                message: format!("empty {}", E::KEY_COLUMN),
            });
        }
        rows.push(entity.row()?);
    }

    let insert = BatchInsert::new(E::TABLE, E::COLUMNS)
        .rows(rows)
        .ignore_conflicts()
        .returning_id();

    let inserted = exec
        .insert(insert)
        .await
        .map_err(|e| AppError::persistence(E::ENTITY, "inserting", e))?;

    if inserted.len() == entities.len() {
        for (&position, id) in order.iter().zip(inserted) {
            entities[position].set_id(id);
        }
        return Ok(());
    }

    debug!(
        inserted = inserted.len(),
        "Some rows already existed, resolving ids by natural key"
    );

    let keys = entities
        .iter()
        .map(|e| e.natural_key().to_string())
        .collect();
    let ids = exec
        .lookup_ids(KeyLookup::new(E::TABLE, E::KEY_COLUMN, keys))
        .await
        .map_err(|e| AppError::persistence(E::ENTITY, "fetching ids of", e))?;

    for entity in entities.iter_mut() {
        match ids.get(entity.natural_key()) {
            Some(&id) => entity.set_id(id),
            None => {
                return Err(AppError::UnresolvedReference {
                    entity: E::ENTITY,
                    key: entity.natural_key().to_string(),
                })
            }
        }
    }

    Ok(())
}

/// Resolved id of a parent, or an unresolved-reference error
pub fn require_id(id: Option<Id>, entity: &'static str, key: &str) -> Result<Id> {
    id.ok_or_else(|| AppError::UnresolvedReference {
        entity,
        key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[derive(Debug, Clone)]
    struct Tag {
        id: Option<Id>,
        name: String,
    }

    impl Tag {
        fn new(name: &str) -> Self {
            Self {
                id: None,
                name: name.to_string(),
            }
        }
    }

    impl NaturalKeyed for Tag {
        const ENTITY: &'static str = "organisation";
        const TABLE: &'static str = "organisations";
        const KEY_COLUMN: &'static str = "name";
        const COLUMNS: &'static [&'static str] = &["name"];

        fn natural_key(&self) -> &str {
            &self.name
        }

        fn row(&self) -> Result<Vec<SqlValue>> {
            Ok(vec![SqlValue::text(&self.name)])
        }

        fn id(&self) -> Option<Id> {
            self.id
        }

        fn set_id(&mut self, id: Id) {
            self.id = Some(id);
        }
    }

    #[tokio::test]
    async fn test_all_new_assigns_positionally() {
        let store = MemoryStore::new();
        let mut tags = vec![Tag::new("a"), Tag::new("b"), Tag::new("c")];

        upsert_all(&store, &mut tags).await.unwrap();

        let ids: Vec<_> = tags.iter().map(|t| t.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_rows_are_inserted_in_key_order() {
        let store = MemoryStore::new();
        let mut tags = vec![Tag::new("c"), Tag::new("a"), Tag::new("b")];

        upsert_all(&store, &mut tags).await.unwrap();

        let names: Vec<_> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        let ids: Vec<_> = tags.iter().map(|t| t.id.unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let stored: Vec<_> = store
            .rows("organisations")
            .await
            .iter()
            .map(|r| r.text("name").map(str::to_string))
            .collect();
        assert_eq!(
            stored,
            vec![Some("a".to_string()), Some("b".to_string()), Some("c".to_string())]
        );
    }

    #[tokio::test]
    async fn test_partial_conflict_resolves_every_entity_by_key() {
        let store = MemoryStore::new();
        let mut first = vec![Tag::new("b")];
        upsert_all(&store, &mut first).await.unwrap();

        let mut tags = vec![Tag::new("a"), Tag::new("b"), Tag::new("a")];
        upsert_all(&store, &mut tags).await.unwrap();

        assert_eq!(tags[1].id, first[0].id);
        assert_eq!(tags[0].id, tags[2].id);
        assert_ne!(tags[0].id, tags[1].id);
        assert_eq!(store.count("organisations").await, 2);
    }

    #[tokio::test]
    async fn test_repeat_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let mut tags = vec![Tag::new("x"), Tag::new("y")];
        upsert_all(&store, &mut tags).await.unwrap();

        let mut again = vec![Tag::new("y"), Tag::new("x")];
        upsert_all(&store, &mut again).await.unwrap();

        assert_eq!(again[0].id, tags[1].id);
        assert_eq!(again[1].id, tags[0].id);
        assert_eq!(store.count("organisations").await, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = MemoryStore::new();
        let mut tags: Vec<Tag> = Vec::new();
        upsert_all(&store, &mut tags).await.unwrap();
        assert_eq!(store.count("organisations").await, 0);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let store = MemoryStore::new();
        let mut tags = vec![Tag::new("  ")];
        let err = upsert_all(&store, &mut tags).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidEntity { .. }));
    }

    #[tokio::test]
    async fn test_upsert_through_mut_refs() {
        let store = MemoryStore::new();
        let mut a = Tag::new("a");
        let mut b = Tag::new("b");
        {
            let mut refs = vec![&mut a, &mut b];
            upsert_all(&store, &mut refs).await.unwrap();
        }
        assert_eq!(a.id, Some(1));
        assert_eq!(b.id, Some(2));
    }
}
