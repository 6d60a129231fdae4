//! Subject taxonomy: Group > Archive > Category

use crate::db::store::{Id, SqlValue};
use crate::db::upsert::{require_id, NaturalKeyed};
use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// Top-level subject group, e.g. "Physics"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Option<Id>,
    pub name: String,
    pub archives: Vec<Archive>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            archives: Vec::new(),
        }
    }

    pub fn with_archive(mut self, archive: Archive) -> Self {
        self.archives.push(archive);
        self
    }
}

/// Archive inside a group, e.g. "astro-ph"
///
/// Empty `code` / `name` are filled in before saving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub id: Option<Id>,
    pub code: String,
    pub name: String,
    pub group_id: Option<Id>,
    pub categories: Vec<Category>,
}

impl Archive {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            group_id: None,
            categories: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }
}

/// Leaf category, e.g. "cs.AI"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<Id>,
    pub code: String,
    pub name: String,
    pub description: String,
    pub archive_id: Option<Id>,
}

impl Category {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            description: String::new(),
            archive_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl NaturalKeyed for Group {
    const ENTITY: &'static str = "group";
    const TABLE: &'static str = "groups";
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

impl NaturalKeyed for Archive {
    const ENTITY: &'static str = "archive";
    const TABLE: &'static str = "archives";
    const KEY_COLUMN: &'static str = "code";
    const COLUMNS: &'static [&'static str] = &["code", "name", "group_id"];

    fn natural_key(&self) -> &str {
        &self.code
    }

    fn row(&self) -> Result<Vec<SqlValue>> {
        let group_id = require_id(self.group_id, Group::ENTITY, &self.code)?;
        Ok(vec![
            SqlValue::text(&self.code),
            SqlValue::text(&self.name),
            SqlValue::BigInt(Some(group_id)),
        ])
    }

    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}

impl NaturalKeyed for Category {
    const ENTITY: &'static str = "category";
    const TABLE: &'static str = "categories";
    const KEY_COLUMN: &'static str = "code";
    const COLUMNS: &'static [&'static str] = &["code", "description", "name", "archive_id"];

    fn natural_key(&self) -> &str {
        &self.code
    }

    fn row(&self) -> Result<Vec<SqlValue>> {
        let archive_id = require_id(self.archive_id, Archive::ENTITY, &self.code)?;
        Ok(vec![
            SqlValue::text(&self.code),
            SqlValue::text(&self.description),
            SqlValue::text(&self.name),
            SqlValue::BigInt(Some(archive_id)),
        ])
    }

    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}
