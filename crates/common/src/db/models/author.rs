//! Authors and their organisations

use crate::db::store::{Id, SqlValue};
use crate::db::upsert::NaturalKeyed;
use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// Affiliation, unique by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Organisation {
    pub id: Option<Id>,
    pub name: String,
}

impl Organisation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// Author, unique by full name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: Option<Id>,
    pub full_name: String,
    pub email: Option<String>,
    pub organisations: Vec<Organisation>,
}

impl Author {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: None,
            full_name: full_name.into(),
            email: None,
            organisations: Vec::new(),
        }
    }

    pub fn with_organisation(mut self, organisation: Organisation) -> Self {
        self.organisations.push(organisation);
        self
    }
}

impl NaturalKeyed for Organisation {
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

impl NaturalKeyed for Author {
    const ENTITY: &'static str = "author";
    const TABLE: &'static str = "authors";
    const KEY_COLUMN: &'static str = "full_name";
    const COLUMNS: &'static [&'static str] = &["email", "full_name"];

    fn natural_key(&self) -> &str {
        &self.full_name
    }

    fn row(&self) -> Result<Vec<SqlValue>> {
        Ok(vec![
            SqlValue::Text(self.email.clone()),
            SqlValue::text(&self.full_name),
        ])
    }

    fn id(&self) -> Option<Id> {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }
}
