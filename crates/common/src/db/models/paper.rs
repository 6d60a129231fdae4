//! Paper entity

use super::author::Author;
use crate::db::store::{Id, SqlValue};
use serde::{Deserialize, Serialize};

/// Bibliographic work, authors in declared order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: Option<Id>,
    pub title: String,
    pub abstract_text: String,
    pub doi: Option<String>,
    pub journal_ref: Option<String>,
    pub year: Option<i32>,
    pub authors: Vec<Author>,
}

impl Paper {
    pub const TABLE: &'static str = "papers";
    pub const COLUMNS: &'static [&'static str] = &["doi", "journal_ref", "abstract", "title", "year"];

    pub fn new(title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            abstract_text: abstract_text.into(),
            doi: None,
            journal_ref: None,
            year: None,
            authors: Vec::new(),
        }
    }

    pub fn row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.doi.clone()),
            SqlValue::Text(self.journal_ref.clone()),
            SqlValue::text(&self.abstract_text),
            SqlValue::text(&self.title),
            SqlValue::Int(self.year),
        ]
    }
}
