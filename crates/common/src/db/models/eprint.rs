//! Eprint entity and category references

use super::paper::Paper;
use super::taxonomy::Category;
use crate::db::store::{Id, SqlValue};
use crate::db::upsert::require_id;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved category, as found in the category index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: Id,
    pub code: String,
}

/// Read-only code -> category map, built once from the saved taxonomy
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    by_code: Arc<HashMap<String, CategoryRef>>,
}

impl CategoryIndex {
    /// Index every category that has an id
    pub fn from_categories<'a>(categories: impl IntoIterator<Item = &'a Category>) -> Self {
        let by_code = categories
            .into_iter()
            .filter_map(|c| {
                c.id.map(|id| {
                    (
                        c.code.clone(),
                        CategoryRef {
                            id,
                            code: c.code.clone(),
                        },
                    )
                })
            })
            .collect();
        Self {
            by_code: Arc::new(by_code),
        }
    }

    pub fn get(&self, code: &str) -> Option<&CategoryRef> {
        self.by_code.get(code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl FromIterator<CategoryRef> for CategoryIndex {
    fn from_iter<I: IntoIterator<Item = CategoryRef>>(iter: I) -> Self {
        let by_code = iter.into_iter().map(|c| (c.code.clone(), c)).collect();
        Self {
            by_code: Arc::new(by_code),
        }
    }
}

/// Preprint version of a paper, unique by `source_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eprint {
    pub id: Option<Id>,
    pub source_id: String,
    pub comment: Option<String>,
    pub pdf_link: Option<String>,
    pub latest_version: i32,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub extra: Option<serde_json::Value>,
    pub paper: Paper,
    pub primary_category: Option<CategoryRef>,
    pub other_categories: Vec<CategoryRef>,
}

impl Eprint {
    pub const TABLE: &'static str = "eprints";
    pub const KEY_COLUMN: &'static str = "source_id";
    pub const COLUMNS: &'static [&'static str] = &[
        "source_id",
        "paper_id",
        "comment",
        "extra",
        "latest_version",
        "pdf_link",
        "published_at",
        "updated_at",
    ];

    pub fn new(source_id: impl Into<String>, paper: Paper) -> Self {
        Self {
            id: None,
            source_id: source_id.into(),
            comment: None,
            pdf_link: None,
            latest_version: 1,
            published_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            extra: None,
            paper,
            primary_category: None,
            other_categories: Vec::new(),
        }
    }

    /// Primary first, then the others without repeats of the primary
    pub fn categories(&self) -> impl Iterator<Item = (&CategoryRef, bool)> {
        let primary = self.primary_category.as_ref();
        primary.map(|c| (c, true)).into_iter().chain(
            self.other_categories
                .iter()
                .filter(move |c| primary.map_or(true, |p| p.id != c.id))
                .map(|c| (c, false)),
        )
    }

    /// Unknown category codes kept under `extra.categories`
    pub fn extra_categories(&self) -> Vec<String> {
        self.extra
            .as_ref()
            .and_then(|e| e.get("categories"))
            .and_then(|c| c.as_array())
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn row(&self) -> Result<Vec<SqlValue>> {
        let paper_id = require_id(self.paper.id, "paper", &self.source_id)?;
        Ok(vec![
            SqlValue::text(&self.source_id),
            SqlValue::BigInt(Some(paper_id)),
            SqlValue::Text(self.comment.clone()),
            SqlValue::Json(self.extra.clone()),
            SqlValue::Int(Some(self.latest_version)),
            SqlValue::Text(self.pdf_link.clone()),
            SqlValue::Timestamp(self.published_at),
            SqlValue::Timestamp(self.updated_at),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: Id, code: &str) -> CategoryRef {
        CategoryRef {
            id,
            code: code.to_string(),
        }
    }

    #[test]
    fn test_categories_put_primary_first_without_repeats() {
        let mut eprint = Eprint::new("2101.00001v1", Paper::new("t", "a"));
        eprint.primary_category = Some(cat(2, "cs.AI"));
        eprint.other_categories = vec![cat(3, "cs.LG"), cat(2, "cs.AI")];

        let cats: Vec<_> = eprint
            .categories()
            .map(|(c, primary)| (c.code.as_str(), primary))
            .collect();
        assert_eq!(cats, vec![("cs.AI", true), ("cs.LG", false)]);
    }

    #[test]
    fn test_index_skips_unsaved_categories() {
        let mut saved = Category::new("cs.AI", "Artificial Intelligence");
        saved.id = Some(7);
        let unsaved = Category::new("cs.LG", "Machine Learning");

        let index = CategoryIndex::from_categories([&saved, &unsaved]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("cs.AI").map(|c| c.id), Some(7));
        assert!(index.get("cs.LG").is_none());
    }

    #[test]
    fn test_extra_categories() {
        let mut eprint = Eprint::new("x", Paper::new("t", "a"));
        assert!(eprint.extra_categories().is_empty());

        eprint.extra = Some(serde_json::json!({ "categories": ["math.XX", "q-bio.YY"] }));
        assert_eq!(eprint.extra_categories(), vec!["math.XX", "q-bio.YY"]);
    }
}
