//! Website rows: harvest targets stored in the database

use crate::db::store::Id;
use serde::{Deserialize, Serialize};

/// Harvest target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    pub id: Option<Id>,
    pub name: String,
    pub categories: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub init_urls: Vec<String>,
}

impl Website {
    pub const TABLE: &'static str = "websites";
    pub const COLUMNS: &'static [&'static str] =
        &["name", "category_list", "domain_list", "init_url_list"];

    /// Build from the comma-separated list columns
    pub fn from_columns(
        name: String,
        category_list: Option<&str>,
        domain_list: Option<&str>,
        init_url_list: Option<&str>,
    ) -> Self {
        Self {
            id: None,
            name,
            categories: split_list(category_list),
            allowed_domains: split_list(domain_list),
            init_urls: split_list(init_url_list),
        }
    }
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
