//! Many-to-many link rows
//!
//! Author↔organisation and eprint↔category links are inserted with
//! `ON CONFLICT DO NOTHING`, so re-linking an existing pair is harmless.
//! Paper↔author links are plain inserts. Both endpoints must already carry ids.

use crate::db::models::{Author, Eprint, Paper};
use crate::db::store::{BatchInsert, Executor, Id, SqlValue};
use crate::db::upsert::require_id;
use crate::errors::Result;
use std::collections::HashSet;
use tracing::warn;

const AUTHORS_ORGANISATIONS: &[&str] = &["author_id", "organisation_id"];
const PAPERS_AUTHORS: &[&str] = &["paper_id", "author_id", "author_order"];
const EPRINTS_CATEGORIES: &[&str] = &["eprint_id", "category_id", "is_primary"];

async fn insert_links(exec: &dyn Executor, insert: BatchInsert) -> Result<()> {
    if insert.is_empty() {
        return Ok(());
    }
    exec.insert(insert).await?;
    Ok(())
}

/// One row per distinct (author, organisation) pair, in id order
pub async fn save_author_organisation_links(exec: &dyn Executor, authors: &[Author]) -> Result<()> {
    let mut pairs: Vec<(Id, Id)> = Vec::new();
    for author in authors {
        let author_id = require_id(author.id, "author", &author.full_name)?;
        for organisation in &author.organisations {
            let organisation_id = require_id(organisation.id, "organisation", &organisation.name)?;
            pairs.push((author_id, organisation_id));
        }
    }
    // Shared pairs are locked in the same order by concurrent saves
    pairs.sort_unstable();
    pairs.dedup();

    let rows = pairs
        .into_iter()
        .map(|(author_id, organisation_id)| {
            vec![
                SqlValue::BigInt(Some(author_id)),
                SqlValue::BigInt(Some(organisation_id)),
            ]
        })
        .collect();

    insert_links(
        exec,
        BatchInsert::new("authors_organisations", AUTHORS_ORGANISATIONS)
            .rows(rows)
            .ignore_conflicts(),
    )
    .await
}

/// One row per author, `author_order` is the zero-based position.
///
/// Two authors resolving to the same stored author keep the first position.
pub async fn save_paper_author_links(exec: &dyn Executor, paper: &Paper) -> Result<()> {
    let paper_id = require_id(paper.id, "paper", &paper.title)?;

    let mut seen = HashSet::with_capacity(paper.authors.len());
    let mut rows = Vec::with_capacity(paper.authors.len());
    for (order, author) in paper.authors.iter().enumerate() {
        let author_id = require_id(author.id, "author", &author.full_name)?;
        if !seen.insert(author_id) {
            warn!(
                paper = %paper.title,
                author = %author.full_name,
                position = order,
                "Author listed twice on one paper, keeping the first position"
            );
            continue;
        }
        rows.push(vec![
            SqlValue::BigInt(Some(paper_id)),
            SqlValue::BigInt(Some(author_id)),
            SqlValue::Int(Some(order as i32)),
        ]);
    }

    insert_links(exec, BatchInsert::new("papers_authors", PAPERS_AUTHORS).rows(rows)).await
}

/// Primary category flagged, other categories not
pub async fn save_eprint_category_links(exec: &dyn Executor, eprint: &Eprint) -> Result<()> {
    let eprint_id = require_id(eprint.id, "eprint", &eprint.source_id)?;

    let rows = eprint
        .categories()
        .map(|(category, is_primary)| {
            vec![
                SqlValue::BigInt(Some(eprint_id)),
                SqlValue::BigInt(Some(category.id)),
                SqlValue::Bool(is_primary),
            ]
        })
        .collect();

    insert_links(
        exec,
        BatchInsert::new("eprints_categories", EPRINTS_CATEGORIES)
            .rows(rows)
            .ignore_conflicts(),
    )
    .await
}
