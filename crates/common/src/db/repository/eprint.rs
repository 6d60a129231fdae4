//! Composite eprint save
//!
//! Persists an eprint together with its paper, authors, organisations and
//! all link rows inside one transaction. Either the whole graph is committed
//! or nothing is.

use super::links::{
    save_author_organisation_links, save_eprint_category_links, save_paper_author_links,
};
use crate::db::models::{Author, Eprint, Organisation, Paper};
use crate::db::store::{BatchInsert, Executor, KeyLookup, Store};
use crate::db::upsert::upsert_all;
use crate::errors::{AppError, Result, SaveStep};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Result of a composite save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Graph committed
    Saved,
    /// An eprint with the same `source_id` was already stored; nothing written
    Duplicate,
}

impl SaveOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SaveOutcome::Duplicate)
    }
}

/// Organisations of all authors, one entity per distinct name, plus for each
/// author the indices of its organisations in that list
fn collect_organisations(authors: &[Author]) -> (Vec<Organisation>, Vec<Vec<usize>>) {
    let mut organisations: Vec<Organisation> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    let slots = authors
        .iter()
        .map(|author| {
            author
                .organisations
                .iter()
                .map(|org| {
                    *by_name.entry(org.name.clone()).or_insert_with(|| {
                        organisations.push(Organisation::new(org.name.clone()));
                        organisations.len() - 1
                    })
                })
                .collect()
        })
        .collect();

    (organisations, slots)
}

/// Point every author at the resolved organisation entities
fn rebind_organisations(authors: &mut [Author], organisations: &[Organisation], slots: &[Vec<usize>]) {
    for (author, indices) in authors.iter_mut().zip(slots) {
        author.organisations = indices.iter().map(|&i| organisations[i].clone()).collect();
    }
}

async fn save_paper(exec: &dyn Executor, paper: &mut Paper) -> Result<()> {
    let ids = exec
        .insert(
            BatchInsert::new(Paper::TABLE, Paper::COLUMNS)
                .row(paper.row())
                .returning_id(),
        )
        .await?;

    match ids.first() {
        Some(&id) => {
            paper.id = Some(id);
            Ok(())
        }
        None => Err(AppError::Internal {
            message: "paper insert returned no id".to_string(),
        }),
    }
}

async fn write_graph(exec: &dyn Executor, eprint: &mut Eprint) -> Result<SaveOutcome> {
    let source_id = eprint.source_id.clone();
    let at = |step: SaveStep| {
        let source_id = source_id.clone();
        move |e: AppError| AppError::eprint(source_id, step, e)
    };

    let existing = exec
        .lookup_ids(KeyLookup::new(
            Eprint::TABLE,
            Eprint::KEY_COLUMN,
            vec![source_id.clone()],
        ))
        .await
        .map_err(at(SaveStep::DuplicateCheck))?;
    if existing.contains_key(&source_id) {
        return Ok(SaveOutcome::Duplicate);
    }

    let paper = &mut eprint.paper;

    let (mut organisations, slots) = collect_organisations(&paper.authors);
    upsert_all(exec, &mut organisations)
        .await
        .map_err(at(SaveStep::Organisations))?;
    rebind_organisations(&mut paper.authors, &organisations, &slots);

    upsert_all(exec, &mut paper.authors)
        .await
        .map_err(at(SaveStep::Authors))?;

    save_author_organisation_links(exec, &paper.authors)
        .await
        .map_err(at(SaveStep::AuthorOrganisationLinks))?;

    save_paper(exec, paper).await.map_err(at(SaveStep::Paper))?;

    save_paper_author_links(exec, paper)
        .await
        .map_err(at(SaveStep::PaperAuthorLinks))?;

    let row = eprint.row().map_err(at(SaveStep::Eprint))?;
    let ids = exec
        .insert(
            BatchInsert::new(Eprint::TABLE, Eprint::COLUMNS)
                .row(row)
                .ignore_conflicts()
                .returning_id(),
        )
        .await
        .map_err(at(SaveStep::Eprint))?;

    match ids.first() {
        Some(&id) => eprint.id = Some(id),
        // Lost a race against a concurrent save of the same eprint
        None => return Ok(SaveOutcome::Duplicate),
    }

    save_eprint_category_links(exec, eprint)
        .await
        .map_err(at(SaveStep::EprintCategoryLinks))?;

    Ok(SaveOutcome::Saved)
}

/// Save the whole eprint graph in one transaction.
///
/// A duplicate `source_id` rolls back and reports `Duplicate`; any other
/// failure rolls back and returns the error naming the failed step.
#[instrument(skip(store, eprint), fields(source_id = %eprint.source_id))]
pub async fn save_eprint(store: &dyn Store, eprint: &mut Eprint) -> Result<SaveOutcome> {
    let tx = store
        .begin()
        .await
        .map_err(|e| AppError::eprint(eprint.source_id.clone(), SaveStep::Begin, e))?;

    let result = write_graph(tx.as_executor(), eprint).await;

    match result {
        Ok(SaveOutcome::Saved) => {
            tx.commit()
                .await
                .map_err(|e| AppError::eprint(eprint.source_id.clone(), SaveStep::Commit, e))?;
            debug!("Eprint saved");
            Ok(SaveOutcome::Saved)
        }
        Ok(SaveOutcome::Duplicate) => {
            tx.rollback()
                .await
                .map_err(|e| AppError::eprint(eprint.source_id.clone(), SaveStep::Rollback, e))?;
            debug!("Eprint already stored");
            Ok(SaveOutcome::Duplicate)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
