//! Save behaviour against a live Postgres
//!
//! Runs only when `PAPERHARVEST_TEST_DATABASE_URL` points at a scratch database.

use chrono::Utc;
use paperharvest_common::db::models::{Author, Eprint, Organisation, Paper};
use paperharvest_common::db::{DbPool, PgStore, Repository, SaveOutcome};
use paperharvest_common::AppConfig;
use std::sync::Arc;
use tokio_test::assert_ok;

const DATABASE_URL_VAR: &str = "PAPERHARVEST_TEST_DATABASE_URL";

async fn connect() -> Option<Repository> {
    let url = std::env::var(DATABASE_URL_VAR).ok()?;
    let mut config = AppConfig::default().database;
    config.url = url;
    config.max_connections = 16;

    let pool = DbPool::new(&config).await.unwrap();
    pool.apply_schema().await.unwrap();
    Some(Repository::new(Arc::new(PgStore::new(pool))))
}

#[tokio::test]
async fn test_concurrent_saves_listing_shared_names_in_opposite_orders() {
    let Some(repo) = connect().await else {
        eprintln!("{} not set, skipping", DATABASE_URL_VAR);
        return;
    };

    let run = Utc::now().timestamp_micros();
    let names: Vec<String> = (0..500).map(|i| format!("run {run} author {i:03}")).collect();

    let mut tasks = Vec::new();
    for task in 0..8 {
        let repo = repo.clone();
        let mut listing = names.clone();
        if task % 2 == 1 {
            listing.reverse();
        }

        tasks.push(tokio::spawn(async move {
            let mut paper = Paper::new(format!("run {run} paper {task}"), "Abstract");
            paper.authors = listing
                .iter()
                .map(|name| {
                    Author::new(name.clone())
                        .with_organisation(Organisation::new(format!("{name} lab")))
                })
                .collect();
            let mut eprint = Eprint::new(format!("{run}.{task:05}v1"), paper);
            let outcome = repo.save_eprint(&mut eprint).await;
            (eprint, outcome)
        }));
    }

    let mut saved = Vec::new();
    for task in tasks {
        let (eprint, outcome) = task.await.unwrap();
        assert_eq!(assert_ok!(outcome), SaveOutcome::Saved);
        saved.push(eprint);
    }

    // Every save resolved the shared names to the same rows, in listing order
    let first = &saved[0].paper.authors;
    let reversed = &saved[1].paper.authors;
    assert_eq!(first[0].full_name, reversed[names.len() - 1].full_name);
    assert_eq!(first[0].id, reversed[names.len() - 1].id);
    assert_eq!(
        first[0].organisations[0].id,
        reversed[names.len() - 1].organisations[0].id
    );
}
