//! End-to-end harvest runs against the in-memory store and a scripted fetcher

use async_trait::async_trait;
use paperharvest_common::config::SearchConfig;
use paperharvest_common::db::models::{Archive, Category, CategoryIndex, Group, Website};
use paperharvest_common::db::{MemoryStore, Repository, SqlValue};
use paperharvest_ingestion::{
    harvest_sites, query_url, Document, DocumentKind, Fetcher, IngestionError, SearchSession,
    SiteHarvester, StopReason,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

const TAXONOMY_URL: &str = "https://arxiv.org/category_taxonomy";

/// Serves canned documents and records every requested URL
#[derive(Default)]
struct ScriptedFetcher {
    documents: HashMap<String, Document>,
    visited: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn serve(mut self, url: String, kind: DocumentKind, body: String) -> Self {
        self.documents.insert(
            url.clone(),
            Document {
                url,
                kind,
                body,
            },
        );
        self
    }

    fn feed(self, config: &SearchConfig, category: &str, start: u64, entries: &[String]) -> Self {
        let url = query_url(config, category, start);
        let body = feed(category, start, config.page_size, entries);
        self.serve(url, DocumentKind::Xml, body)
    }

    /// `fetch` reports this URL as already visited, `refetch` still serves it
    fn already_visited(mut self, url: &str) -> Self {
        self.visited.insert(url.to_string());
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn answer(&self, url: &str) -> Result<Document, IngestionError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| IngestionError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, IngestionError> {
        if self.visited.contains(url) {
            return Err(IngestionError::AlreadyVisited {
                url: url.to_string(),
            });
        }
        self.answer(url)
    }

    async fn refetch(&self, url: &str) -> Result<Document, IngestionError> {
        self.answer(url)
    }
}

/// Never answers
struct StalledFetcher;

#[async_trait]
impl Fetcher for StalledFetcher {
    async fn fetch(&self, _url: &str) -> Result<Document, IngestionError> {
        std::future::pending().await
    }
}

fn feed(category: &str, start: u64, max_results: u64, entries: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=cat:{category}&amp;id_list=&amp;start={start}&amp;max_results={max_results}</title>
  {}
</feed>"#,
        entries.join("\n")
    )
}

fn entry(source_id: &str, categories: &[&str]) -> String {
    let terms: String = categories
        .iter()
        .map(|c| format!(r#"<category term="{c}"/>"#))
        .collect();
    format!(
        r#"<entry>
    <id>http://arxiv.org/abs/{source_id}</id>
    <published>2021-01-01T00:00:00Z</published>
    <updated>2021-01-02T00:00:00Z</updated>
    <title>Paper {source_id}</title>
    <summary>Abstract of {source_id}</summary>
    <author><name>Ada Lovelace</name><arxiv:affiliation>CERN</arxiv:affiliation></author>
    <author><name>Author of {source_id}</name></author>
    <arxiv:primary_category term="{primary}"/>
    {terms}
  </entry>"#,
        primary = categories[0],
    )
}

fn entries(prefix: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| entry(&format!("{prefix}.{i:05}v1"), &["cs.AI"]))
        .collect()
}

fn taxonomy() -> Vec<Group> {
    vec![Group::new("Computer Science").with_archive(
        Archive::new("cs", "Computer Science")
            .with_category(Category::new("cs.AI", "Artificial Intelligence"))
            .with_category(Category::new("cs.LG", "Machine Learning")),
    )]
}

async fn setup() -> (MemoryStore, Repository, CategoryIndex) {
    let store = MemoryStore::new();
    let repo = Repository::new(Arc::new(store.clone()));
    let index = repo.save_taxonomy(&mut taxonomy()).await.unwrap();
    (store, repo, index)
}

fn search_config(duplicate_threshold: u32) -> SearchConfig {
    SearchConfig {
        duplicate_threshold,
        page_size: 1000,
        ..SearchConfig::default()
    }
}

#[tokio::test]
async fn test_duplicate_streak_stops_before_next_page() {
    let (store, repo, index) = setup().await;
    let config = search_config(3);

    let first_page = entries("2101", 5);
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .feed(&config, "cs.AI", 0, &first_page)
            .feed(&config, "cs.AI", 1000, &first_page[..3])
            .feed(&config, "cs.AI", 2000, &entries("2102", 5)),
    );

    let session = SearchSession::new(repo, fetcher.clone(), index, config.clone());
    let report = session.search_category("cs.AI").await.unwrap();

    assert_eq!(
        fetcher.requests(),
        vec![query_url(&config, "cs.AI", 0), query_url(&config, "cs.AI", 1000)]
    );
    assert_eq!(report.stop, Some(StopReason::DuplicateThreshold));
    assert_eq!(report.pages, 2);
    assert_eq!(report.saved, 5);
    assert_eq!(report.duplicates, 3);
    assert_eq!(session.state("cs.AI").await.duplicate_streak, 3);
    assert_eq!(store.count("eprints").await, 5);
    // One shared author plus one per paper
    assert_eq!(store.count("authors").await, 6);
    assert_eq!(store.count("organisations").await, 1);
}

#[tokio::test]
async fn test_fresh_save_resets_the_streak() {
    let (_, repo, index) = setup().await;
    let config = search_config(3);

    let first_page = entries("2101", 3);
    let mut second_page = first_page[..2].to_vec();
    second_page.extend(entries("2102", 1));
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .feed(&config, "cs.AI", 0, &first_page)
            .feed(&config, "cs.AI", 1000, &second_page)
            .feed(&config, "cs.AI", 2000, &[]),
    );

    let session = SearchSession::new(repo, fetcher.clone(), index, config);
    let report = session.search_category("cs.AI").await.unwrap();

    assert_eq!(report.stop, Some(StopReason::EmptyPage));
    assert_eq!(fetcher.requests().len(), 3);
    assert_eq!(session.state("cs.AI").await.duplicate_streak, 0);
}

#[tokio::test]
async fn test_empty_first_page_issues_one_request() {
    let (store, repo, index) = setup().await;
    let config = search_config(50);
    let fetcher = Arc::new(ScriptedFetcher::default().feed(&config, "cs.AI", 0, &[]));

    let session = SearchSession::new(repo, fetcher.clone(), index, config);
    let report = session.search_category("cs.AI").await.unwrap();

    assert_eq!(fetcher.requests().len(), 1);
    assert_eq!(report.stop, Some(StopReason::EmptyPage));
    assert!(session.state("cs.AI").await.last_page_empty);
    assert_eq!(store.count("eprints").await, 0);
}

#[tokio::test]
async fn test_remote_error_page_stops_the_category() {
    let (_, repo, index) = setup().await;
    let config = search_config(50);
    let error_entry = r#"<entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format</id>
    <title>Error</title>
    <summary>incorrect id format</summary>
  </entry>"#
        .to_string();
    let fetcher = Arc::new(ScriptedFetcher::default().feed(&config, "cs.AI", 0, &[error_entry]));

    let session = SearchSession::new(repo, fetcher.clone(), index, config);
    let report = session.search_category("cs.AI").await.unwrap();

    assert_eq!(report.stop, Some(StopReason::EmptyPage));
    assert_eq!(report.skipped, 1);
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_extra_categories_survive_the_pipeline() {
    let (store, repo, index) = setup().await;
    let config = search_config(50);
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .feed(
                &config,
                "cs.AI",
                0,
                &[entry("2101.00001v2", &["cs.AI", "cs.LG", "math.XX", "cs.LG"])],
            )
            .feed(&config, "cs.AI", 1000, &[]),
    );

    let session = SearchSession::new(repo, fetcher, index.clone(), config);
    session.search_category("cs.AI").await.unwrap();

    let eprints = store.rows("eprints").await;
    assert_eq!(eprints.len(), 1);
    assert_eq!(eprints[0].text("source_id"), Some("2101.00001v2"));
    let extra = eprints[0].get("extra").and_then(SqlValue::as_json).unwrap();
    assert_eq!(extra["categories"], serde_json::json!(["math.XX"]));

    let links = store.rows("eprints_categories").await;
    assert_eq!(links.len(), 2);
    let primary: Vec<_> = links
        .iter()
        .filter(|r| r.get("is_primary").and_then(SqlValue::as_bool) == Some(true))
        .map(|r| r.bigint("category_id"))
        .collect();
    assert_eq!(primary, vec![index.get("cs.AI").map(|c| c.id)]);
}

#[tokio::test]
async fn test_failed_saves_do_not_stop_the_page() {
    let (store, repo, index) = setup().await;
    let config = search_config(2);
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .feed(&config, "cs.AI", 0, &entries("2101", 3))
            .feed(&config, "cs.AI", 1000, &[]),
    );
    store.fail_inserts_into(Some("papers_authors"));

    let session = SearchSession::new(repo, fetcher.clone(), index, config);
    let report = session.search_category("cs.AI").await.unwrap();

    assert_eq!(report.failed, 3);
    assert_eq!(report.stop, Some(StopReason::EmptyPage));
    assert_eq!(fetcher.requests().len(), 2);
    assert_eq!(store.count("eprints").await, 0);
    assert_eq!(store.count("authors").await, 0);
}

#[tokio::test]
async fn test_unreachable_page_stops_only_that_category() {
    let (_, repo, index) = setup().await;
    let config = search_config(50);
    let fetcher = Arc::new(ScriptedFetcher::default().feed(&config, "cs.LG", 0, &[]));

    let session = SearchSession::new(repo, fetcher, index, config);
    let reports = session
        .search_all(&["cs.AI".to_string(), "cs.LG".to_string()])
        .await
        .unwrap();

    let stops: HashMap<_, _> = reports.iter().map(|r| (r.category.as_str(), r.stop)).collect();
    assert_eq!(stops["cs.AI"], Some(StopReason::PageFailed));
    assert_eq!(stops["cs.LG"], Some(StopReason::EmptyPage));
}

const TAXONOMY_HTML: &str = r#"<html><body><div id="category_taxonomy_list">
  <h2>Computer Science</h2>
  <div class="accordion-body">
    <div class="columns"><div class="column">
      <div class="columns"><div class="column"><h4>cs.AI <span>(Artificial Intelligence)</span></h4></div>
        <div class="column"><p>AI.</p></div></div>
      <div class="columns"><div class="column"><h4>cs.LG <span>(Machine Learning)</span></h4></div>
        <div class="column"><p>ML.</p></div></div>
    </div></div>
  </div>
</div></body></html>"#;

const MALFORMED_TAXONOMY_HTML: &str = r#"<div id="category_taxonomy_list"><h2>Physics</h2>
  <div class="accordion-body"><div class="columns"><h3>Astrophysics without code</h3>
    <div class="columns"><h4>astro-ph.GA <span>(Galaxies)</span></h4></div>
  </div></div></div>"#;

fn arxiv_site(categories: &[&str]) -> Website {
    Website::from_columns(
        "arXiv".into(),
        Some(categories.join(",").as_str()),
        Some("arxiv.org"),
        None,
    )
}

#[tokio::test]
async fn test_site_harvest_loads_taxonomy_then_searches() {
    let store = MemoryStore::new();
    let repo = Repository::new(Arc::new(store.clone()));
    let config = search_config(50);

    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .serve(TAXONOMY_URL.to_string(), DocumentKind::Html, TAXONOMY_HTML.to_string())
            .feed(&config, "cs.AI", 0, &entries("2101", 2))
            .feed(&config, "cs.AI", 1000, &[]),
    );

    let harvester = SiteHarvester::new(
        arxiv_site(&["cs.AI", "no.SUCH"]),
        repo,
        fetcher.clone(),
        config,
    );
    let report = assert_ok!(harvester.run().await);

    assert_eq!(fetcher.requests()[0], TAXONOMY_URL);
    assert_eq!(report.categories.len(), 1);
    assert_eq!(report.categories[0].saved, 2);
    assert_eq!(store.count("groups").await, 1);
    assert_eq!(store.count("archives").await, 1);
    assert_eq!(store.count("categories").await, 2);
    assert_eq!(store.count("eprints").await, 2);

    let archives = store.rows("archives").await;
    assert_eq!(archives[0].text("code"), Some("cs"));
    assert_eq!(archives[0].text("name"), Some("Computer Science"));
}

#[tokio::test]
async fn test_malformed_taxonomy_aborts_the_site() {
    let repo = Repository::new(Arc::new(MemoryStore::new()));
    let config = search_config(50);
    let fetcher = Arc::new(ScriptedFetcher::default().serve(
        TAXONOMY_URL.to_string(),
        DocumentKind::Html,
        MALFORMED_TAXONOMY_HTML.to_string(),
    ));

    let harvester =
        SiteHarvester::new(arxiv_site(&["astro-ph.GA"]), repo, fetcher.clone(), config);
    let err = harvester.run().await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_fatal_site_aborts_the_sibling_sites() {
    let repo = Repository::new(Arc::new(MemoryStore::new()));
    let config = search_config(50);

    let broken = SiteHarvester::new(
        arxiv_site(&["astro-ph.GA"]),
        repo.clone(),
        Arc::new(ScriptedFetcher::default().serve(
            TAXONOMY_URL.to_string(),
            DocumentKind::Html,
            MALFORMED_TAXONOMY_HTML.to_string(),
        )),
        config.clone(),
    );
    let stalled = SiteHarvester::new(arxiv_site(&["cs.AI"]), repo, Arc::new(StalledFetcher), config);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        harvest_sites(vec![stalled, broken]),
    )
    .await;

    let err = assert_ok!(result).unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_visited_search_pages_are_read_again() {
    let (store, repo, index) = setup().await;
    let config = search_config(50);
    let first_page = query_url(&config, "cs.AI", 0);

    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .feed(&config, "cs.AI", 0, &entries("2103", 2))
            .feed(&config, "cs.AI", 1000, &[])
            .already_visited(&first_page),
    );

    let session = SearchSession::new(repo, fetcher.clone(), index, config.clone());
    let report = session.search_category("cs.AI").await.unwrap();

    assert_eq!(fetcher.requests()[0], first_page);
    assert_eq!(report.saved, 2);
    assert_eq!(report.stop, Some(StopReason::EmptyPage));
    assert_eq!(store.count("eprints").await, 2);
}
