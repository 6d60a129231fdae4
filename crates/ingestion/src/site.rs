//! Per-site harvest runner

use crate::driver::{CategoryReport, SearchSession};
use crate::errors::IngestionError;
use crate::fetch::{DocumentKind, Fetcher};
use crate::taxonomy::load_taxonomy;
use paperharvest_common::config::SearchConfig;
use paperharvest_common::db::models::Website;
use paperharvest_common::db::Repository;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn, Instrument};

/// Site name that enables the taxonomy and search pipeline
pub const ARXIV_SITE: &str = "arXiv";

/// Outcome of one site run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteReport {
    pub site: String,
    pub init_urls_fetched: usize,
    pub categories: Vec<CategoryReport>,
}

/// Runs one configured website
pub struct SiteHarvester {
    site: Website,
    repo: Repository,
    fetcher: Arc<dyn Fetcher>,
    search: SearchConfig,
}

impl SiteHarvester {
    pub fn new(
        site: Website,
        repo: Repository,
        fetcher: Arc<dyn Fetcher>,
        search: SearchConfig,
    ) -> Self {
        Self {
            site,
            repo,
            fetcher,
            search,
        }
    }

    pub fn is_arxiv(&self) -> bool {
        self.site.name.eq_ignore_ascii_case(ARXIV_SITE)
    }

    /// Load the taxonomy, visit the init URLs, then search every category.
    ///
    /// Only fatal errors are returned; everything else is logged.
    #[instrument(skip(self), fields(site = %self.site.name))]
    pub async fn run(&self) -> Result<SiteReport, IngestionError> {
        info!("Scraping site");
        let mut report = SiteReport {
            site: self.site.name.clone(),
            ..SiteReport::default()
        };

        if !self.is_arxiv() {
            warn!("No search pipeline for this site, visiting init URLs only");
            for url in &self.site.init_urls {
                match self.fetcher.fetch(url).await {
                    Ok(document) => {
                        report.init_urls_fetched += 1;
                        info!(url = %url, kind = ?document.kind, "Fetched init URL");
                    }
                    Err(e) => error!(url = %url, error = %e, "Visiting init URL failed"),
                }
            }
            return Ok(report);
        }

        let index =
            load_taxonomy(self.fetcher.as_ref(), &self.repo, &self.search.taxonomy_url).await?;
        info!(categories = index.len(), "Categories loaded, starting search");

        let session = SearchSession::new(
            self.repo.clone(),
            Arc::clone(&self.fetcher),
            index,
            self.search.clone(),
        );

        for url in &self.site.init_urls {
            if self.visit_init_url(&session, url).await? {
                report.init_urls_fetched += 1;
            }
        }

        report.categories = session.search_all(&self.site.categories).await?;
        info!(categories = report.categories.len(), "Site done");
        Ok(report)
    }

    /// Feed documents go through the entry pipeline; other documents are logged
    async fn visit_init_url(
        &self,
        session: &SearchSession,
        url: &str,
    ) -> Result<bool, IngestionError> {
        let document = match self.fetcher.fetch(url).await {
            Ok(document) => document,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(url = %url, error = %e, "Visiting init URL failed");
                return Ok(false);
            }
        };

        if document.kind != DocumentKind::Xml {
            info!(url = %url, "Init URL is not a feed, nothing to parse");
            return Ok(true);
        }

        let mut page_report = CategoryReport {
            category: url.to_string(),
            ..CategoryReport::default()
        };
        match session.process_page(url, &document.body, &mut page_report).await {
            Ok(()) => info!(
                url = %url,
                saved = page_report.saved,
                duplicates = page_report.duplicates,
                "Init feed processed"
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!(url = %url, error = %e, "Unreadable init feed"),
        }
        Ok(true)
    }
}

/// Run every site concurrently in the current span.
///
/// The first site that fails aborts the remaining ones and its error is returned.
pub async fn harvest_sites(
    harvesters: Vec<SiteHarvester>,
) -> Result<Vec<SiteReport>, IngestionError> {
    let mut tasks = JoinSet::new();
    for harvester in harvesters {
        tasks.spawn(async move { harvester.run().await }.in_current_span());
    }

    let mut reports = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(IngestionError::from).and_then(|r| r) {
            Ok(report) => {
                info!(
                    site = %report.site,
                    summary = %serde_json::to_string(&report).unwrap_or_default(),
                    "Site finished"
                );
                reports.push(report);
            }
            Err(e) => {
                error!(error = %e, remaining = tasks.len(), "Site failed, aborting the others");
                tasks.abort_all();
                return Err(e);
            }
        }
    }
    Ok(reports)
}
