//! Feed pagination driver
//!
//! A `SearchSession` pages through the search API one category at a time,
//! saving every parsed entry, until the category's last page was empty or its
//! duplicate streak reaches the configured threshold.

use crate::errors::IngestionError;
use crate::feed::{parse_feed, EntryOutcome};
use crate::fetch::{DocumentKind, Fetcher};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use paperharvest_common::config::SearchConfig;
use paperharvest_common::db::models::{CategoryIndex, Eprint};
use paperharvest_common::db::{Repository, SaveOutcome};
use paperharvest_common::metrics::{self, EprintOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Stop signals tracked for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryState {
    pub duplicate_streak: u32,
    pub last_page_empty: bool,
}

impl CategoryState {
    pub fn stop_reason(&self, threshold: u32) -> Option<StopReason> {
        if self.last_page_empty {
            Some(StopReason::EmptyPage)
        } else if self.duplicate_streak >= threshold {
            Some(StopReason::DuplicateThreshold)
        } else {
            None
        }
    }

    fn record(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Saved => self.duplicate_streak = 0,
            SaveOutcome::Duplicate => self.duplicate_streak += 1,
        }
    }
}

/// Why a category search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EmptyPage,
    DuplicateThreshold,
    PageFailed,
}

/// Counters for one category search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub pages: u32,
    pub saved: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub skipped: u64,
    pub stop: Option<StopReason>,
}

/// Search API URL for one page of a category
pub fn query_url(config: &SearchConfig, category_code: &str, start: u64) -> String {
    format!(
        "{}?search_query=cat:{}&start={}&max_results={}&sortBy={}&sortOrder={}",
        config.api_base_url,
        category_code,
        start,
        config.page_size,
        config.sort_by,
        config.sort_order
    )
}

/// Category searches of one site, sharing the published category index
pub struct SearchSession {
    repo: Repository,
    fetcher: Arc<dyn Fetcher>,
    index: CategoryIndex,
    config: SearchConfig,
    states: Mutex<HashMap<String, CategoryState>>,
}

impl SearchSession {
    pub fn new(
        repo: Repository,
        fetcher: Arc<dyn Fetcher>,
        index: CategoryIndex,
        config: SearchConfig,
    ) -> Self {
        Self {
            repo,
            fetcher,
            index,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Current stop signals of a category
    pub async fn state(&self, category_code: &str) -> CategoryState {
        self.states
            .lock()
            .await
            .get(category_code)
            .copied()
            .unwrap_or_default()
    }

    async fn update_state(&self, category_code: &str, update: impl FnOnce(&mut CategoryState)) {
        let mut states = self.states.lock().await;
        update(states.entry(category_code.to_string()).or_default());
    }

    /// Search every known category concurrently. Unknown codes are skipped.
    pub async fn search_all(
        &self,
        category_codes: &[String],
    ) -> Result<Vec<CategoryReport>, IngestionError> {
        let known: Vec<&String> = category_codes
            .iter()
            .filter(|code| {
                let known = self.index.get(code).is_some();
                if !known {
                    error!(category = %code, "Unknown arXiv category code");
                }
                known
            })
            .collect();

        let results = join_all(known.into_iter().map(|code| self.search_category(code))).await;

        let mut reports = Vec::with_capacity(results.len());
        for result in results {
            reports.push(result?);
        }
        Ok(reports)
    }

    /// Page through one category until a stop signal fires
    #[instrument(skip(self), fields(category = %category_code))]
    pub async fn search_category(
        &self,
        category_code: &str,
    ) -> Result<CategoryReport, IngestionError> {
        let threshold = self.config.duplicate_threshold;
        let mut report = CategoryReport {
            category: category_code.to_string(),
            ..CategoryReport::default()
        };
        let mut start = self.config.search_start;

        loop {
            if let Some(reason) = self.state(category_code).await.stop_reason(threshold) {
                report.stop = Some(reason);
                break;
            }

            let url = query_url(&self.config, category_code, start);
            let offset = start;
            start += self.config.page_size;

            // Search pages change between runs, so the visited store is bypassed
            let document = match self
                .fetcher
                .refetch(&url)
                .await
                .and_then(|doc| doc.expect_kind(DocumentKind::Xml))
            {
                Ok(document) => document,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(offset, url = %url, error = %e, "Fetching page failed");
                    report.stop = Some(StopReason::PageFailed);
                    break;
                }
            };
            report.pages += 1;

            match self.process_page(category_code, &document.body, &mut report).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!(offset, url = %url, error = %e, "Unreadable feed page"),
            }
        }

        let state = self.state(category_code).await;
        match report.stop {
            Some(StopReason::EmptyPage) => {
                info!(pages = report.pages, "Last page had an empty feed, stopping search")
            }
            Some(StopReason::DuplicateThreshold) => info!(
                pages = report.pages,
                duplicates = state.duplicate_streak,
                "Duplicate threshold reached, stopping search"
            ),
            _ => warn!(pages = report.pages, "Search stopped on a failed page"),
        }
        Ok(report)
    }

    /// Parse one feed page, save its entries, and update the stop signals of
    /// the category named in the feed title
    pub async fn process_page(
        &self,
        requested_code: &str,
        xml: &str,
        report: &mut CategoryReport,
    ) -> Result<(), IngestionError> {
        let feed = parse_feed(xml, &self.index)?;

        let category = feed.category_code().unwrap_or(requested_code).to_string();
        let empty = feed.is_empty() || feed.only_remote_errors();
        metrics::record_page(&category, feed.entries.len(), empty);
        debug!(
            category = %category,
            entries = feed.entries.len(),
            total = ?feed.total_results,
            "Parsed feed page"
        );

        self.update_state(&category, |s| s.last_page_empty = empty)
            .await;

        let mut eprints = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            match entry {
                EntryOutcome::Parsed(eprint) => eprints.push(eprint),
                EntryOutcome::RemoteError { summary } => {
                    error!(category = %category, summary = %summary, "arXiv answered with an error entry");
                    report.skipped += 1;
                }
                EntryOutcome::Invalid(e) => {
                    error!(category = %category, error = %e, "Skipping invalid entry");
                    report.skipped += 1;
                }
            }
        }

        self.save_all(&category, eprints, report).await
    }

    async fn save_all(
        &self,
        category: &str,
        eprints: Vec<Box<Eprint>>,
        report: &mut CategoryReport,
    ) -> Result<(), IngestionError> {
        let repo = &self.repo;
        let mut saves = stream::iter(eprints)
            .map(|mut eprint| async move {
                let started = Instant::now();
                let result = repo.save_eprint(&mut eprint).await;
                (eprint.source_id, result, started.elapsed().as_secs_f64())
            })
            .buffered(self.config.save_concurrency.max(1));

        while let Some((source_id, result, secs)) = saves.next().await {
            match result {
                Ok(outcome) => {
                    if outcome.is_duplicate() {
                        warn!(category, source_id = %source_id, "Eprint already saved, skipping");
                        report.duplicates += 1;
                        metrics::record_eprint(category, EprintOutcome::Duplicate, secs);
                    } else {
                        debug!(category, source_id = %source_id, "Eprint saved");
                        report.saved += 1;
                        metrics::record_eprint(category, EprintOutcome::Saved, secs);
                    }
                    self.update_state(category, |s| s.record(outcome)).await;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    error!(
                        category,
                        source_id = %source_id,
                        code = e.code().as_code(),
                        error = %e,
                        "Saving eprint failed"
                    );
                    report.failed += 1;
                    metrics::record_eprint(category, EprintOutcome::Failed, secs);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_url() {
        let config = SearchConfig::default();
        assert_eq!(
            query_url(&config, "cs.AI", 2000),
            "http://export.arxiv.org/api/query?search_query=cat:cs.AI&start=2000&max_results=1000&sortBy=submittedDate&sortOrder=descending"
        );
    }

    #[test]
    fn test_stop_reasons() {
        let mut state = CategoryState::default();
        assert_eq!(state.stop_reason(3), None);

        state.record(SaveOutcome::Duplicate);
        state.record(SaveOutcome::Duplicate);
        assert_eq!(state.stop_reason(3), None);
        state.record(SaveOutcome::Saved);
        assert_eq!(state.duplicate_streak, 0);

        for _ in 0..3 {
            state.record(SaveOutcome::Duplicate);
        }
        assert_eq!(state.stop_reason(3), Some(StopReason::DuplicateThreshold));

        let empty = CategoryState {
            duplicate_streak: 0,
            last_page_empty: true,
        };
        assert_eq!(empty.stop_reason(3), Some(StopReason::EmptyPage));
    }
}
