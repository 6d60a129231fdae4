//! PaperHarvest Ingestion
//!
//! arXiv harvesting pipeline:
//! 1. Loads the category taxonomy and publishes the category index
//! 2. Pages through the search API per category
//! 3. Parses every feed entry into an eprint graph
//! 4. Saves each graph atomically and stops a category on an empty page or a
//!    streak of duplicates

pub mod driver;
pub mod errors;
pub mod feed;
pub mod fetch;
pub mod site;
pub mod taxonomy;

pub use driver::{query_url, CategoryReport, CategoryState, SearchSession, StopReason};
pub use errors::IngestionError;
pub use feed::{parse_feed, parse_feed_title, EntryOutcome, FeedQuery, ParsedFeed};
pub use fetch::{Document, DocumentKind, Fetcher, HttpFetcher};
pub use site::{harvest_sites, SiteHarvester, SiteReport, ARXIV_SITE};
pub use taxonomy::{load_taxonomy, parse_taxonomy};
