//! PaperHarvest harvester
//!
//! Runs one harvest task per configured website:
//! 1. Loads configuration and connects to the database
//! 2. Resolves the site list (configuration or `websites` table)
//! 3. Runs every site concurrently
//!
//! A fatal error in any site aborts the others and exits with a non-zero status.

use anyhow::Context;
use paperharvest_common::{
    cache::create_visited_store,
    config::{AppConfig, SiteSource},
    db::{models::Website, DbPool, PgStore, Repository},
    metrics, observability, VERSION,
};
use paperharvest_ingestion::{harvest_sites, HttpFetcher, SiteHarvester};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate_all()?;

    observability::init_tracing(&config.observability)?;
    info!("Starting PaperHarvest harvester v{}", VERSION);

    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.apply_schema {
        db.apply_schema().await?;
    }
    let repo = Repository::new(Arc::new(PgStore::new(db)));

    let sites = resolve_sites(&config, &repo).await?;
    if sites.is_empty() {
        anyhow::bail!("no website to harvest");
    }

    let visited = create_visited_store(&config.visited).await?;

    let mut harvesters = Vec::with_capacity(sites.len());
    for site in sites {
        let fetcher =
            HttpFetcher::new(&config.fetch, site.allowed_domains.clone(), visited.clone())?;
        harvesters.push(SiteHarvester::new(
            site,
            repo.clone(),
            Arc::new(fetcher),
            config.search.clone(),
        ));
    }

    let span = info_span!(
        "harvest",
        service = %config.observability.service_name,
        run_id = %Uuid::new_v4()
    );
    harvest_sites(harvesters)
        .instrument(span)
        .await
        .context("harvest aborted")?;

    info!("Harvest complete");
    Ok(())
}

/// Sites from configuration (recorded in the `websites` table) or from the table itself
async fn resolve_sites(config: &AppConfig, repo: &Repository) -> anyhow::Result<Vec<Website>> {
    match config.site_source {
        SiteSource::Config => {
            let sites: Vec<Website> = config
                .sites
                .iter()
                .map(|s| Website {
                    id: None,
                    name: s.name.clone(),
                    categories: s.categories.clone(),
                    allowed_domains: s.allowed_domains.clone(),
                    init_urls: s.init_urls.clone(),
                })
                .collect();
            repo.save_websites(&sites).await?;
            Ok(sites)
        }
        SiteSource::Database => Ok(repo
            .load_websites()
            .await
            .context("fetching the website list")?),
    }
}
