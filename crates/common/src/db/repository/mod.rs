//! Repository pattern for database operations
//!
//! `Repository` is the entry point used by the harvester. The submodules hold
//! the per-entity save functions it is built from.

mod eprint;
pub mod links;
pub mod taxonomy;
mod website;

pub use eprint::{save_eprint, SaveOutcome};
pub use taxonomy::{apply_archive_defaults, save_archives, save_categories, save_groups, save_taxonomy};
pub use website::{load_websites, save_websites};

use crate::db::models::{CategoryIndex, Eprint, Group, Website};
use crate::db::store::Store;
use crate::errors::Result;
use std::sync::Arc;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    /// Create a new repository over the given store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    // ========================================================================
    // Taxonomy
    // ========================================================================

    /// Persist the taxonomy and return the category index built from it
    pub async fn save_taxonomy(&self, groups: &mut [Group]) -> Result<CategoryIndex> {
        save_taxonomy(self.store.as_executor(), groups).await
    }

    // ========================================================================
    // Eprints
    // ========================================================================

    /// Save an eprint graph atomically
    pub async fn save_eprint(&self, eprint: &mut Eprint) -> Result<SaveOutcome> {
        save_eprint(self.store.as_ref(), eprint).await
    }

    // ========================================================================
    // Websites
    // ========================================================================

    pub async fn load_websites(&self) -> Result<Vec<Website>> {
        load_websites(self.store.as_executor()).await
    }

    pub async fn save_websites(&self, websites: &[Website]) -> Result<()> {
        save_websites(self.store.as_executor(), websites).await
    }
}
