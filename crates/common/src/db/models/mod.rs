//! Entity models
//!
//! Plain structs mapped onto the bundled schema. Ids are `None` until the
//! upsert engine resolves them.

mod author;
mod eprint;
mod paper;
mod taxonomy;
mod website;

pub use author::{Author, Organisation};
pub use eprint::{CategoryIndex, CategoryRef, Eprint};
pub use paper::Paper;
pub use taxonomy::{Archive, Category, Group};
pub use website::Website;
