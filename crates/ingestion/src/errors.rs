//! Ingestion service error types

use crate::fetch::DocumentKind;
use paperharvest_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Invalid URL `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Domain of {url} is not allowed")]
    DomainNotAllowed { url: String },

    #[error("Already visited: {url}")]
    AlreadyVisited { url: String },

    #[error("Expected {expected:?} document from {url}, got {found:?}")]
    UnexpectedDocument {
        url: String,
        expected: DocumentKind,
        found: DocumentKind,
    },

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error(transparent)]
    App(#[from] AppError),
}

impl IngestionError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            IngestionError::Timeout { .. } | IngestionError::Http { .. } => true,
            IngestionError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Aborts the whole run (corrupt taxonomy data, bad configuration)
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestionError::Taxonomy(_) | IngestionError::ConfigError(_) => true,
            IngestionError::App(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<quick_xml::Error> for IngestionError {
    fn from(e: quick_xml::Error) -> Self {
        IngestionError::Xml(e.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestionError {
    fn from(e: tokio::task::JoinError) -> Self {
        IngestionError::Task(e.to_string())
    }
}
