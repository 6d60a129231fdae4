//! Error types for PaperHarvest
//!
//! Provides:
//! - Distinct error types for different failure modes
//! - Wrapping that keeps the entity type, operation and eprint id visible
//! - Error codes for log filtering
//! - Fatal vs. recoverable classification

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Data integrity (1xxx)
    InvalidTaxonomy,
    UnresolvedReference,
    ConstraintViolation,
    InvalidEntity,

    // Persistence (2xxx)
    DatabaseError,
    ConnectionError,
    PersistenceError,
    EprintSaveError,

    // External (3xxx)
    CacheError,

    // Internal (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidTaxonomy => 1001,
            ErrorCode::UnresolvedReference => 1002,
            ErrorCode::ConstraintViolation => 1003,
            ErrorCode::InvalidEntity => 1004,

            ErrorCode::DatabaseError => 2001,
            ErrorCode::ConnectionError => 2002,
            ErrorCode::PersistenceError => 2003,
            ErrorCode::EprintSaveError => 2004,

            ErrorCode::CacheError => 3001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Sub-step of the composite eprint save that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStep {
    Begin,
    DuplicateCheck,
    Organisations,
    Authors,
    AuthorOrganisationLinks,
    Paper,
    PaperAuthorLinks,
    Eprint,
    EprintCategoryLinks,
    Commit,
    Rollback,
}

impl fmt::Display for SaveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStep::Begin => "begin transaction",
            SaveStep::DuplicateCheck => "duplicate check",
            SaveStep::Organisations => "saving organisations",
            SaveStep::Authors => "saving authors",
            SaveStep::AuthorOrganisationLinks => "saving authors_organisations links",
            SaveStep::Paper => "saving paper",
            SaveStep::PaperAuthorLinks => "saving papers_authors links",
            SaveStep::Eprint => "saving eprint",
            SaveStep::EprintCategoryLinks => "saving eprints_categories links",
            SaveStep::Commit => "commit",
            SaveStep::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Data integrity errors
    #[error("Invalid taxonomy: {message}")]
    InvalidTaxonomy { message: String },

    #[error("Unresolved {entity} reference for natural key `{key}`")]
    UnresolvedReference { entity: &'static str, key: String },

    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    #[error("Invalid {entity}: {message}")]
    InvalidEntity { entity: &'static str, message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("{operation} {entity} failed: {source}")]
    Persistence {
        entity: &'static str,
        operation: &'static str,
        #[source]
        source: Box<AppError>,
    },

    #[error("Eprint {source_id}: {step} failed: {source}")]
    EprintSave {
        source_id: String,
        step: SaveStep,
        #[source]
        source: Box<AppError>,
    },

    // External service errors
    #[error("Cache error: {message}")]
    CacheError { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Wrap an error with the entity type and operation it happened in
    pub fn persistence(entity: &'static str, operation: &'static str, source: AppError) -> Self {
        AppError::Persistence {
            entity,
            operation,
            source: Box::new(source),
        }
    }

    /// Wrap an error with the eprint natural id and the sub-step that failed
    pub fn eprint(source_id: impl Into<String>, step: SaveStep, source: AppError) -> Self {
        AppError::EprintSave {
            source_id: source_id.into(),
            step,
            source: Box::new(source),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidTaxonomy { .. } => ErrorCode::InvalidTaxonomy,
            AppError::UnresolvedReference { .. } => ErrorCode::UnresolvedReference,
            AppError::ConstraintViolation { .. } => ErrorCode::ConstraintViolation,
            AppError::InvalidEntity { .. } => ErrorCode::InvalidEntity,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Persistence { .. } => ErrorCode::PersistenceError,
            AppError::EprintSave { .. } => ErrorCode::EprintSaveError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Data-integrity and configuration errors abort the whole run.
    ///
    /// Wrapped errors inherit the classification of their source.
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::InvalidTaxonomy { .. } | AppError::Configuration { .. } => true,
            AppError::Persistence { source, .. } | AppError::EprintSave { source, .. } => {
                source.is_fatal()
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::UnresolvedReference {
            entity: "archive",
            key: "cs".into(),
        };
        assert_eq!(err.code(), ErrorCode::UnresolvedReference);
        assert_eq!(err.code().as_code(), 1002);
    }

    #[test]
    fn test_wrapped_message_names_entity_and_step() {
        let inner = AppError::persistence(
            "author",
            "inserting",
            AppError::Internal {
                message: "boom".into(),
            },
        );
        let err = AppError::eprint("2101.00001v1", SaveStep::Authors, inner);

        let message = err.to_string();
        assert!(message.contains("2101.00001v1"));
        assert!(message.contains("saving authors"));
        assert!(message.contains("inserting author"));
        assert_eq!(err.code(), ErrorCode::EprintSaveError);
    }

    #[test]
    fn test_fatal_classification_follows_source() {
        let taxonomy = AppError::InvalidTaxonomy {
            message: "archive without categories".into(),
        };
        assert!(taxonomy.is_fatal());

        let wrapped = AppError::persistence("archive", "defaulting", taxonomy);
        assert!(wrapped.is_fatal());
        match &wrapped {
            AppError::Persistence { source, .. } => {
                assert!(matches!(**source, AppError::InvalidTaxonomy { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let transient = AppError::Internal {
            message: "timeout".into(),
        };
        assert!(!transient.is_fatal());
    }
}
