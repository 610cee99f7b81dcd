//! Application-wide error types.
//!
//! Library modules return [`Error`] through the [`Result`] alias, while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! # Taxonomy
//!
//! - [`Error::NotFound`] / [`Error::AlreadyExists`]: identifier or file lookups
//! - [`Error::Corrupted`]: the catalog document could not be parsed
//! - [`Error::Network`] / [`Error::Unreachable`]: remote collaborators
//! - [`Error::Io`]: disk writes, renames and external processes
//! - [`Error::Validation`]: missing fields, unsupported codecs or containers
//! - [`Error::Job`]: any of the above, scoped to one catalog item
//!
//! # Example
//!
//! ```ignore
//! use syncy::error::{Error, Result, ResultExt};
//!
//! fn open(root: &Path) -> Result<CatalogStore> {
//!     let store = CatalogStore::open(root).with_context("opening catalog")?;
//!     Ok(store)
//! }
//! ```

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error outside of catalog loading
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collection, item, path or file absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate identifier or existing output
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Catalog document could not be parsed
    #[error("Catalog {path} is corrupted: {message}")]
    Corrupted { path: PathBuf, message: String },

    /// Transport failure talking to a remote service
    #[error("Network error: {0}")]
    Network(String),

    /// Remote collection exists but cannot be read (private, unlisted)
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// Missing required fields, unsupported codec or container
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking or spawned task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    /// Failure of one job, scoped to a single item
    #[error("Job {key} failed: {source}")]
    Job {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a not found error for a filesystem path.
    pub fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into().display().to_string())
    }

    /// Create an already exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a corrupted catalog error.
    pub fn corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Scope an error to one job.
    pub fn job(key: impl Into<String>, source: Error) -> Self {
        Self::Job {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context and job wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } | Self::Job { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}
