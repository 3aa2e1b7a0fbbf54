//! Error types for reference resolution.
//!
//! Per-reference failures ([`RefError`]) are recorded in the report and never
//! abort a run. Only [`ResolveError`] ends a resolution call.

use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::types::Resolution;

/// Failure attached to a single reference's report entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    #[error("invalid reference \"{uri}\": {message}")]
    InvalidReference { uri: String, message: String },

    #[error("JSON pointer {pointer} not found (resolved up to {found})")]
    PointerNotFound { pointer: String, found: String },

    #[error("invalid token \"{token}\" in JSON pointer {pointer}: expected an array index")]
    InvalidPointerToken { pointer: String, token: String },

    #[error("failed to load {url}: {message}")]
    RemoteLoadFailure { url: String, message: String },

    #[error("relative reference \"{uri}\" cannot be resolved without a base location")]
    MissingBase { uri: String },
}

impl Serialize for RefError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<LoadError> for RefError {
    fn from(err: LoadError) -> Self {
        RefError::RemoteLoadFailure {
            url: err.url().to_string(),
            message: err.reason(),
        }
    }
}

/// Failure loading a document. Cloned to every reference waiting on the URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("cannot read {url}: {message}")]
    Io { url: String, message: String },

    #[error("failed to fetch {url}: {message}")]
    Network { url: String, message: String },

    #[error("failed to fetch {url}: HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("cannot parse {url}: {message}")]
    Parse { url: String, message: String },

    #[error("unsupported scheme \"{scheme}\" in {url}")]
    UnsupportedScheme { url: String, scheme: String },
}

impl LoadError {
    /// The URL the failed load was for.
    pub fn url(&self) -> &str {
        match self {
            LoadError::Io { url, .. }
            | LoadError::Network { url, .. }
            | LoadError::Status { url, .. }
            | LoadError::Parse { url, .. }
            | LoadError::UnsupportedScheme { url, .. } => url,
        }
    }

    /// The failure without the URL prefix.
    pub fn reason(&self) -> String {
        match self {
            LoadError::Io { message, .. }
            | LoadError::Network { message, .. }
            | LoadError::Parse { message, .. } => message.clone(),
            LoadError::Status { status, .. } => format!("HTTP status {}", status),
            LoadError::UnsupportedScheme { scheme, .. } => {
                format!("unsupported scheme \"{}\"", scheme)
            }
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::Parse { .. } => 2,
            _ => 3,
        }
    }
}

/// Errors that fail a whole resolution call.
#[derive(Debug, Error)]
pub enum ResolveError {
    // Parse errors (exit code 2)
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    // IO errors (exit code 3)
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("resolution timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Reference errors (exit code 1); the full report is still available
    #[error("{} reference(s) failed to resolve: {}", failed.len(), failed.join(", "))]
    ReferencesFailed {
        failed: Vec<String>,
        resolution: Box<Resolution>,
    },
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::ReferencesFailed { .. } => 1,
            ResolveError::InvalidDocument { .. } => 2,
            ResolveError::Load(e) => e.exit_code(),
            ResolveError::Timeout { .. } => 3,
        }
    }

    /// The report of a run that completed its walk before failing.
    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            ResolveError::ReferencesFailed { resolution, .. } => Some(resolution.as_ref()),
            _ => None,
        }
    }
}
