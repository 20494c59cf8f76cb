// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Verdant

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Verdant operations
pub type Result<T> = std::result::Result<T, VerdantError>;

/// Verdant error types
#[derive(Error, Debug)]
pub enum VerdantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Classifier not available: {0}")]
    ClassifierUnavailable(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerdantError {
    /// Whether this error must stop a batch run instead of only the current item
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, VerdantError::Classification(e) if e.is_fatal_to_run())
    }
}

/// Failures turning a capture device or file into an encoded image.
///
/// Always fatal to the current item only; never retried.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device unavailable")]
    DeviceUnavailable,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("cannot read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Failures of the classification client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    /// No reference profiles were supplied; raised before any external call.
    #[error("reference database is empty")]
    EmptyDatabase,

    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ClassificationError {
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, ClassificationError::EmptyDatabase)
    }
}

impl From<reqwest::Error> for ClassificationError {
    fn from(e: reqwest::Error) -> Self {
        ClassificationError::Transport(e.to_string())
    }
}

/// Reasons a location lookup produced nothing. Absorbed by the resolver.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("location lookup failed: {0}")]
    Transport(#[from] reqwest::Error),
}
