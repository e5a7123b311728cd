//! Loader error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a token driver.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Nothing exists at the given path.
    #[error("token module not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The module exists but does not expose a usable interface.
    #[error("invalid token module {}: {source}", .path.display())]
    InvalidModule {
        /// Module path.
        path: PathBuf,
        /// What is wrong with it.
        #[source]
        source: ProfileError,
    },

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in a software token profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The document is not a valid profile.
    #[error("malformed profile: {0}")]
    Json(#[from] serde_json::Error),

    /// A slot label does not fit the token label field.
    #[error("slot label {label:?} exceeds {max} bytes")]
    LabelTooLong {
        /// The offending label.
        label: String,
        /// Width of the label field.
        max: usize,
    },
}
