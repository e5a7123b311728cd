//! HSM error types.

use std::path::PathBuf;

use keyward_token::{LoadError, Rv};
use thiserror::Error;

/// Errors that can occur while driving a token.
///
/// Every variant raised by a token call carries the status it returned.
#[derive(Debug, Error)]
pub enum HsmError {
    /// The driver could not be loaded.
    #[error("failed to load token module {}", .path.display())]
    LoaderFailed {
        /// Module path.
        path: PathBuf,
        /// Loader failure.
        #[source]
        source: LoadError,
    },

    /// The driver loaded but failed to initialize.
    #[error("token initialization failed: {0}")]
    TokenInitFailed(Rv),

    /// The driver refused to finalize.
    #[error("token finalization failed: {0}")]
    FinalizeFailed(Rv),

    /// Slot or token metadata could not be read.
    #[error("slot enumeration failed in {operation}: {rv}")]
    EnumerationFailed {
        /// Failing call.
        operation: &'static str,
        /// Returned status.
        rv: Rv,
    },

    /// No slot carries the requested label.
    #[error("no slot found for label: {0}")]
    NoMatchingSlot(String),

    /// Opening a session failed.
    #[error("failed to open session on slot {slot}: {rv}")]
    SessionOpenFailed {
        /// Slot label.
        slot: String,
        /// Returned status.
        rv: Rv,
    },

    /// The token rejected the close.
    #[error("failed to close session: {0}")]
    SessionCloseFailed(Rv),

    /// The token rejected the credential.
    #[error("login failed: {0}")]
    LoginFailed(Rv),

    /// The session was already closed.
    #[error("session is closed")]
    SessionClosed,

    /// No key carries the requested label, or the search failed.
    #[error("key not found: {label}{}", .rv.map(|rv| format!(" ({rv})")).unwrap_or_default())]
    KeyNotFound {
        /// Key label.
        label: String,
        /// Status of the failing search call, if any.
        rv: Option<Rv>,
    },

    /// Key generation failed.
    #[error("key generation failed for {label}: {rv}")]
    KeyGenerationFailed {
        /// Key label.
        label: String,
        /// Returned status.
        rv: Rv,
    },

    /// Encryption failed.
    #[error("encryption failed in {operation}: {rv}")]
    EncryptionFailed {
        /// Failing call.
        operation: &'static str,
        /// Returned status.
        rv: Rv,
    },

    /// Decryption failed: tampered data, wrong key or corrupt envelope.
    #[error("decryption failed in {operation}: {rv}")]
    DecryptionFailed {
        /// Failing call.
        operation: &'static str,
        /// Returned status.
        rv: Rv,
    },

    /// The envelope cannot hold a nonce and a tag.
    #[error("envelope too short: {len} bytes, expected at least {min}")]
    EnvelopeTooShort {
        /// Actual length.
        len: usize,
        /// Minimum length.
        min: usize,
    },
}
