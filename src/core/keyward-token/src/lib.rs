//! # Keyward Token
//!
//! The token interface consumed by Keyward.
//!
//! This crate provides:
//! - Status codes ([`Rv`]) and handle newtypes
//! - Object attributes and mechanisms
//! - The [`TokenInterface`] and [`Loader`] capabilities
//! - [`SoftToken`], an in-process software token, and its profile loader
//! - [`FaultyToken`], a fault-injecting wrapper for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fault;
pub mod interface;
pub mod profile;
pub mod rv;
pub mod soft;
pub mod types;

pub use error::{LoadError, ProfileError};
pub use fault::{Call, FaultyToken};
pub use interface::{Loader, TokenInterface, TokenResult};
pub use profile::SoftTokenLoader;
pub use rv::Rv;
pub use soft::{SlotConfig, SoftToken, AES_256_KEY_SIZE, GCM_TAG_SIZE};
pub use types::{
    Attribute, GcmParams, KeyType, Mechanism, ObjectClass, ObjectHandle, SessionFlags,
    SessionHandle, SlotId, TokenInfo, UserType, LABEL_WIDTH,
};
