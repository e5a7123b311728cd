//! # Keyward HSM
//!
//! Token session management and envelope encryption for Keyward.
//!
//! This crate provides:
//! - [`Module`]: load, initialize and finalize a token driver
//! - [`Session`]: open a session on a labelled slot, log in, close
//! - Key resolution by label, generating an AES-256 key when absent
//! - AES-GCM envelope encryption with a random 16-byte nonce
//!
//! # Example
//!
//! ```no_run
//! use keyward_hsm::{decrypt, encrypt, resolve_or_generate_key, AssociatedData, Module, Session};
//! use keyward_token::SoftTokenLoader;
//!
//! # fn main() -> Result<(), keyward_hsm::HsmError> {
//! let module = Module::load(&SoftTokenLoader, "token.json")?;
//! let mut session = Session::open(module.token(), "FKH")?;
//! session.login("1234")?;
//!
//! let (key, _) = resolve_or_generate_key(&session, "keyward-envelope-key")?;
//! let envelope = encrypt(&session, key, AssociatedData::DEFAULT, b"secret")?;
//! let plaintext = decrypt(&session, key, AssociatedData::DEFAULT, envelope.as_bytes())?;
//! assert_eq!(&*plaintext, b"secret");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod keys;
pub mod module;
pub mod session;

#[cfg(test)]
mod test_support;

pub use envelope::{
    decrypt, encrypt, AssociatedData, Envelope, EnvelopeCipher, MIN_ENVELOPE_SIZE, NONCE_SIZE,
};
pub use error::HsmError;
pub use keys::{
    generate_key, key_template, resolve_key, resolve_or_generate_key, KeyHandle, KeyOrigin,
};
pub use module::Module;
pub use session::{find_slot, Session, SessionState};
