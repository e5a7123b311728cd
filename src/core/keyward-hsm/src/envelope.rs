//! AES-GCM envelopes sealed inside the token.
//!
//! Format: `nonce (16 bytes) || ciphertext || tag (16 bytes)`, no length prefix.
//!
//! The nonce comes from the operating system's CSPRNG, never from the token.
//! The associated data is bound to every operation but not transmitted.

use std::fmt;

use keyward_token::{GcmParams, Mechanism, Rv, GCM_TAG_SIZE};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::error::HsmError;
use crate::keys::KeyHandle;
use crate::session::Session;

/// Size of the envelope nonce in bytes.
pub const NONCE_SIZE: usize = 16;

/// Smallest valid envelope: a nonce and the tag of an empty plaintext.
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + GCM_TAG_SIZE;

/// Context bytes bound into every encryption and decryption.
///
/// Not secret. Decrypting with different associated data fails authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedData<'a>(&'a [u8]);

impl AssociatedData<'static> {
    /// The fixed associated data used by Keyward envelopes.
    pub const DEFAULT: AssociatedData<'static> = AssociatedData(b"keyward-envelope-v01");
}

impl<'a> AssociatedData<'a> {
    /// Wraps arbitrary associated data.
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

impl Default for AssociatedData<'static> {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// An authenticated ciphertext with its nonce prepended.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope(Vec<u8>);

impl Envelope {
    /// Returns the nonce prefix.
    pub fn nonce(&self) -> &[u8] {
        &self.0[..NONCE_SIZE]
    }

    /// Returns the ciphertext followed by the tag.
    pub fn ciphertext_and_tag(&self) -> &[u8] {
        &self.0[NONCE_SIZE..]
    }

    /// Returns the whole envelope.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the envelope into its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the envelope length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: an envelope holds at least a nonce and a tag.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<u8>> for Envelope {
    type Error = HsmError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        check_length(&bytes)?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for Envelope {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope").field("len", &self.0.len()).finish()
    }
}

fn check_length(bytes: &[u8]) -> Result<(), HsmError> {
    if bytes.len() < MIN_ENVELOPE_SIZE {
        return Err(HsmError::EnvelopeTooShort {
            len: bytes.len(),
            min: MIN_ENVELOPE_SIZE,
        });
    }
    Ok(())
}

/// Generates a fresh random nonce.
fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn gcm<'a>(nonce: &'a [u8], aad: AssociatedData<'a>) -> Mechanism<'a> {
    Mechanism::AesGcm(GcmParams {
        iv: nonce,
        aad: aad.as_bytes(),
        tag_bits: (GCM_TAG_SIZE * 8) as u64,
    })
}

fn encryption_failed(operation: &'static str) -> impl Fn(Rv) -> HsmError {
    move |rv| {
        error!(operation, %rv, "Encryption failed");
        HsmError::EncryptionFailed { operation, rv }
    }
}

fn decryption_failed(operation: &'static str) -> impl Fn(Rv) -> HsmError {
    move |rv| {
        error!(operation, %rv, "Decryption failed");
        HsmError::DecryptionFailed { operation, rv }
    }
}

/// Encrypts `plaintext` under `key` into a new envelope.
///
/// The output is sized in two passes; the length reported by the token on
/// the second pass is authoritative.
pub fn encrypt(
    session: &Session<'_>,
    key: KeyHandle,
    aad: AssociatedData<'_>,
    plaintext: &[u8],
) -> Result<Envelope, HsmError> {
    let handle = session.active_handle()?;
    let token = session.token();

    let nonce = generate_nonce();
    token
        .encrypt_init(handle, &gcm(&nonce, aad), key.object())
        .map_err(encryption_failed("encrypt_init"))?;

    let required = token
        .encrypt(handle, plaintext, None)
        .map_err(encryption_failed("encrypt"))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + required);
    envelope.extend_from_slice(&nonce);
    envelope.resize(NONCE_SIZE + required, 0);

    let written = token
        .encrypt(handle, plaintext, Some(&mut envelope[NONCE_SIZE..]))
        .map_err(encryption_failed("encrypt"))?;
    if written < GCM_TAG_SIZE || written > required {
        error!(written, required, "Token reported an impossible ciphertext length");
        return Err(HsmError::EncryptionFailed {
            operation: "encrypt:length",
            rv: Rv::FUNCTION_FAILED,
        });
    }
    envelope.truncate(NONCE_SIZE + written);

    debug!(
        key = %key,
        plaintext_len = plaintext.len(),
        envelope_len = envelope.len(),
        "Envelope sealed"
    );
    Ok(Envelope(envelope))
}

/// Decrypts an envelope produced by [`encrypt`].
///
/// Tampering, a wrong key and a corrupt envelope all yield
/// [`HsmError::DecryptionFailed`].
pub fn decrypt(
    session: &Session<'_>,
    key: KeyHandle,
    aad: AssociatedData<'_>,
    envelope: &[u8],
) -> Result<Zeroizing<Vec<u8>>, HsmError> {
    check_length(envelope)?;
    let handle = session.active_handle()?;
    let token = session.token();

    let (nonce, sealed) = envelope.split_at(NONCE_SIZE);
    token
        .decrypt_init(handle, &gcm(nonce, aad), key.object())
        .map_err(decryption_failed("decrypt_init"))?;

    let required = token
        .decrypt(handle, sealed, None)
        .map_err(decryption_failed("decrypt"))?;

    let mut plaintext = Zeroizing::new(vec![0u8; required]);
    let written = token
        .decrypt(handle, sealed, Some(&mut plaintext[..]))
        .map_err(decryption_failed("decrypt"))?;
    if written > required {
        error!(written, required, "Token reported an impossible plaintext length");
        return Err(HsmError::DecryptionFailed {
            operation: "decrypt:length",
            rv: Rv::FUNCTION_FAILED,
        });
    }
    plaintext.truncate(written);

    debug!(key = %key, envelope_len = envelope.len(), "Envelope opened");
    Ok(plaintext)
}

/// A key and associated data bound to a session.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCipher<'s, 't> {
    session: &'s Session<'t>,
    key: KeyHandle,
    aad: AssociatedData<'s>,
}

impl<'s, 't> EnvelopeCipher<'s, 't> {
    /// Binds `key` and `aad` to `session`.
    pub fn new(session: &'s Session<'t>, key: KeyHandle, aad: AssociatedData<'s>) -> Self {
        Self { session, key, aad }
    }

    /// See [`encrypt`].
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope, HsmError> {
        encrypt(self.session, self.key, self.aad, plaintext)
    }

    /// See [`decrypt`].
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Zeroizing<Vec<u8>>, HsmError> {
        decrypt(self.session, self.key, self.aad, envelope)
    }
}
