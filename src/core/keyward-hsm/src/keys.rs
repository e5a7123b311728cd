//! Key resolution: find a key by label, or generate it.

use std::fmt;

use keyward_token::{
    Attribute, KeyType, Mechanism, ObjectClass, ObjectHandle, Rv, AES_256_KEY_SIZE,
};
use tracing::{debug, error, info, warn};

use crate::error::HsmError;
use crate::session::Session;

/// A secret key resident in the token.
///
/// The token owns the key; the handle only refers to it within the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle(ObjectHandle);

impl KeyHandle {
    /// Returns the underlying object handle.
    pub fn object(self) -> ObjectHandle {
        self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How [`resolve_or_generate_key`] obtained its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// An existing key carried the label.
    Found,
    /// No key carried the label; one was generated.
    Generated,
}

/// Template of the keys created by [`generate_key`]: a persistent, private,
/// non-modifiable AES-256 key usable for encryption and decryption.
pub fn key_template(label: &str) -> Vec<Attribute> {
    vec![
        Attribute::Class(ObjectClass::SecretKey),
        Attribute::KeyType(KeyType::Aes),
        Attribute::Token(true),
        Attribute::Private(true),
        Attribute::Modifiable(false),
        Attribute::Encrypt(true),
        Attribute::Decrypt(true),
        Attribute::ValueLen(AES_256_KEY_SIZE as u64),
        Attribute::Label(label.as_bytes().to_vec()),
        Attribute::Id(label.as_bytes().to_vec()),
    ]
}

/// Returns the first key whose label equals `label`.
///
/// No match and a failing search both yield [`HsmError::KeyNotFound`].
pub fn resolve_key(session: &Session<'_>, label: &str) -> Result<KeyHandle, HsmError> {
    let handle = session.active_handle()?;
    let token = session.token();
    let not_found = |rv: Option<Rv>| HsmError::KeyNotFound {
        label: label.to_string(),
        rv,
    };

    let template = [Attribute::Label(label.as_bytes().to_vec())];
    token.find_objects_init(handle, &template).map_err(|rv| {
        error!(label, %rv, "Error in find_objects_init");
        not_found(Some(rv))
    })?;

    let found = token.find_objects(handle, 1);
    let finished = token.find_objects_final(handle);

    let objects = found.map_err(|rv| {
        error!(label, %rv, "Unable to find the key: find_objects failed");
        not_found(Some(rv))
    })?;
    if let Err(rv) = finished {
        error!(label, %rv, "Error in find_objects_final");
        return Err(not_found(Some(rv)));
    }

    let Some(object) = objects.into_iter().next() else {
        warn!(label, "Unable to find the key: no object carries this label");
        return Err(not_found(None));
    };

    debug!(label, key = %object, "Key found");
    Ok(KeyHandle(object))
}

/// Generates a token-resident AES-256 key labelled `label`.
///
/// Does not check whether a key with this label already exists.
pub fn generate_key(session: &Session<'_>, label: &str) -> Result<KeyHandle, HsmError> {
    let handle = session.active_handle()?;

    let object = session
        .token()
        .generate_key(handle, &Mechanism::AesKeyGen, &key_template(label))
        .map_err(|rv| {
            error!(label, %rv, "Key generation failed");
            HsmError::KeyGenerationFailed {
                label: label.to_string(),
                rv,
            }
        })?;

    info!(label, key = %object, "Key generated");
    Ok(KeyHandle(object))
}

/// Resolves `label`, generating the key only when none is found.
pub fn resolve_or_generate_key(
    session: &Session<'_>,
    label: &str,
) -> Result<(KeyHandle, KeyOrigin), HsmError> {
    match resolve_key(session, label) {
        Ok(key) => Ok((key, KeyOrigin::Found)),
        Err(HsmError::KeyNotFound { .. }) => {
            generate_key(session, label).map(|key| (key, KeyOrigin::Generated))
        },
        Err(e) => Err(e),
    }
}
