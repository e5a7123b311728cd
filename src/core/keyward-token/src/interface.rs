//! The token interface and loader capabilities.

use std::path::Path;
use std::sync::Arc;

use crate::error::LoadError;
use crate::rv::Rv;
use crate::types::{
    Attribute, Mechanism, ObjectHandle, SessionFlags, SessionHandle, SlotId, TokenInfo, UserType,
};

/// Result of a token call: a value on `Rv::OK`, the raw status otherwise.
pub type TokenResult<T> = Result<T, Rv>;

/// Function table of a loaded token driver.
///
/// Every call blocks until the device answers. Implementations decide
/// whether concurrent calls from several threads are safe.
pub trait TokenInterface {
    /// Initializes the driver.
    fn initialize(&self) -> TokenResult<()>;

    /// Releases the driver.
    fn finalize(&self) -> TokenResult<()>;

    /// Lists slots, optionally only those with a token present.
    fn slot_list(&self, token_present: bool) -> TokenResult<Vec<SlotId>>;

    /// Reads the metadata of the token in `slot`.
    fn token_info(&self, slot: SlotId) -> TokenResult<TokenInfo>;

    /// Opens a session on `slot`.
    fn open_session(&self, slot: SlotId, flags: SessionFlags) -> TokenResult<SessionHandle>;

    /// Closes `session`.
    fn close_session(&self, session: SessionHandle) -> TokenResult<()>;

    /// Authenticates the slot behind `session`.
    fn login(&self, session: SessionHandle, user: UserType, pin: &[u8]) -> TokenResult<()>;

    /// Drops the authentication of the slot behind `session`.
    fn logout(&self, session: SessionHandle) -> TokenResult<()>;

    /// Starts an object search matching every attribute of `template`.
    fn find_objects_init(&self, session: SessionHandle, template: &[Attribute])
        -> TokenResult<()>;

    /// Returns up to `max_count` further matches of the active search.
    fn find_objects(&self, session: SessionHandle, max_count: usize)
        -> TokenResult<Vec<ObjectHandle>>;

    /// Ends the active search.
    fn find_objects_final(&self, session: SessionHandle) -> TokenResult<()>;

    /// Generates a secret key object.
    fn generate_key(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> TokenResult<ObjectHandle>;

    /// Starts an encryption operation.
    fn encrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()>;

    /// Encrypts `data` in a single part.
    ///
    /// With `output` set to `None` the required length is returned and the
    /// operation stays active. With a buffer, the written length is returned
    /// and the operation ends.
    fn encrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize>;

    /// Starts a decryption operation.
    fn decrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()>;

    /// Decrypts `data` in a single part, with the same sizing rules as
    /// [`TokenInterface::encrypt`].
    fn decrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize>;
}

/// A shared token, so callers can keep observing a token handed to a module.
impl<T: TokenInterface + ?Sized> TokenInterface for Arc<T> {
    fn initialize(&self) -> TokenResult<()> {
        (**self).initialize()
    }

    fn finalize(&self) -> TokenResult<()> {
        (**self).finalize()
    }

    fn slot_list(&self, token_present: bool) -> TokenResult<Vec<SlotId>> {
        (**self).slot_list(token_present)
    }

    fn token_info(&self, slot: SlotId) -> TokenResult<TokenInfo> {
        (**self).token_info(slot)
    }

    fn open_session(&self, slot: SlotId, flags: SessionFlags) -> TokenResult<SessionHandle> {
        (**self).open_session(slot, flags)
    }

    fn close_session(&self, session: SessionHandle) -> TokenResult<()> {
        (**self).close_session(session)
    }

    fn login(&self, session: SessionHandle, user: UserType, pin: &[u8]) -> TokenResult<()> {
        (**self).login(session, user, pin)
    }

    fn logout(&self, session: SessionHandle) -> TokenResult<()> {
        (**self).logout(session)
    }

    fn find_objects_init(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> TokenResult<()> {
        (**self).find_objects_init(session, template)
    }

    fn find_objects(
        &self,
        session: SessionHandle,
        max_count: usize,
    ) -> TokenResult<Vec<ObjectHandle>> {
        (**self).find_objects(session, max_count)
    }

    fn find_objects_final(&self, session: SessionHandle) -> TokenResult<()> {
        (**self).find_objects_final(session)
    }

    fn generate_key(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> TokenResult<ObjectHandle> {
        (**self).generate_key(session, mechanism, template)
    }

    fn encrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()> {
        (**self).encrypt_init(session, mechanism, key)
    }

    fn encrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize> {
        (**self).encrypt(session, data, output)
    }

    fn decrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()> {
        (**self).decrypt_init(session, mechanism, key)
    }

    fn decrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize> {
        (**self).decrypt(session, data, output)
    }
}

/// Yields a token interface from a filesystem path.
pub trait Loader {
    /// Loads the driver found at `path`.
    fn load(&self, path: &Path) -> Result<Box<dyn TokenInterface>, LoadError>;
}
