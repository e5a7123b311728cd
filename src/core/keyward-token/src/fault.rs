//! Fault injection around a [`TokenInterface`].
//!
//! [`FaultyToken`] forwards every call to an inner token, records it, and
//! returns an injected status instead for the calls it was told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::interface::{TokenInterface, TokenResult};
use crate::rv::Rv;
use crate::types::{
    Attribute, Mechanism, ObjectHandle, SessionFlags, SessionHandle, SlotId, TokenInfo, UserType,
};

/// A token call, as recorded and matched by [`FaultyToken`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Initialize,
    Finalize,
    SlotList,
    TokenInfo,
    OpenSession,
    CloseSession,
    Login,
    Logout,
    FindObjectsInit,
    FindObjects,
    FindObjectsFinal,
    GenerateKey,
    EncryptInit,
    /// `encrypt` without an output buffer.
    EncryptSize,
    /// `encrypt` with an output buffer.
    EncryptFill,
    DecryptInit,
    /// `decrypt` without an output buffer.
    DecryptSize,
    /// `decrypt` with an output buffer.
    DecryptFill,
}

/// A token wrapper that fails selected calls.
pub struct FaultyToken<T> {
    inner: T,
    faults: Mutex<HashMap<Call, Rv>>,
    calls: Mutex<Vec<Call>>,
    size_padding: usize,
    fill_padding: AtomicUsize,
    corrupt_plaintext: bool,
}

impl<T: TokenInterface> FaultyToken<T> {
    /// Wraps `inner` without any fault.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            size_padding: 0,
            fill_padding: AtomicUsize::new(0),
            corrupt_plaintext: false,
        }
    }

    /// Makes every subsequent `call` return `rv`.
    pub fn fail(self, call: Call, rv: Rv) -> Self {
        self.faults.lock().insert(call, rv);
        self
    }

    /// Makes every subsequent `call` return `rv`, on a shared wrapper.
    pub fn inject(&self, call: Call, rv: Rv) {
        self.faults.lock().insert(call, rv);
    }

    /// Removes the fault on `call`.
    pub fn heal(&self, call: Call) {
        self.faults.lock().remove(&call);
    }

    /// Answers size queries with `padding` more bytes than the inner token.
    pub fn overstate_sizes(mut self, padding: usize) -> Self {
        self.size_padding = padding;
        self
    }

    /// Reports `padding` more bytes written than the inner token wrote, on a
    /// shared wrapper.
    pub fn overstate_writes(&self, padding: usize) {
        self.fill_padding.store(padding, Ordering::Relaxed);
    }

    /// Flips the first byte of every decrypted output.
    pub fn corrupt_plaintext(mut self) -> Self {
        self.corrupt_plaintext = true;
        self
    }

    /// Returns the calls seen so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns how many times `call` was made.
    pub fn count(&self, call: Call) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Returns the wrapped token.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn enter(&self, call: Call) -> TokenResult<()> {
        self.calls.lock().push(call);
        self.faults
            .lock()
            .get(&call)
            .copied()
            .unwrap_or(Rv::OK)
            .into_result()
    }

    fn reported(&self, query: bool, size: usize) -> usize {
        if query {
            size + self.size_padding
        } else {
            size + self.fill_padding.load(Ordering::Relaxed)
        }
    }
}

impl<T: TokenInterface> TokenInterface for FaultyToken<T> {
    fn initialize(&self) -> TokenResult<()> {
        self.enter(Call::Initialize)?;
        self.inner.initialize()
    }

    fn finalize(&self) -> TokenResult<()> {
        self.enter(Call::Finalize)?;
        self.inner.finalize()
    }

    fn slot_list(&self, token_present: bool) -> TokenResult<Vec<SlotId>> {
        self.enter(Call::SlotList)?;
        self.inner.slot_list(token_present)
    }

    fn token_info(&self, slot: SlotId) -> TokenResult<TokenInfo> {
        self.enter(Call::TokenInfo)?;
        self.inner.token_info(slot)
    }

    fn open_session(&self, slot: SlotId, flags: SessionFlags) -> TokenResult<SessionHandle> {
        self.enter(Call::OpenSession)?;
        self.inner.open_session(slot, flags)
    }

    fn close_session(&self, session: SessionHandle) -> TokenResult<()> {
        self.enter(Call::CloseSession)?;
        self.inner.close_session(session)
    }

    fn login(&self, session: SessionHandle, user: UserType, pin: &[u8]) -> TokenResult<()> {
        self.enter(Call::Login)?;
        self.inner.login(session, user, pin)
    }

    fn logout(&self, session: SessionHandle) -> TokenResult<()> {
        self.enter(Call::Logout)?;
        self.inner.logout(session)
    }

    fn find_objects_init(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> TokenResult<()> {
        self.enter(Call::FindObjectsInit)?;
        self.inner.find_objects_init(session, template)
    }

    fn find_objects(
        &self,
        session: SessionHandle,
        max_count: usize,
    ) -> TokenResult<Vec<ObjectHandle>> {
        self.enter(Call::FindObjects)?;
        self.inner.find_objects(session, max_count)
    }

    fn find_objects_final(&self, session: SessionHandle) -> TokenResult<()> {
        self.enter(Call::FindObjectsFinal)?;
        self.inner.find_objects_final(session)
    }

    fn generate_key(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> TokenResult<ObjectHandle> {
        self.enter(Call::GenerateKey)?;
        self.inner.generate_key(session, mechanism, template)
    }

    fn encrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()> {
        self.enter(Call::EncryptInit)?;
        self.inner.encrypt_init(session, mechanism, key)
    }

    fn encrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize> {
        self.enter(match output {
            None => Call::EncryptSize,
            Some(_) => Call::EncryptFill,
        })?;
        let query = output.is_none();
        let size = self.inner.encrypt(session, data, output)?;
        Ok(self.reported(query, size))
    }

    fn decrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()> {
        self.enter(Call::DecryptInit)?;
        self.inner.decrypt_init(session, mechanism, key)
    }

    fn decrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        mut output: Option<&mut [u8]>,
    ) -> TokenResult<usize> {
        self.enter(match output {
            None => Call::DecryptSize,
            Some(_) => Call::DecryptFill,
        })?;
        let query = output.is_none();
        let size = self.inner.decrypt(session, data, output.as_deref_mut())?;
        if let Some(first) = output.and_then(|out| out.first_mut()) {
            if self.corrupt_plaintext && size > 0 {
                *first ^= 0x01;
            }
        }
        Ok(self.reported(query, size))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::soft::{SlotConfig, SoftToken};
    use std::sync::Arc;

    fn token() -> FaultyToken<SoftToken> {
        FaultyToken::new(SoftToken::new(vec![SlotConfig::new("FKH", "1234")]))
    }

    #[test]
    fn test_injected_fault_is_returned_and_recorded() {
        let token = token().fail(Call::SlotList, Rv::DEVICE_ERROR);
        token.initialize().unwrap();

        assert_eq!(token.slot_list(true), Err(Rv::DEVICE_ERROR));
        token.heal(Call::SlotList);
        assert_eq!(token.slot_list(true).unwrap().len(), 1);

        assert_eq!(
            token.calls(),
            vec![Call::Initialize, Call::SlotList, Call::SlotList]
        );
    }

    #[test]
    fn test_shared_through_arc() {
        let token = Arc::new(token());
        let shared: Box<dyn TokenInterface> = Box::new(Arc::clone(&token));

        shared.initialize().unwrap();
        shared.finalize().unwrap();

        assert_eq!(token.count(Call::Finalize), 1);
        assert!(!token.inner().is_initialized());
    }
}
