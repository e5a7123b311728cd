//! In-process software token.
//!
//! Behaves like a minimal hardware token: serial sessions, per-slot login,
//! token-resident AES-256 keys and single-part AES-GCM with two-pass output
//! sizing. Key material never leaves the token.

use std::collections::{BTreeMap, HashMap, VecDeque};

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::interface::{TokenInterface, TokenResult};
use crate::rv::Rv;
use crate::types::{
    padded, Attribute, GcmParams, KeyType, Mechanism, ObjectClass, ObjectHandle, SessionFlags,
    SessionHandle, SlotId, TokenInfo, UserType,
};

/// Size of the only key length the token generates.
pub const AES_256_KEY_SIZE: usize = 32;

/// Size of the GCM authentication tag the token produces.
pub const GCM_TAG_SIZE: usize = 16;

const MANUFACTURER: &str = "Keyward";
const MODEL: &str = "SoftToken";

type Aes256Gcm12 = AesGcm<Aes256, U12>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Configuration of one slot of a [`SoftToken`].
#[derive(Clone)]
pub struct SlotConfig {
    /// Token label, at most 32 bytes.
    pub label: String,
    /// User PIN.
    pub pin: Zeroizing<String>,
    /// Whether a token is present in the slot.
    pub token_present: bool,
}

impl SlotConfig {
    /// Creates a slot holding a token with the given label and PIN.
    pub fn new(label: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pin: Zeroizing::new(pin.into()),
            token_present: true,
        }
    }

    /// Marks the slot as empty.
    pub fn without_token(mut self) -> Self {
        self.token_present = false;
        self
    }
}

impl std::fmt::Debug for SlotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotConfig")
            .field("label", &self.label)
            .field("pin", &"[REDACTED]")
            .field("token_present", &self.token_present)
            .finish()
    }
}

struct Slot {
    id: SlotId,
    config: SlotConfig,
    logged_in: bool,
}

struct KeyObject {
    slot: SlotId,
    attributes: Vec<Attribute>,
    value: Zeroizing<[u8; AES_256_KEY_SIZE]>,
}

impl KeyObject {
    fn has(&self, attribute: &Attribute) -> bool {
        self.attributes.contains(attribute)
    }

    fn matches(&self, template: &[Attribute]) -> bool {
        template.iter().all(|attribute| self.has(attribute))
    }
}

struct CipherOp {
    key: Zeroizing<[u8; AES_256_KEY_SIZE]>,
    iv: Vec<u8>,
    aad: Vec<u8>,
}

impl CipherOp {
    fn seal(&self, data: &[u8]) -> TokenResult<Vec<u8>> {
        let payload = Payload {
            msg: data,
            aad: &self.aad,
        };
        let sealed = match self.iv.len() {
            12 => Aes256Gcm12::new_from_slice(&*self.key)
                .map_err(|_| Rv::KEY_HANDLE_INVALID)?
                .encrypt(aes_gcm::Nonce::<U12>::from_slice(&self.iv), payload),
            _ => Aes256Gcm16::new_from_slice(&*self.key)
                .map_err(|_| Rv::KEY_HANDLE_INVALID)?
                .encrypt(aes_gcm::Nonce::<U16>::from_slice(&self.iv), payload),
        };
        sealed.map_err(|_| Rv::FUNCTION_FAILED)
    }

    fn open(&self, data: &[u8]) -> TokenResult<Zeroizing<Vec<u8>>> {
        let payload = Payload {
            msg: data,
            aad: &self.aad,
        };
        let opened = match self.iv.len() {
            12 => Aes256Gcm12::new_from_slice(&*self.key)
                .map_err(|_| Rv::KEY_HANDLE_INVALID)?
                .decrypt(aes_gcm::Nonce::<U12>::from_slice(&self.iv), payload),
            _ => Aes256Gcm16::new_from_slice(&*self.key)
                .map_err(|_| Rv::KEY_HANDLE_INVALID)?
                .decrypt(aes_gcm::Nonce::<U16>::from_slice(&self.iv), payload),
        };
        opened
            .map(Zeroizing::new)
            .map_err(|_| Rv::ENCRYPTED_DATA_INVALID)
    }
}

enum Operation {
    Idle,
    Find(VecDeque<ObjectHandle>),
    Encrypt(CipherOp),
    Decrypt(CipherOp),
}

struct SessionState {
    slot: SlotId,
    read_write: bool,
    operation: Operation,
}

struct State {
    initialized: bool,
    slots: Vec<Slot>,
    sessions: HashMap<SessionHandle, SessionState>,
    objects: BTreeMap<ObjectHandle, KeyObject>,
    next_handle: u64,
}

impl State {
    fn ensure_initialized(&self) -> TokenResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Rv::CRYPTOKI_NOT_INITIALIZED)
        }
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn slot(&self, id: SlotId) -> TokenResult<&Slot> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .ok_or(Rv::SLOT_ID_INVALID)
    }

    fn slot_mut(&mut self, id: SlotId) -> TokenResult<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.id == id)
            .ok_or(Rv::SLOT_ID_INVALID)
    }

    fn session(&self, handle: SessionHandle) -> TokenResult<&SessionState> {
        self.ensure_initialized()?;
        self.sessions
            .get(&handle)
            .ok_or(Rv::SESSION_HANDLE_INVALID)
    }

    fn session_mut(&mut self, handle: SessionHandle) -> TokenResult<&mut SessionState> {
        self.ensure_initialized()?;
        self.sessions
            .get_mut(&handle)
            .ok_or(Rv::SESSION_HANDLE_INVALID)
    }

    fn logged_in(&self, slot: SlotId) -> bool {
        self.slot(slot).map(|slot| slot.logged_in).unwrap_or(false)
    }

    fn visible(&self, object: &KeyObject, slot: SlotId) -> bool {
        object.slot == slot && (!object.has(&Attribute::Private(true)) || self.logged_in(slot))
    }

    /// Prepares a GCM operation with `key` for a session on `slot`.
    fn cipher_op(
        &self,
        slot: SlotId,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
        usage: Attribute,
    ) -> TokenResult<CipherOp> {
        let Mechanism::AesGcm(GcmParams { iv, aad, tag_bits }) = *mechanism else {
            return Err(Rv::MECHANISM_INVALID);
        };
        if !matches!(iv.len(), 12 | 16) || tag_bits != (GCM_TAG_SIZE * 8) as u64 {
            return Err(Rv::MECHANISM_PARAM_INVALID);
        }

        let object = self
            .objects
            .get(&key)
            .filter(|object| self.visible(object, slot))
            .ok_or(Rv::KEY_HANDLE_INVALID)?;
        if !object.has(&usage) {
            return Err(Rv::KEY_FUNCTION_NOT_PERMITTED);
        }

        Ok(CipherOp {
            key: object.value.clone(),
            iv: iv.to_vec(),
            aad: aad.to_vec(),
        })
    }
}

/// A software token holding its slots, sessions and keys in memory.
pub struct SoftToken {
    state: Mutex<State>,
}

impl SoftToken {
    /// Creates a token with the given slots, numbered from 1.
    pub fn new(slots: Vec<SlotConfig>) -> Self {
        let slots = slots
            .into_iter()
            .zip(1u64..)
            .map(|(config, id)| Slot {
                id: SlotId::new(id),
                config,
                logged_in: false,
            })
            .collect();

        Self {
            state: Mutex::new(State {
                initialized: false,
                slots,
                sessions: HashMap::new(),
                objects: BTreeMap::new(),
                next_handle: 0,
            }),
        }
    }

    /// Returns the number of key objects stored across all slots.
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Returns true once `initialize` succeeded and until `finalize`.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn run_cipher(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        encrypting: bool,
    ) -> TokenResult<usize> {
        let mut state = self.state.lock();
        let session_state = state.session_mut(session)?;

        let op = match (&session_state.operation, encrypting) {
            (Operation::Encrypt(op), true) | (Operation::Decrypt(op), false) => op,
            _ => return Err(Rv::OPERATION_NOT_INITIALIZED),
        };

        let required = if encrypting {
            data.len() + GCM_TAG_SIZE
        } else if data.len() >= GCM_TAG_SIZE {
            data.len() - GCM_TAG_SIZE
        } else {
            session_state.operation = Operation::Idle;
            return Err(Rv::ENCRYPTED_DATA_LEN_RANGE);
        };

        let Some(output) = output else {
            return Ok(required);
        };

        let processed = if encrypting {
            op.seal(data).map(Zeroizing::new)
        } else {
            op.open(data)
        };
        let processed = match processed {
            Ok(processed) => processed,
            Err(rv) => {
                session_state.operation = Operation::Idle;
                return Err(rv);
            },
        };

        if output.len() < processed.len() {
            return Err(Rv::BUFFER_TOO_SMALL);
        }
        output[..processed.len()].copy_from_slice(&processed);
        session_state.operation = Operation::Idle;
        Ok(processed.len())
    }
}

impl TokenInterface for SoftToken {
    fn initialize(&self) -> TokenResult<()> {
        let mut state = self.state.lock();
        if state.initialized {
            return Err(Rv::CRYPTOKI_ALREADY_INITIALIZED);
        }
        state.initialized = true;
        debug!(slots = state.slots.len(), "Soft token initialized");
        Ok(())
    }

    fn finalize(&self) -> TokenResult<()> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        state.sessions.clear();
        for slot in &mut state.slots {
            slot.logged_in = false;
        }
        state.initialized = false;
        debug!("Soft token finalized");
        Ok(())
    }

    fn slot_list(&self, token_present: bool) -> TokenResult<Vec<SlotId>> {
        let state = self.state.lock();
        state.ensure_initialized()?;
        Ok(state
            .slots
            .iter()
            .filter(|slot| !token_present || slot.config.token_present)
            .map(|slot| slot.id)
            .collect())
    }

    fn token_info(&self, slot: SlotId) -> TokenResult<TokenInfo> {
        let state = self.state.lock();
        state.ensure_initialized()?;
        let slot = state.slot(slot)?;
        if !slot.config.token_present {
            return Err(Rv::TOKEN_NOT_PRESENT);
        }

        Ok(TokenInfo {
            label: padded(&slot.config.label),
            manufacturer_id: padded(MANUFACTURER),
            model: padded(MODEL),
            serial_number: padded(&format!("{:016}", slot.id.raw())),
            flags: TokenInfo::TOKEN_INITIALIZED | TokenInfo::USER_PIN_INITIALIZED,
        })
    }

    fn open_session(&self, slot: SlotId, flags: SessionFlags) -> TokenResult<SessionHandle> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        if !flags.contains(SessionFlags::SERIAL_SESSION) {
            return Err(Rv::SESSION_PARALLEL_NOT_SUPPORTED);
        }
        if !state.slot(slot)?.config.token_present {
            return Err(Rv::TOKEN_NOT_PRESENT);
        }

        let handle = SessionHandle::new(state.next_handle());
        state.sessions.insert(
            handle,
            SessionState {
                slot,
                read_write: flags.contains(SessionFlags::RW_SESSION),
                operation: Operation::Idle,
            },
        );
        trace!(%slot, session = %handle, "Session opened");
        Ok(handle)
    }

    fn close_session(&self, session: SessionHandle) -> TokenResult<()> {
        let mut state = self.state.lock();
        let slot = state.session(session)?.slot;
        state.sessions.remove(&session);

        if !state.sessions.values().any(|s| s.slot == slot) {
            state.slot_mut(slot)?.logged_in = false;
        }
        trace!(%slot, %session, "Session closed");
        Ok(())
    }

    fn login(&self, session: SessionHandle, user: UserType, pin: &[u8]) -> TokenResult<()> {
        let mut state = self.state.lock();
        let slot_id = state.session(session)?.slot;
        if user != UserType::User {
            return Err(Rv::USER_TYPE_INVALID);
        }

        let slot = state.slot_mut(slot_id)?;
        if slot.logged_in {
            return Err(Rv::USER_ALREADY_LOGGED_IN);
        }
        if slot.config.pin.as_bytes() != pin {
            return Err(Rv::PIN_INCORRECT);
        }
        slot.logged_in = true;
        Ok(())
    }

    fn logout(&self, session: SessionHandle) -> TokenResult<()> {
        let mut state = self.state.lock();
        let slot_id = state.session(session)?.slot;
        let slot = state.slot_mut(slot_id)?;
        if !slot.logged_in {
            return Err(Rv::USER_NOT_LOGGED_IN);
        }
        slot.logged_in = false;
        Ok(())
    }

    fn find_objects_init(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> TokenResult<()> {
        let mut state = self.state.lock();
        let session_state = state.session(session)?;
        if !matches!(session_state.operation, Operation::Idle) {
            return Err(Rv::OPERATION_ACTIVE);
        }
        let slot = session_state.slot;

        let matches = state
            .objects
            .iter()
            .filter(|(_, object)| state.visible(object, slot) && object.matches(template))
            .map(|(handle, _)| *handle)
            .collect();
        state.session_mut(session)?.operation = Operation::Find(matches);
        Ok(())
    }

    fn find_objects(
        &self,
        session: SessionHandle,
        max_count: usize,
    ) -> TokenResult<Vec<ObjectHandle>> {
        let mut state = self.state.lock();
        let Operation::Find(pending) = &mut state.session_mut(session)?.operation else {
            return Err(Rv::OPERATION_NOT_INITIALIZED);
        };
        let count = max_count.min(pending.len());
        Ok(pending.drain(..count).collect())
    }

    fn find_objects_final(&self, session: SessionHandle) -> TokenResult<()> {
        let mut state = self.state.lock();
        let session_state = state.session_mut(session)?;
        if !matches!(session_state.operation, Operation::Find(_)) {
            return Err(Rv::OPERATION_NOT_INITIALIZED);
        }
        session_state.operation = Operation::Idle;
        Ok(())
    }

    fn generate_key(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> TokenResult<ObjectHandle> {
        let mut state = self.state.lock();
        let session_state = state.session(session)?;
        let (slot, read_write) = (session_state.slot, session_state.read_write);

        if *mechanism != Mechanism::AesKeyGen {
            return Err(Rv::MECHANISM_INVALID);
        }
        match template.iter().find_map(|attribute| match attribute {
            Attribute::ValueLen(len) => Some(*len),
            _ => None,
        }) {
            Some(len) if len == AES_256_KEY_SIZE as u64 => {},
            Some(_) => return Err(Rv::ATTRIBUTE_VALUE_INVALID),
            None => return Err(Rv::TEMPLATE_INCOMPLETE),
        }
        if template.contains(&Attribute::Token(true)) && !read_write {
            return Err(Rv::SESSION_READ_ONLY);
        }
        if template.contains(&Attribute::Private(true)) && !state.logged_in(slot) {
            return Err(Rv::USER_NOT_LOGGED_IN);
        }

        let mut attributes = template.to_vec();
        for implied in [
            Attribute::Class(ObjectClass::SecretKey),
            Attribute::KeyType(KeyType::Aes),
        ] {
            if !attributes.iter().any(|a| a.same_kind(&implied)) {
                attributes.push(implied);
            }
        }

        let mut value = Zeroizing::new([0u8; AES_256_KEY_SIZE]);
        OsRng.fill_bytes(&mut *value);

        let handle = ObjectHandle::new(state.next_handle());
        state.objects.insert(
            handle,
            KeyObject {
                slot,
                attributes,
                value,
            },
        );
        debug!(%slot, object = %handle, "AES key generated");
        Ok(handle)
    }

    fn encrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()> {
        let mut state = self.state.lock();
        let session_state = state.session(session)?;
        if !matches!(session_state.operation, Operation::Idle) {
            return Err(Rv::OPERATION_ACTIVE);
        }
        let op = state.cipher_op(session_state.slot, mechanism, key, Attribute::Encrypt(true))?;
        state.session_mut(session)?.operation = Operation::Encrypt(op);
        Ok(())
    }

    fn encrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize> {
        self.run_cipher(session, data, output, true)
    }

    fn decrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: ObjectHandle,
    ) -> TokenResult<()> {
        let mut state = self.state.lock();
        let session_state = state.session(session)?;
        if !matches!(session_state.operation, Operation::Idle) {
            return Err(Rv::OPERATION_ACTIVE);
        }
        let op = state.cipher_op(session_state.slot, mechanism, key, Attribute::Decrypt(true))?;
        state.session_mut(session)?.operation = Operation::Decrypt(op);
        Ok(())
    }

    fn decrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> TokenResult<usize> {
        self.run_cipher(session, data, output, false)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn rw_serial() -> SessionFlags {
        SessionFlags::SERIAL_SESSION | SessionFlags::RW_SESSION
    }

    fn key_template(label: &str) -> Vec<Attribute> {
        vec![
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Encrypt(true),
            Attribute::Decrypt(true),
            Attribute::ValueLen(32),
            Attribute::Label(label.as_bytes().to_vec()),
        ]
    }

    fn ready_token() -> (SoftToken, SessionHandle) {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        token.initialize().unwrap();
        let session = token.open_session(SlotId::new(1), rw_serial()).unwrap();
        token.login(session, UserType::User, b"1234").unwrap();
        (token, session)
    }

    fn gcm(iv: &[u8]) -> Mechanism<'_> {
        Mechanism::AesGcm(GcmParams {
            iv,
            aad: b"aad",
            tag_bits: 128,
        })
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        assert_eq!(token.slot_list(true), Err(Rv::CRYPTOKI_NOT_INITIALIZED));
        assert_eq!(token.finalize(), Err(Rv::CRYPTOKI_NOT_INITIALIZED));
    }

    #[test]
    fn test_initialize_twice() {
        let token = SoftToken::new(vec![]);
        token.initialize().unwrap();
        assert_eq!(token.initialize(), Err(Rv::CRYPTOKI_ALREADY_INITIALIZED));
    }

    #[test]
    fn test_slot_list_filters_empty_slots() {
        let token = SoftToken::new(vec![
            SlotConfig::new("FKH", "1234"),
            SlotConfig::new("EMPTY", "0000").without_token(),
        ]);
        token.initialize().unwrap();

        assert_eq!(token.slot_list(true).unwrap(), vec![SlotId::new(1)]);
        assert_eq!(token.slot_list(false).unwrap().len(), 2);
        assert_eq!(token.token_info(SlotId::new(2)), Err(Rv::TOKEN_NOT_PRESENT));
    }

    #[test]
    fn test_token_info_label_is_padded() {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        token.initialize().unwrap();

        let info = token.token_info(SlotId::new(1)).unwrap();
        assert_eq!(&info.label[..4], b"FKH ");
        assert_eq!(info.label_str(), "FKH");
    }

    #[test]
    fn test_parallel_session_rejected() {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        token.initialize().unwrap();
        let result = token.open_session(SlotId::new(1), SessionFlags::RW_SESSION);
        assert_eq!(result, Err(Rv::SESSION_PARALLEL_NOT_SUPPORTED));
    }

    #[test]
    fn test_login_wrong_pin() {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        token.initialize().unwrap();
        let session = token.open_session(SlotId::new(1), rw_serial()).unwrap();

        assert_eq!(
            token.login(session, UserType::User, b"0000"),
            Err(Rv::PIN_INCORRECT)
        );
        assert_eq!(token.logout(session), Err(Rv::USER_NOT_LOGGED_IN));
    }

    #[test]
    fn test_private_key_requires_login() {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        token.initialize().unwrap();
        let session = token.open_session(SlotId::new(1), rw_serial()).unwrap();

        let result = token.generate_key(session, &Mechanism::AesKeyGen, &key_template("k"));
        assert_eq!(result, Err(Rv::USER_NOT_LOGGED_IN));
    }

    #[test]
    fn test_token_key_requires_rw_session() {
        let token = SoftToken::new(vec![SlotConfig::new("FKH", "1234")]);
        token.initialize().unwrap();
        let session = token
            .open_session(SlotId::new(1), SessionFlags::SERIAL_SESSION)
            .unwrap();
        token.login(session, UserType::User, b"1234").unwrap();

        let result = token.generate_key(session, &Mechanism::AesKeyGen, &key_template("k"));
        assert_eq!(result, Err(Rv::SESSION_READ_ONLY));
    }

    #[test]
    fn test_private_keys_hidden_after_logout() {
        let (token, session) = ready_token();
        token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("k"))
            .unwrap();

        token.logout(session).unwrap();
        token
            .find_objects_init(session, &[Attribute::Label(b"k".to_vec())])
            .unwrap();
        assert!(token.find_objects(session, 1).unwrap().is_empty());
        token.find_objects_final(session).unwrap();
    }

    #[test]
    fn test_find_objects_is_bounded() {
        let (token, session) = ready_token();
        let first = token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("dup"))
            .unwrap();
        token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("dup"))
            .unwrap();

        token
            .find_objects_init(session, &[Attribute::Label(b"dup".to_vec())])
            .unwrap();
        assert_eq!(token.find_objects(session, 1).unwrap(), vec![first]);
        assert_eq!(token.find_objects(session, 5).unwrap().len(), 1);
        assert_eq!(
            token.find_objects_init(session, &[]),
            Err(Rv::OPERATION_ACTIVE)
        );
        token.find_objects_final(session).unwrap();
        assert_eq!(
            token.find_objects_final(session),
            Err(Rv::OPERATION_NOT_INITIALIZED)
        );
    }

    #[test]
    fn test_gcm_two_pass_roundtrip() {
        let (token, session) = ready_token();
        let key = token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("k"))
            .unwrap();
        let iv = [7u8; 16];

        token.encrypt_init(session, &gcm(&iv), key).unwrap();
        let size = token.encrypt(session, b"hello", None).unwrap();
        assert_eq!(size, 5 + GCM_TAG_SIZE);
        let mut ciphertext = vec![0u8; size];
        let written = token
            .encrypt(session, b"hello", Some(&mut ciphertext))
            .unwrap();
        assert_eq!(written, size);

        token.decrypt_init(session, &gcm(&iv), key).unwrap();
        let size = token.decrypt(session, &ciphertext, None).unwrap();
        let mut plaintext = vec![0u8; size];
        let written = token
            .decrypt(session, &ciphertext, Some(&mut plaintext))
            .unwrap();
        assert_eq!(&plaintext[..written], b"hello");
    }

    #[test]
    fn test_buffer_too_small_keeps_operation() {
        let (token, session) = ready_token();
        let key = token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("k"))
            .unwrap();

        token.encrypt_init(session, &gcm(&[1u8; 12]), key).unwrap();
        let mut small = [0u8; 4];
        assert_eq!(
            token.encrypt(session, b"hello", Some(&mut small)),
            Err(Rv::BUFFER_TOO_SMALL)
        );
        let mut buffer = [0u8; 21];
        assert_eq!(token.encrypt(session, b"hello", Some(&mut buffer)), Ok(21));
        assert_eq!(
            token.encrypt(session, b"hello", None),
            Err(Rv::OPERATION_NOT_INITIALIZED)
        );
    }

    #[test]
    fn test_tag_mismatch_ends_operation() {
        let (token, session) = ready_token();
        let key = token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("k"))
            .unwrap();
        let iv = [3u8; 16];

        token.encrypt_init(session, &gcm(&iv), key).unwrap();
        let mut ciphertext = vec![0u8; 4 + GCM_TAG_SIZE];
        token
            .encrypt(session, b"data", Some(&mut ciphertext))
            .unwrap();
        ciphertext[0] ^= 0x01;

        token.decrypt_init(session, &gcm(&iv), key).unwrap();
        let mut plaintext = vec![0u8; 4];
        assert_eq!(
            token.decrypt(session, &ciphertext, Some(&mut plaintext)),
            Err(Rv::ENCRYPTED_DATA_INVALID)
        );
        assert_eq!(
            token.decrypt(session, &ciphertext, None),
            Err(Rv::OPERATION_NOT_INITIALIZED)
        );
    }

    #[test]
    fn test_invalid_gcm_params() {
        let (token, session) = ready_token();
        let key = token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("k"))
            .unwrap();

        let bad_tag = Mechanism::AesGcm(GcmParams {
            iv: &[0u8; 16],
            aad: &[],
            tag_bits: 96,
        });
        assert_eq!(
            token.encrypt_init(session, &bad_tag, key),
            Err(Rv::MECHANISM_PARAM_INVALID)
        );
        assert_eq!(
            token.encrypt_init(session, &Mechanism::AesKeyGen, key),
            Err(Rv::MECHANISM_INVALID)
        );
        assert_eq!(
            token.encrypt_init(session, &gcm(&[0u8; 16]), ObjectHandle::new(999)),
            Err(Rv::KEY_HANDLE_INVALID)
        );
    }

    #[test]
    fn test_close_last_session_logs_out_slot() {
        let (token, session) = ready_token();
        token.close_session(session).unwrap();

        let session = token.open_session(SlotId::new(1), rw_serial()).unwrap();
        assert_eq!(token.logout(session), Err(Rv::USER_NOT_LOGGED_IN));
    }

    #[test]
    fn test_finalize_drops_sessions_keeps_keys() {
        let (token, session) = ready_token();
        token
            .generate_key(session, &Mechanism::AesKeyGen, &key_template("k"))
            .unwrap();

        token.finalize().unwrap();
        assert_eq!(token.session_count(), 0);
        assert_eq!(token.object_count(), 1);
        assert!(!token.is_initialized());
    }
}
