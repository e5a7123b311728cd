//! Integration tests for Keyward.
//!
//! These tests drive the complete workflow from module loading to envelope
//! decryption against software tokens loaded from profile files.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyward_hsm::Module;
use keyward_token::SoftTokenLoader;
use tempfile::TempDir;

/// Default profile: two populated slots and one without a token.
pub const DEFAULT_PROFILE: &str = r#"{
    "slots": [
        {"label": "FKH", "pin": "1234"},
        {"label": "OTHER", "pin": "0000"},
        {"label": "EMPTY", "pin": "9999", "token_present": false}
    ]
}"#;

/// A token profile written to a temporary directory.
pub struct TestProfile {
    _dir: TempDir,
    path: PathBuf,
}

impl TestProfile {
    /// Writes `json` as a profile file.
    pub fn write(json: &str) -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp dir")?;
        let path = dir.path().join("token.json");
        fs::write(&path, json).context("Failed to write profile")?;
        Ok(Self { _dir: dir, path })
    }

    /// Path of the profile file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and initializes the profile as a token module.
    pub fn load(&self) -> Result<Module> {
        Module::load(&SoftTokenLoader, &self.path).context("Failed to load module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_hsm::{
        decrypt, encrypt, resolve_key, resolve_or_generate_key, AssociatedData, EnvelopeCipher,
        HsmError, KeyOrigin, Session, SessionState, MIN_ENVELOPE_SIZE,
    };
    use keyward_token::{Call, FaultyToken, Rv, SlotConfig, SoftToken, TokenInterface};
    use std::sync::Arc;

    #[test]
    fn test_full_envelope_workflow() {
        let profile = TestProfile::write(DEFAULT_PROFILE).unwrap();
        let mut module = profile.load().unwrap();

        {
            let mut session = Session::open(module.token(), "FKH").unwrap();
            session.login("1234").unwrap();
            assert_eq!(session.state(), SessionState::Authenticated);

            let (key, origin) = resolve_or_generate_key(&session, "keyward-envelope-key").unwrap();
            assert_eq!(origin, KeyOrigin::Generated);

            let envelope =
                encrypt(&session, key, AssociatedData::DEFAULT, b"Hello, Keyward!").unwrap();
            assert_eq!(envelope.len(), MIN_ENVELOPE_SIZE + 15);

            let plaintext =
                decrypt(&session, key, AssociatedData::DEFAULT, envelope.as_bytes()).unwrap();
            assert_eq!(&*plaintext, b"Hello, Keyward!");

            session.close().unwrap();
            assert_eq!(session.state(), SessionState::Closed);
        }

        module.finalize().unwrap();
        assert!(module.is_finalized());
    }

    #[test]
    fn test_key_persists_across_sessions() {
        let profile = TestProfile::write(DEFAULT_PROFILE).unwrap();
        let module = profile.load().unwrap();

        let envelope = {
            let mut session = Session::open(module.token(), "FKH").unwrap();
            session.login("1234").unwrap();
            let (key, _) = resolve_or_generate_key(&session, "persistent").unwrap();
            encrypt(&session, key, AssociatedData::DEFAULT, b"kept").unwrap()
        };

        let mut session = Session::open(module.token(), "FKH").unwrap();
        session.login("1234").unwrap();
        let (key, origin) = resolve_or_generate_key(&session, "persistent").unwrap();

        assert_eq!(origin, KeyOrigin::Found);
        let plaintext =
            decrypt(&session, key, AssociatedData::DEFAULT, envelope.as_bytes()).unwrap();
        assert_eq!(&*plaintext, b"kept");
    }

    #[test]
    fn test_private_key_hidden_until_login() {
        let profile = TestProfile::write(DEFAULT_PROFILE).unwrap();
        let module = profile.load().unwrap();

        let mut owner = Session::open(module.token(), "FKH").unwrap();
        owner.login("1234").unwrap();
        resolve_or_generate_key(&owner, "hidden").unwrap();
        owner.close().unwrap();

        let session = Session::open(module.token(), "FKH").unwrap();
        assert!(matches!(
            resolve_key(&session, "hidden"),
            Err(HsmError::KeyNotFound { rv: None, .. })
        ));
    }

    #[test]
    fn test_slots_are_isolated() {
        let profile = TestProfile::write(DEFAULT_PROFILE).unwrap();
        let module = profile.load().unwrap();

        let mut fkh = Session::open(module.token(), "FKH").unwrap();
        fkh.login("1234").unwrap();
        let (fkh_key, _) = resolve_or_generate_key(&fkh, "shared-label").unwrap();

        let mut other = Session::open(module.token(), "OTHER").unwrap();
        other.login("0000").unwrap();
        let (other_key, origin) = resolve_or_generate_key(&other, "shared-label").unwrap();
        assert_eq!(origin, KeyOrigin::Generated);

        let envelope = encrypt(&fkh, fkh_key, AssociatedData::DEFAULT, b"fkh only").unwrap();
        assert!(decrypt(&other, other_key, AssociatedData::DEFAULT, envelope.as_bytes()).is_err());
    }

    #[test]
    fn test_login_failure_unwinds() {
        let profile = TestProfile::write(DEFAULT_PROFILE).unwrap();
        let module = profile.load().unwrap();

        {
            let mut session = Session::open(module.token(), "FKH").unwrap();
            assert!(matches!(
                session.login("wrong"),
                Err(HsmError::LoginFailed(Rv::PIN_INCORRECT))
            ));
        }

        let mut session = Session::open(module.token(), "FKH").unwrap();
        session.login("1234").unwrap();
    }

    #[test]
    fn test_slot_without_token_is_not_matched() {
        let profile = TestProfile::write(DEFAULT_PROFILE).unwrap();
        let module = profile.load().unwrap();

        assert!(matches!(
            Session::open(module.token(), "EMPTY"),
            Err(HsmError::NoMatchingSlot(_))
        ));
    }

    #[test]
    fn test_invalid_profile_fails_to_load() {
        let profile = TestProfile::write(r#"{"slots": [{"label": "FKH"}]}"#).unwrap();

        let result = Module::load(&SoftTokenLoader, profile.path());
        assert!(matches!(result, Err(HsmError::LoaderFailed { .. })));
    }

    #[test]
    fn test_module_drop_finalizes() {
        let token = Arc::new(FaultyToken::new(SoftToken::new(vec![SlotConfig::new(
            "FKH", "1234",
        )])));

        let module = Module::initialize(Box::new(Arc::clone(&token)), "in-memory").unwrap();
        assert!(token.inner().is_initialized());
        drop(module);

        assert_eq!(token.count(Call::Finalize), 1);
        assert!(!token.inner().is_initialized());
    }

    #[test]
    fn test_explicit_finalize_is_not_repeated_on_drop() {
        let token = Arc::new(FaultyToken::new(SoftToken::new(vec![SlotConfig::new(
            "FKH", "1234",
        )])));

        let mut module = Module::initialize(Box::new(Arc::clone(&token)), "in-memory").unwrap();
        module.finalize().unwrap();
        drop(module);

        assert_eq!(token.count(Call::Finalize), 1);
    }

    #[test]
    fn test_sessions_from_several_threads() {
        let slots = (0..4).map(|i| SlotConfig::new(format!("W{i}"), "1234")).collect();
        let token = SoftToken::new(slots);
        token.initialize().unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4u8 {
                let token = &token;
                scope.spawn(move || {
                    let mut session = Session::open(token, &format!("W{worker}")).unwrap();
                    session.login("1234").unwrap();
                    let (key, _) = resolve_or_generate_key(&session, "threaded").unwrap();
                    let cipher = EnvelopeCipher::new(&session, key, AssociatedData::DEFAULT);

                    let message = [worker; 64];
                    let envelope = cipher.encrypt(&message).unwrap();
                    assert_eq!(*cipher.decrypt(envelope.as_bytes()).unwrap(), message);
                });
            }
        });

        assert_eq!(token.session_count(), 0);
        assert_eq!(token.object_count(), 4);
    }
}
