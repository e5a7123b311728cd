//! Session lifecycle.
//!
//! A session goes through `Opened -> Authenticated -> Closed`:
//! - [`Session::open`] finds the slot by label and opens a read-write serial session
//! - [`Session::login`] authenticates it as the normal user
//! - [`Session::close`] logs out (if needed) and closes it
//!
//! Closing is idempotent and also happens when the session is dropped.

use keyward_token::{Rv, SessionFlags, SessionHandle, SlotId, TokenInterface, UserType};
use tracing::{debug, error, info, warn};

use crate::error::HsmError;

/// State of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, not authenticated.
    Opened,
    /// Open and logged in.
    Authenticated,
    /// Closed; the handle has been cleared.
    Closed,
}

/// An open session on one slot of a token.
///
/// The session borrows the token it was opened on and cannot outlive it.
pub struct Session<'t> {
    token: &'t dyn TokenInterface,
    handle: SessionHandle,
    slot: SlotId,
    slot_label: String,
    state: SessionState,
    close_failed: bool,
}

impl<'t> Session<'t> {
    /// Opens a read-write session on the first slot labelled `slot_label`.
    pub fn open(token: &'t dyn TokenInterface, slot_label: &str) -> Result<Self, HsmError> {
        let slot = find_slot(token, slot_label)?;

        let flags = SessionFlags::SERIAL_SESSION | SessionFlags::RW_SESSION;
        let handle = token.open_session(slot, flags).map_err(|rv| {
            error!(slot = slot_label, %rv, "Unable to open session");
            HsmError::SessionOpenFailed {
                slot: slot_label.to_string(),
                rv,
            }
        })?;

        info!(slot = slot_label, slot_id = %slot, session = %handle, "Session opened");

        Ok(Self {
            token,
            handle,
            slot,
            slot_label: slot_label.to_string(),
            state: SessionState::Opened,
            close_failed: false,
        })
    }

    /// Logs the normal user in with `credential`. Never retried.
    pub fn login(&mut self, credential: &str) -> Result<(), HsmError> {
        let handle = self.active_handle()?;

        self.token
            .login(handle, UserType::User, credential.as_bytes())
            .map_err(|rv| {
                error!(slot = %self.slot_label, %rv, "Login failed");
                HsmError::LoginFailed(rv)
            })?;

        self.state = SessionState::Authenticated;
        info!(slot = %self.slot_label, "Login successful");
        Ok(())
    }

    /// Logs out and closes the session.
    ///
    /// A session that is not logged in is closed all the same; any other
    /// logout failure is logged and the close still proceeds. Closing an
    /// already closed session is a no-op.
    pub fn close(&mut self) -> Result<(), HsmError> {
        if !self.handle.is_valid() {
            debug!(slot = %self.slot_label, "Session already closed");
            return Ok(());
        }

        match self.token.logout(self.handle) {
            Ok(()) => debug!(session = %self.handle, "Logged out"),
            Err(Rv::USER_NOT_LOGGED_IN) => {
                debug!(session = %self.handle, "Session was not logged in");
            },
            Err(rv) => warn!(session = %self.handle, %rv, "Logout failed, closing anyway"),
        }

        if let Err(rv) = self.token.close_session(self.handle) {
            error!(session = %self.handle, %rv, "Unable to close session");
            self.close_failed = true;
            return Err(HsmError::SessionCloseFailed(rv));
        }

        info!(slot = %self.slot_label, session = %self.handle, "Session closed");
        self.handle = SessionHandle::INVALID;
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Returns the session handle, [`SessionHandle::INVALID`] once closed.
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Returns the slot the session was opened on.
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Returns the label of that slot.
    pub fn slot_label(&self) -> &str {
        &self.slot_label
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the token the session belongs to.
    pub fn token(&self) -> &'t dyn TokenInterface {
        self.token
    }

    /// Returns the handle, or [`HsmError::SessionClosed`] once closed.
    pub(crate) fn active_handle(&self) -> Result<SessionHandle, HsmError> {
        if self.handle.is_valid() {
            Ok(self.handle)
        } else {
            Err(HsmError::SessionClosed)
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.handle.is_valid() && !self.close_failed {
            if let Err(e) = self.close() {
                warn!(error = %e, "Session not closed on drop");
            }
        }
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("slot", &self.slot)
            .field("slot_label", &self.slot_label)
            .field("state", &self.state)
            .finish()
    }
}

/// Finds the first token-bearing slot whose label, trailing padding removed,
/// equals `slot_label`.
pub fn find_slot(token: &dyn TokenInterface, slot_label: &str) -> Result<SlotId, HsmError> {
    let slots = token.slot_list(true).map_err(|rv| {
        error!(%rv, "Error in slot_list");
        HsmError::EnumerationFailed {
            operation: "slot_list",
            rv,
        }
    })?;

    if slots.is_empty() {
        warn!("slot_list retrieved 0 slots");
    }

    for slot in slots {
        let info = token.token_info(slot).map_err(|rv| {
            error!(slot_id = %slot, looking_for = slot_label, %rv, "Unable to read token info");
            HsmError::EnumerationFailed {
                operation: "token_info",
                rv,
            }
        })?;

        if info.label_str() == slot_label {
            debug!(slot_id = %slot, slot = slot_label, "Slot found");
            return Ok(slot);
        }
    }

    error!(slot = slot_label, "No slot found for label");
    Err(HsmError::NoMatchingSlot(slot_label.to_string()))
}
