//! Loading a [`SoftToken`] from a JSON profile.
//!
//! A profile lists the slots of the token:
//!
//! ```json
//! { "slots": [ { "label": "FKH", "pin": "1234" } ] }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{LoadError, ProfileError};
use crate::interface::{Loader, TokenInterface};
use crate::soft::{SlotConfig, SoftToken};
use crate::types::LABEL_WIDTH;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Profile {
    slots: Vec<SlotProfile>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SlotProfile {
    label: String,
    pin: Zeroizing<String>,
    #[serde(default = "default_token_present")]
    token_present: bool,
}

impl std::fmt::Debug for SlotProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotProfile")
            .field("label", &self.label)
            .field("pin", &"[REDACTED]")
            .field("token_present", &self.token_present)
            .finish()
    }
}

fn default_token_present() -> bool {
    true
}

/// Parses a profile document into slot configurations.
pub fn parse_profile(json: &str) -> Result<Vec<SlotConfig>, ProfileError> {
    let profile: Profile = serde_json::from_str(json)?;

    profile
        .slots
        .into_iter()
        .map(|slot| {
            if slot.label.len() > LABEL_WIDTH {
                return Err(ProfileError::LabelTooLong {
                    label: slot.label,
                    max: LABEL_WIDTH,
                });
            }
            let config = SlotConfig::new(slot.label, slot.pin.as_str());
            Ok(if slot.token_present {
                config
            } else {
                config.without_token()
            })
        })
        .collect()
}

/// Loads software tokens from JSON profile files.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftTokenLoader;

impl Loader for SoftTokenLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn TokenInterface>, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let json = std::fs::read_to_string(path)?;
        let slots = parse_profile(&json).map_err(|source| LoadError::InvalidModule {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), slots = slots.len(), "Soft token profile loaded");
        Ok(Box::new(SoftToken::new(slots)))
    }
}
