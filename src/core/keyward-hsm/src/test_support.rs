//! Tokens shared by the unit tests.

use keyward_token::{FaultyToken, SlotConfig, SoftToken, TokenInterface};

/// An initialized software token with two populated slots and an empty one.
pub(crate) fn soft_token() -> SoftToken {
    let token = SoftToken::new(vec![
        SlotConfig::new("FKH", "1234"),
        SlotConfig::new("OTHER", "0000"),
        SlotConfig::new("EMPTY", "9999").without_token(),
    ]);
    token.initialize().expect("soft token initializes");
    token
}

pub(crate) fn faulty_token() -> FaultyToken<SoftToken> {
    FaultyToken::new(soft_token())
}
