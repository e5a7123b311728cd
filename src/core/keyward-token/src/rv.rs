//! Token status codes.
//!
//! Every token call yields a numeric status. Exactly one value, [`Rv::OK`],
//! means success; every other value is a failure that callers must report.

use std::fmt;

/// A raw status code returned by a token call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rv(pub u64);

macro_rules! status_codes {
    ($($name:ident = $value:literal),* $(,)?) => {
        impl Rv {
            $(
                #[allow(missing_docs)]
                pub const $name: Rv = Rv($value);
            )*

            /// Returns the symbolic name of a known status code.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    OK = 0x0000_0000,
    HOST_MEMORY = 0x0000_0002,
    SLOT_ID_INVALID = 0x0000_0003,
    GENERAL_ERROR = 0x0000_0005,
    FUNCTION_FAILED = 0x0000_0006,
    ARGUMENTS_BAD = 0x0000_0007,
    ATTRIBUTE_VALUE_INVALID = 0x0000_0013,
    DEVICE_ERROR = 0x0000_0030,
    ENCRYPTED_DATA_INVALID = 0x0000_0040,
    ENCRYPTED_DATA_LEN_RANGE = 0x0000_0041,
    KEY_HANDLE_INVALID = 0x0000_0060,
    KEY_TYPE_INCONSISTENT = 0x0000_0063,
    KEY_FUNCTION_NOT_PERMITTED = 0x0000_0068,
    MECHANISM_INVALID = 0x0000_0070,
    MECHANISM_PARAM_INVALID = 0x0000_0071,
    OBJECT_HANDLE_INVALID = 0x0000_0082,
    OPERATION_ACTIVE = 0x0000_0090,
    OPERATION_NOT_INITIALIZED = 0x0000_0091,
    PIN_INCORRECT = 0x0000_00A0,
    PIN_LEN_RANGE = 0x0000_00A2,
    SESSION_CLOSED = 0x0000_00B0,
    SESSION_HANDLE_INVALID = 0x0000_00B3,
    SESSION_PARALLEL_NOT_SUPPORTED = 0x0000_00B4,
    SESSION_READ_ONLY = 0x0000_00B5,
    TEMPLATE_INCOMPLETE = 0x0000_00D0,
    TEMPLATE_INCONSISTENT = 0x0000_00D1,
    TOKEN_NOT_PRESENT = 0x0000_00E0,
    USER_ALREADY_LOGGED_IN = 0x0000_0100,
    USER_NOT_LOGGED_IN = 0x0000_0101,
    USER_TYPE_INVALID = 0x0000_0103,
    BUFFER_TOO_SMALL = 0x0000_0150,
    CRYPTOKI_NOT_INITIALIZED = 0x0000_0190,
    CRYPTOKI_ALREADY_INITIALIZED = 0x0000_0191,
}

impl Rv {
    /// Returns true for the single success status.
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Rv::OK
    }

    /// Converts a raw status into a `Result`.
    pub fn into_result(self) -> Result<(), Rv> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Rv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}
