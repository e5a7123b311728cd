//! Handles, metadata, attributes and mechanisms exchanged with a token.

use std::fmt;

/// Width of the fixed, space-padded label field in [`TokenInfo`].
pub const LABEL_WIDTH: usize = 32;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// The unset sentinel.
            pub const INVALID: $name = $name(0);

            /// Wraps a raw handle value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw handle value.
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Returns false for the unset sentinel.
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle! {
    /// Identifier of a slot on the token.
    SlotId
}

handle! {
    /// An open session on one slot.
    SessionHandle
}

handle! {
    /// An object resident in the token.
    ObjectHandle
}

/// Flags passed when opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags(u64);

impl SessionFlags {
    /// Read-write session.
    pub const RW_SESSION: SessionFlags = SessionFlags(0x2);
    /// Serial session; mandatory for every open call.
    pub const SERIAL_SESSION: SessionFlags = SessionFlags(0x4);

    /// Returns the raw flag bits.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: SessionFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SessionFlags {
    type Output = SessionFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SessionFlags(self.0 | rhs.0)
    }
}

/// Who is logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    /// Security officer.
    SecurityOfficer,
    /// Normal user.
    User,
}

/// Metadata of the token present in a slot.
///
/// Text fields are fixed width and padded with spaces, as the device reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Token label.
    pub label: [u8; LABEL_WIDTH],
    /// Manufacturer identifier.
    pub manufacturer_id: [u8; 32],
    /// Token model.
    pub model: [u8; 16],
    /// Serial number.
    pub serial_number: [u8; 16],
    /// Token flags.
    pub flags: u64,
}

impl TokenInfo {
    /// Token has been initialized.
    pub const TOKEN_INITIALIZED: u64 = 0x400;
    /// The user PIN has been set.
    pub const USER_PIN_INITIALIZED: u64 = 0x8;

    /// Returns the label with trailing padding removed.
    pub fn label_str(&self) -> String {
        String::from_utf8_lossy(&self.label)
            .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_string()
    }
}

/// Pads `text` with spaces into a fixed-width field, truncating if longer.
pub fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let bytes = text.as_bytes();
    let len = bytes.len().min(N);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Class of a token object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// Symmetric secret key.
    SecretKey,
}

/// Type of a key object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// AES key.
    Aes,
}

/// A typed object attribute used in templates and searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Object class.
    Class(ObjectClass),
    /// Key type.
    KeyType(KeyType),
    /// Persistent, token-resident object.
    Token(bool),
    /// Only visible to authenticated sessions.
    Private(bool),
    /// Attributes can be changed after creation.
    Modifiable(bool),
    /// Key may encrypt.
    Encrypt(bool),
    /// Key may decrypt.
    Decrypt(bool),
    /// Key length in bytes.
    ValueLen(u64),
    /// Label.
    Label(Vec<u8>),
    /// Identifier.
    Id(Vec<u8>),
}

impl Attribute {
    /// Returns true when both attributes are of the same kind.
    pub fn same_kind(&self, other: &Attribute) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Parameters of an AES-GCM operation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GcmParams<'a> {
    /// Initialization vector.
    pub iv: &'a [u8],
    /// Additional authenticated data.
    pub aad: &'a [u8],
    /// Length of the authentication tag in bits.
    pub tag_bits: u64,
}

impl fmt::Debug for GcmParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcmParams")
            .field("iv_len", &self.iv.len())
            .field("aad_len", &self.aad.len())
            .field("tag_bits", &self.tag_bits)
            .finish()
    }
}

/// A mechanism understood by the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism<'a> {
    /// AES key generation.
    AesKeyGen,
    /// AES in Galois/Counter mode.
    AesGcm(GcmParams<'a>),
}
