#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

use core::fmt;

use bitflags::bitflags;
use ironkdc_pdu::{EncryptionKey, Enctype, KerberosTime, Principal};

mod memory;

pub use self::memory::MemoryHdb;

pub type HdbResult<T> = Result<T, HdbError>;

pub type HdbError = ironkdc_error::Error<HdbErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum HdbErrorKind {
    Io(std::io::Error),
    Parse(toml::de::Error),
    InvalidEntry(String),
    Crypto(ironkdc_crypto::CryptoError),
}

impl fmt::Display for HdbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(_) => write!(f, "I/O error"),
            Self::Parse(_) => write!(f, "database file parse error"),
            Self::InvalidEntry(reason) => write!(f, "invalid entry: {reason}"),
            Self::Crypto(_) => write!(f, "key derivation failed"),
        }
    }
}

impl std::error::Error for HdbErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::InvalidEntry(_) => None,
        }
    }
}

bitflags! {
    /// Per-principal attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        const INITIAL = 1 << 0;
        const FORWARDABLE = 1 << 1;
        const PROXIABLE = 1 << 2;
        const RENEWABLE = 1 << 3;
        const POSTDATE = 1 << 4;
        const SERVER = 1 << 5;
        const CLIENT = 1 << 6;
        const INVALID = 1 << 7;
        const REQUIRE_PREAUTH = 1 << 8;
        const CHANGE_PW = 1 << 9;
        const OK_AS_DELEGATE = 1 << 10;
        const REQUIRE_PWCHANGE = 1 << 11;
        const LOCKED_OUT = 1 << 12;
    }
}

impl EntryFlags {
    pub fn parse(name: &str) -> Option<Self> {
        let flag = match name {
            "initial" => Self::INITIAL,
            "forwardable" => Self::FORWARDABLE,
            "proxiable" => Self::PROXIABLE,
            "renewable" => Self::RENEWABLE,
            "postdate" => Self::POSTDATE,
            "server" => Self::SERVER,
            "client" => Self::CLIENT,
            "invalid" => Self::INVALID,
            "require-preauth" => Self::REQUIRE_PREAUTH,
            "change-pw" => Self::CHANGE_PW,
            "ok-as-delegate" => Self::OK_AS_DELEGATE,
            "require-pwchange" => Self::REQUIRE_PWCHANGE,
            "locked-out" => Self::LOCKED_OUT,
            _ => return None,
        };

        Some(flag)
    }
}

bitflags! {
    /// What the caller intends to do with a fetched entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FetchFlags: u32 {
        const CLIENT = 1 << 0;
        const SERVER = 1 << 1;
        const KRBTGT = 1 << 2;
        const CANONICALIZE = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdbKey {
    pub key: EncryptionKey,
    /// `None` means the default salt (realm followed by the name components).
    pub salt: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdbEntry {
    pub principal: Principal,
    pub kvno: u32,
    pub keys: Vec<HdbKey>,
    pub flags: EntryFlags,
    pub valid_start: Option<KerberosTime>,
    pub valid_end: Option<KerberosTime>,
    pub pw_end: Option<KerberosTime>,
    /// Maximum ticket lifetime, in seconds
    pub max_life: Option<i64>,
    /// Maximum renewable lifetime, in seconds
    pub max_renew: Option<i64>,
}

impl HdbEntry {
    /// Every key of the given enctype, in storage order.
    pub fn keys_of(&self, etype: Enctype) -> impl Iterator<Item = &HdbKey> {
        self.keys.iter().filter(move |k| k.key.etype == etype)
    }

    /// First usable (non-null) key of the given enctype.
    pub fn key_of(&self, etype: Enctype) -> Option<&HdbKey> {
        self.keys_of(etype).find(|k| !k.key.is_null())
    }

    pub fn default_salt(&self) -> Vec<u8> {
        default_salt(&self.principal)
    }

    /// Salt actually used by `key`.
    pub fn salt_of(&self, key: &HdbKey) -> Vec<u8> {
        key.salt.clone().unwrap_or_else(|| self.default_salt())
    }
}

/// Realm followed by every name component, without separators.
pub fn default_salt(principal: &Principal) -> Vec<u8> {
    let mut salt = principal.realm.as_bytes().to_vec();

    for component in &principal.name.components {
        salt.extend_from_slice(component.as_bytes());
    }

    salt
}

/// Result of a principal lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Box<HdbEntry>),
    NotFound,
    /// The principal exists but this KDC cannot service it; the request should be proxied.
    NotFoundHere,
    /// The principal lives in another realm.
    WrongRealm { canonical: String },
}

/// Outcome of an authentication attempt, reported to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    WrongPassword,
}

pub trait Hdb: Send + Sync {
    fn fetch(&self, principal: &Principal, flags: FetchFlags) -> HdbResult<FetchOutcome>;

    /// Called once per authentication attempt; the default ignores it.
    fn auth_status(&self, entry: &HdbEntry, status: AuthStatus) {
        let _ = (entry, status);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("client", Some(EntryFlags::CLIENT))]
    #[case("require-preauth", Some(EntryFlags::REQUIRE_PREAUTH))]
    #[case("locked-out", Some(EntryFlags::LOCKED_OUT))]
    #[case("Client", None)]
    #[case("require_preauth", None)]
    fn entry_flag_names(#[case] name: &str, #[case] expected: Option<EntryFlags>) {
        assert_eq!(EntryFlags::parse(name), expected);
    }

    #[test]
    fn default_salt_concatenates_realm_and_components() {
        let principal: Principal = "host/kdc.example.com@EXAMPLE.COM".parse().unwrap();
        assert_eq!(default_salt(&principal), b"EXAMPLE.COMhostkdc.example.com");
    }
}
