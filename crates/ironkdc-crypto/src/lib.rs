#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

use core::fmt;

use ironkdc_pdu::{Checksum, EncryptedData, EncryptionKey, Enctype};

mod picky;
mod prf;

pub use self::picky::PickyCrypto;

pub type CryptoResult<T> = Result<T, CryptoError>;

pub type CryptoError = ironkdc_error::Error<CryptoErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum CryptoErrorKind {
    UnsupportedEnctype(Enctype),
    EnctypeMismatch { key: Enctype, data: Enctype },
    Cipher(picky_krb::crypto::KerberosCryptoError),
    ChecksumMismatch,
}

impl fmt::Display for CryptoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEnctype(etype) => write!(f, "unsupported enctype {etype}"),
            Self::EnctypeMismatch { key, data } => write!(f, "key is {key} but data is {data}"),
            Self::Cipher(_) => write!(f, "cipher failure"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
        }
    }
}

impl std::error::Error for CryptoErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cipher(e) => Some(e),
            Self::UnsupportedEnctype(_) | Self::EnctypeMismatch { .. } | Self::ChecksumMismatch => None,
        }
    }
}

pub trait CryptoErrorExt {
    fn unsupported(context: &'static str, etype: Enctype) -> Self;
    fn cipher(context: &'static str, error: picky_krb::crypto::KerberosCryptoError) -> Self;
}

impl CryptoErrorExt for CryptoError {
    fn unsupported(context: &'static str, etype: Enctype) -> Self {
        Self::new(context, CryptoErrorKind::UnsupportedEnctype(etype))
    }

    fn cipher(context: &'static str, error: picky_krb::crypto::KerberosCryptoError) -> Self {
        Self::new(context, CryptoErrorKind::Cipher(error))
    }
}

/// Cryptographic operations the KDC needs, keyed by Kerberos key usage numbers.
///
/// Implementations must be usable from several workers at once.
pub trait Crypto: Send + Sync {
    /// Whether keys of this enctype can be used at all.
    fn is_supported(&self, etype: Enctype) -> bool;

    fn encrypt(&self, key: &EncryptionKey, usage: i32, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, key: &EncryptionKey, usage: i32, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Keyed checksum using the mandatory checksum type of the key's enctype.
    fn checksum(&self, key: &EncryptionKey, usage: i32, data: &[u8]) -> CryptoResult<Checksum>;

    fn random_key(&self, etype: Enctype) -> CryptoResult<EncryptionKey>;

    fn string_to_key(&self, etype: Enctype, password: &[u8], salt: &[u8]) -> CryptoResult<EncryptionKey>;

    /// KRB-FX-CF2 (RFC 6113 section 5.1); the result has the enctype of `key1`.
    fn cf2(&self, key1: &EncryptionKey, key2: &EncryptionKey, pepper1: &[u8], pepper2: &[u8])
        -> CryptoResult<EncryptionKey>;

    fn verify_checksum(&self, key: &EncryptionKey, usage: i32, data: &[u8], checksum: &Checksum) -> CryptoResult<()> {
        let expected = self.checksum(key, usage, data)?;

        if expected.cksumtype != checksum.cksumtype || !constant_time_eq(&expected.value, &checksum.value) {
            return Err(CryptoError::new("verify checksum", CryptoErrorKind::ChecksumMismatch));
        }

        Ok(())
    }

    /// Encrypts into an `EncryptedData` tagged with the key's enctype.
    fn seal(&self, key: &EncryptionKey, usage: i32, plaintext: &[u8], kvno: Option<u32>) -> CryptoResult<EncryptedData> {
        Ok(EncryptedData {
            etype: key.etype,
            kvno,
            cipher: self.encrypt(key, usage, plaintext)?,
        })
    }

    /// Decrypts an `EncryptedData`, which must use the key's enctype.
    fn open(&self, key: &EncryptionKey, usage: i32, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
        if data.etype != key.etype {
            return Err(CryptoError::new(
                "open EncryptedData",
                CryptoErrorKind::EnctypeMismatch {
                    key: key.etype,
                    data: data.etype,
                },
            ));
        }

        self.decrypt(key, usage, &data.cipher)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq as _;

    a.len() == b.len() && bool::from(a.ct_eq(b))
}
