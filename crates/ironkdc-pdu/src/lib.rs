#![doc = include_str!("../README.md")]

use core::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

mod asn1;
pub mod authz;
pub mod constants;
pub mod data;
pub mod fast;
pub mod flags;
pub mod messages;
pub mod principal;
pub mod time;

pub use self::constants::{Enctype, ErrorCode, NameType, PaDataType};
pub use self::data::{Checksum, EncryptedData, EncryptionKey, HostAddress, PaData};
pub use self::flags::{FastOptions, KdcOptions, TicketFlags};
pub use self::principal::{Principal, PrincipalName};
pub use self::time::KerberosTime;

pub type PduResult<T> = Result<T, PduError>;

pub type PduError = ironkdc_error::Error<PduErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum PduErrorKind {
    Encode(picky_asn1_der::Asn1DerError),
    Decode(picky_asn1_der::Asn1DerError),
    InvalidField { field: &'static str, reason: &'static str },
    UnexpectedMessage { expected: &'static str },
}

impl fmt::Display for PduErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(_) => write!(f, "DER encoding failed"),
            Self::Decode(_) => write!(f, "DER decoding failed"),
            Self::InvalidField { field, reason } => write!(f, "invalid `{field}`: {reason}"),
            Self::UnexpectedMessage { expected } => write!(f, "unexpected message, expected {expected}"),
        }
    }
}

impl std::error::Error for PduErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) | Self::Decode(e) => Some(e),
            Self::InvalidField { .. } | Self::UnexpectedMessage { .. } => None,
        }
    }
}

pub trait PduErrorExt {
    fn encode(context: &'static str, error: picky_asn1_der::Asn1DerError) -> Self;
    fn decode(context: &'static str, error: picky_asn1_der::Asn1DerError) -> Self;
    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self;
    fn unexpected_message(context: &'static str, expected: &'static str) -> Self;
}

impl PduErrorExt for PduError {
    fn encode(context: &'static str, error: picky_asn1_der::Asn1DerError) -> Self {
        Self::new(context, PduErrorKind::Encode(error))
    }

    fn decode(context: &'static str, error: picky_asn1_der::Asn1DerError) -> Self {
        Self::new(context, PduErrorKind::Decode(error))
    }

    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self {
        Self::new(context, PduErrorKind::InvalidField { field, reason })
    }

    fn unexpected_message(context: &'static str, expected: &'static str) -> Self {
        Self::new(context, PduErrorKind::UnexpectedMessage { expected })
    }
}

/// Creates a `PduError` with `InvalidField` kind
#[macro_export]
macro_rules! invalid_field_err {
    ( $context:expr, $field:expr, $reason:expr $(,)? ) => {{
        <$crate::PduError as $crate::PduErrorExt>::invalid_field($context, $field, $reason)
    }};
}

/// Decodes a DER value.
pub fn decode_der<T: DeserializeOwned>(context: &'static str, bytes: &[u8]) -> PduResult<T> {
    picky_asn1_der::from_bytes(bytes).map_err(|e| PduError::decode(context, e))
}

/// Encodes a value as DER.
pub fn encode_der<T: Serialize + ?Sized>(context: &'static str, value: &T) -> PduResult<Vec<u8>> {
    picky_asn1_der::to_vec(value).map_err(|e| PduError::encode(context, e))
}
