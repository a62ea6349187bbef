//! Conversions between the picky ASN.1 wrappers and plain Rust values.

use picky_asn1::restricted_string::Ia5String;
use picky_asn1::wrapper::{IntegerAsn1, OctetStringAsn1};
use picky_krb::data_types::KerberosStringAsn1;

use crate::{invalid_field_err, PduResult};

/// Minimal two's complement big-endian encoding.
pub(crate) fn integer(value: i64) -> IntegerAsn1 {
    let bytes = value.to_be_bytes();
    let mut start = 0;

    while start + 1 < bytes.len() {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);

        if !redundant {
            break;
        }

        start += 1;
    }

    IntegerAsn1::from(bytes[start..].to_vec())
}

pub(crate) fn int32(value: i32) -> IntegerAsn1 {
    integer(i64::from(value))
}

pub(crate) fn uint32(value: u32) -> IntegerAsn1 {
    integer(i64::from(value))
}

pub(crate) fn to_i64(field: &'static str, value: &IntegerAsn1) -> PduResult<i64> {
    let bytes = &value.0;

    if bytes.len() > 8 {
        return Err(invalid_field_err!("integer", field, "does not fit in 64 bits"));
    }

    let Some(first) = bytes.first() else {
        return Ok(0);
    };

    let mut acc: i64 = if first & 0x80 != 0 { -1 } else { 0 };

    for byte in bytes {
        acc = (acc << 8) | i64::from(*byte);
    }

    Ok(acc)
}

pub(crate) fn to_i32(field: &'static str, value: &IntegerAsn1) -> PduResult<i32> {
    i32::try_from(to_i64(field, value)?).map_err(|_| invalid_field_err!("integer", field, "out of Int32 range"))
}

/// Accepts both UInt32 and sign-wrapped Int32 encodings, as older clients emit the latter for nonces.
pub(crate) fn to_u32_lenient(field: &'static str, value: &IntegerAsn1) -> PduResult<u32> {
    let value = to_i64(field, value)?;

    if value < i64::from(i32::MIN) || value > i64::from(u32::MAX) {
        return Err(invalid_field_err!("integer", field, "out of UInt32 range"));
    }

    u32::try_from(value & 0xFFFF_FFFF).map_err(|_| invalid_field_err!("integer", field, "out of UInt32 range"))
}

pub(crate) fn kerberos_string(field: &'static str, value: &str) -> PduResult<KerberosStringAsn1> {
    let ia5 = Ia5String::from_string(value.to_owned())
        .map_err(|_| invalid_field_err!("KerberosString", field, "not an IA5 string"))?;

    Ok(KerberosStringAsn1::from(ia5))
}

pub(crate) fn from_kerberos_string(field: &'static str, value: &KerberosStringAsn1) -> PduResult<String> {
    String::from_utf8(value.0.as_bytes().to_vec())
        .map_err(|_| invalid_field_err!("KerberosString", field, "not valid UTF-8"))
}

pub(crate) fn octets(bytes: impl Into<Vec<u8>>) -> OctetStringAsn1 {
    OctetStringAsn1::from(bytes.into())
}
