//! Building blocks shared by several messages.

use core::fmt;

use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, IntegerAsn1, OctetStringAsn1,
    Optional,
};
use picky_krb::data_types::{
    AuthorizationDataInner, Checksum as Asn1Checksum, EncryptedData as Asn1EncryptedData,
    EncryptionKey as Asn1EncryptionKey, EtypeInfo2Entry as Asn1EtypeInfo2Entry, HostAddress as Asn1HostAddress,
    KerbPaPacRequest, LastReqInner, PaData as Asn1PaData, PaEncTsEnc as Asn1PaEncTsEnc,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::asn1::{from_kerberos_string, int32, kerberos_string, octets, to_i32, to_i64, uint32};
use crate::constants::{Enctype, PaDataType};
use crate::time::KerberosTime;
use crate::{decode_der, encode_der, invalid_field_err, PduResult};

/// Symmetric key; the key bytes are wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub etype: Enctype,
    pub value: Zeroizing<Vec<u8>>,
}

impl EncryptionKey {
    pub fn new(etype: Enctype, value: impl Into<Vec<u8>>) -> Self {
        Self {
            etype,
            value: Zeroizing::new(value.into()),
        }
    }

    /// Keys without material are treated as absent.
    pub fn is_null(&self) -> bool {
        self.value.is_empty()
    }

    pub fn to_asn1(&self) -> Asn1EncryptionKey {
        Asn1EncryptionKey {
            key_type: ExplicitContextTag0::from(int32(self.etype.0)),
            key_value: ExplicitContextTag1::from(octets(self.value.as_slice())),
        }
    }

    pub fn from_asn1(value: &Asn1EncryptionKey) -> PduResult<Self> {
        Ok(Self::new(
            Enctype(to_i32("keytype", &value.key_type.0)?),
            value.key_value.0 .0.clone(),
        ))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("etype", &self.etype)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub etype: Enctype,
    pub kvno: Option<u32>,
    pub cipher: Vec<u8>,
}

impl EncryptedData {
    pub fn to_asn1(&self) -> Asn1EncryptedData {
        Asn1EncryptedData {
            etype: ExplicitContextTag0::from(int32(self.etype.0)),
            kvno: Optional::from(self.kvno.map(|kvno| ExplicitContextTag1::from(uint32(kvno)))),
            cipher: ExplicitContextTag2::from(octets(self.cipher.as_slice())),
        }
    }

    pub fn from_asn1(value: &Asn1EncryptedData) -> PduResult<Self> {
        let kvno = match value.kvno.0.as_ref() {
            Some(kvno) => Some(
                u32::try_from(to_i64("kvno", &kvno.0)?)
                    .map_err(|_| invalid_field_err!("EncryptedData", "kvno", "negative"))?,
            ),
            None => None,
        };

        Ok(Self {
            etype: Enctype(to_i32("etype", &value.etype.0)?),
            kvno,
            cipher: value.cipher.0 .0.clone(),
        })
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1EncryptedData = decode_der("EncryptedData", bytes)?;
        Self::from_asn1(&asn1)
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        encode_der("EncryptedData", &self.to_asn1())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub cksumtype: i32,
    pub value: Vec<u8>,
}

impl Checksum {
    pub fn to_asn1(&self) -> Asn1Checksum {
        Asn1Checksum {
            cksumtype: ExplicitContextTag0::from(int32(self.cksumtype)),
            checksum: ExplicitContextTag1::from(octets(self.value.as_slice())),
        }
    }

    pub fn from_asn1(value: &Asn1Checksum) -> PduResult<Self> {
        Ok(Self {
            cksumtype: to_i32("cksumtype", &value.cksumtype.0)?,
            value: value.checksum.0 .0.clone(),
        })
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1Checksum = decode_der("Checksum", bytes)?;
        Self::from_asn1(&asn1)
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        encode_der("Checksum", &self.to_asn1())
    }
}

/// A typed pre-authentication data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaData {
    pub padata_type: PaDataType,
    pub value: Vec<u8>,
}

impl PaData {
    pub fn new(padata_type: PaDataType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            padata_type,
            value: value.into(),
        }
    }

    pub fn empty(padata_type: PaDataType) -> Self {
        Self::new(padata_type, Vec::new())
    }

    pub fn to_asn1(&self) -> Asn1PaData {
        Asn1PaData {
            padata_type: ExplicitContextTag1::from(int32(self.padata_type.0)),
            padata_data: ExplicitContextTag2::from(octets(self.value.as_slice())),
        }
    }

    pub fn from_asn1(value: &Asn1PaData) -> PduResult<Self> {
        Ok(Self {
            padata_type: PaDataType(to_i32("padata-type", &value.padata_type.0)?),
            value: value.padata_data.0 .0.clone(),
        })
    }
}

/// Finds the first item of the given type, starting the search at `*start`.
///
/// On success `*start` is moved past the returned item so repeated calls walk every match.
pub fn find_padata<'a>(padata: &'a [PaData], start: &mut usize, padata_type: PaDataType) -> Option<&'a PaData> {
    while *start < padata.len() {
        let current = &padata[*start];
        *start += 1;

        if current.padata_type == padata_type {
            return Some(current);
        }
    }

    None
}

pub(crate) fn padata_to_asn1(padata: &[PaData]) -> Asn1SequenceOf<Asn1PaData> {
    Asn1SequenceOf::from(padata.iter().map(PaData::to_asn1).collect::<Vec<_>>())
}

pub(crate) fn padata_from_asn1(padata: &Asn1SequenceOf<Asn1PaData>) -> PduResult<Vec<PaData>> {
    padata.0.iter().map(PaData::from_asn1).collect()
}

/// METHOD-DATA ::= SEQUENCE OF PA-DATA
pub fn encode_method_data(padata: &[PaData]) -> PduResult<Vec<u8>> {
    encode_der("METHOD-DATA", &padata_to_asn1(padata))
}

pub fn decode_method_data(bytes: &[u8]) -> PduResult<Vec<PaData>> {
    let asn1: Asn1SequenceOf<Asn1PaData> = decode_der("METHOD-DATA", bytes)?;
    padata_from_asn1(&asn1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub addr_type: i32,
    pub address: Vec<u8>,
}

impl HostAddress {
    pub fn to_asn1(&self) -> Asn1HostAddress {
        Asn1HostAddress {
            addr_type: ExplicitContextTag0::from(int32(self.addr_type)),
            address: ExplicitContextTag1::from(octets(self.address.as_slice())),
        }
    }

    pub fn from_asn1(value: &Asn1HostAddress) -> PduResult<Self> {
        Ok(Self {
            addr_type: to_i32("addr-type", &value.addr_type.0)?,
            address: value.address.0 .0.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastReqEntry {
    pub lr_type: i32,
    pub value: KerberosTime,
}

impl LastReqEntry {
    pub(crate) fn to_asn1(self) -> PduResult<LastReqInner> {
        Ok(LastReqInner {
            lr_type: ExplicitContextTag0::from(int32(self.lr_type)),
            lr_value: ExplicitContextTag1::from(self.value.to_asn1()?),
        })
    }

    pub(crate) fn from_asn1(value: &LastReqInner) -> PduResult<Self> {
        Ok(Self {
            lr_type: to_i32("lr-type", &value.lr_type.0)?,
            value: KerberosTime::from_asn1(&value.lr_value.0)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDataEntry {
    pub ad_type: i32,
    pub data: Vec<u8>,
}

impl AuthorizationDataEntry {
    pub fn new(ad_type: i32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            ad_type,
            data: data.into(),
        }
    }

    pub(crate) fn to_asn1(&self) -> AuthorizationDataInner {
        AuthorizationDataInner {
            ad_type: ExplicitContextTag0::from(int32(self.ad_type)),
            ad_data: ExplicitContextTag1::from(octets(self.data.as_slice())),
        }
    }

    pub(crate) fn from_asn1(value: &AuthorizationDataInner) -> PduResult<Self> {
        Ok(Self {
            ad_type: to_i32("ad-type", &value.ad_type.0)?,
            data: value.ad_data.0 .0.clone(),
        })
    }
}

/// ETYPE-INFO-ENTRY, the pre-RFC 4120 variant with a binary salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1EtypeInfoEntry {
    etype: ExplicitContextTag0<IntegerAsn1>,
    #[serde(default)]
    salt: Optional<Option<ExplicitContextTag1<OctetStringAsn1>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtypeInfoEntry {
    pub etype: Enctype,
    pub salt: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtypeInfo2Entry {
    pub etype: Enctype,
    pub salt: Option<String>,
    pub s2kparams: Option<Vec<u8>>,
}

pub fn encode_etype_info(entries: &[EtypeInfoEntry]) -> PduResult<Vec<u8>> {
    let asn1 = entries
        .iter()
        .map(|entry| Asn1EtypeInfoEntry {
            etype: ExplicitContextTag0::from(int32(entry.etype.0)),
            salt: Optional::from(entry.salt.clone().map(|salt| ExplicitContextTag1::from(octets(salt)))),
        })
        .collect::<Vec<_>>();

    encode_der("ETYPE-INFO", &Asn1SequenceOf::from(asn1))
}

pub fn decode_etype_info(bytes: &[u8]) -> PduResult<Vec<EtypeInfoEntry>> {
    let asn1: Asn1SequenceOf<Asn1EtypeInfoEntry> = decode_der("ETYPE-INFO", bytes)?;

    asn1.0
        .iter()
        .map(|entry| {
            Ok(EtypeInfoEntry {
                etype: Enctype(to_i32("etype", &entry.etype.0)?),
                salt: entry.salt.0.as_ref().map(|salt| salt.0 .0.clone()),
            })
        })
        .collect()
}

pub fn encode_etype_info2(entries: &[EtypeInfo2Entry]) -> PduResult<Vec<u8>> {
    let asn1 = entries
        .iter()
        .map(|entry| {
            let salt = match &entry.salt {
                Some(salt) => Some(ExplicitContextTag1::from(kerberos_string("salt", salt)?)),
                None => None,
            };

            Ok(Asn1EtypeInfo2Entry {
                etype: ExplicitContextTag0::from(int32(entry.etype.0)),
                salt: Optional::from(salt),
                s2kparams: Optional::from(
                    entry
                        .s2kparams
                        .clone()
                        .map(|params| ExplicitContextTag2::from(octets(params))),
                ),
            })
        })
        .collect::<PduResult<Vec<_>>>()?;

    encode_der("ETYPE-INFO2", &Asn1SequenceOf::from(asn1))
}

pub fn decode_etype_info2(bytes: &[u8]) -> PduResult<Vec<EtypeInfo2Entry>> {
    let asn1: Asn1SequenceOf<Asn1EtypeInfo2Entry> = decode_der("ETYPE-INFO2", bytes)?;

    asn1.0
        .iter()
        .map(|entry| {
            let salt = match entry.salt.0.as_ref() {
                Some(salt) => Some(from_kerberos_string("salt", &salt.0)?),
                None => None,
            };

            Ok(EtypeInfo2Entry {
                etype: Enctype(to_i32("etype", &entry.etype.0)?),
                salt,
                s2kparams: entry.s2kparams.0.as_ref().map(|params| params.0 .0.clone()),
            })
        })
        .collect()
}

/// PA-ENC-TS-ENC, the plaintext of an encrypted timestamp or encrypted challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaEncTsEnc {
    pub timestamp: KerberosTime,
    pub usec: Option<u32>,
}

impl PaEncTsEnc {
    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1PaEncTsEnc = decode_der("PA-ENC-TS-ENC", bytes)?;

        let usec = match asn1.pausec.0.as_ref() {
            Some(usec) => Some(
                u32::try_from(to_i64("pausec", &usec.0)?)
                    .map_err(|_| invalid_field_err!("PA-ENC-TS-ENC", "pausec", "negative"))?,
            ),
            None => None,
        };

        Ok(Self {
            timestamp: KerberosTime::from_asn1(&asn1.patimestamp.0)?,
            usec,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let asn1 = Asn1PaEncTsEnc {
            patimestamp: ExplicitContextTag0::from(self.timestamp.to_asn1()?),
            pausec: Optional::from(self.usec.map(|usec| ExplicitContextTag1::from(uint32(usec)))),
        };

        encode_der("PA-ENC-TS-ENC", &asn1)
    }
}

/// Decodes a PA-PAC-REQUEST and returns its include-pac flag.
pub fn decode_pac_request(bytes: &[u8]) -> PduResult<bool> {
    let asn1: KerbPaPacRequest = decode_der("PA-PAC-REQUEST", bytes)?;
    Ok(asn1.include_pac.0)
}

pub fn encode_pac_request(include_pac: bool) -> PduResult<Vec<u8>> {
    encode_der(
        "PA-PAC-REQUEST",
        &KerbPaPacRequest {
            include_pac: ExplicitContextTag0::from(include_pac),
        },
    )
}
