//! Flexible Authentication Secure Tunneling (RFC 6113) and the KDC's FX-COOKIE.

use picky_asn1::bit_string::BitString;
use picky_asn1::wrapper::{
    Asn1SequenceOf, BitStringAsn1, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::data_types::{
    Checksum as Asn1Checksum, EncryptedData as Asn1EncryptedData, EncryptionKey as Asn1EncryptionKey,
    KerberosStringAsn1, KerberosTime as Asn1KerberosTime, PaData as Asn1PaData, PrincipalName as Asn1PrincipalName,
};
use picky_krb::messages::KdcReqBody as Asn1KdcReqBody;
use serde::{Deserialize, Serialize};

use crate::asn1::{from_kerberos_string, int32, kerberos_string, octets, to_i32, to_i64, to_u32_lenient, uint32};
use crate::data::{padata_from_asn1, padata_to_asn1, Checksum, EncryptedData, EncryptionKey, PaData};
use crate::flags::{from_kerberos_flags, FastOptions};
use crate::messages::KdcReqBody;
use crate::principal::PrincipalName;
use crate::time::KerberosTime;
use crate::{decode_der, encode_der, invalid_field_err, PduResult};

/// Version tag of the cookies this KDC issues.
pub const FAST_COOKIE_VERSION: &[u8; 4] = b"H5L1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KrbFastArmor {
    armor_type: ExplicitContextTag0<IntegerAsn1>,
    armor_value: ExplicitContextTag1<OctetStringAsn1>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KrbFastArmoredReq {
    armor: Optional<Option<ExplicitContextTag0<Asn1KrbFastArmor>>>,
    req_checksum: ExplicitContextTag1<Asn1Checksum>,
    enc_fast_req: ExplicitContextTag2<Asn1EncryptedData>,
}

/// PA-FX-FAST-REQUEST ::= CHOICE { armored-data [0] KrbFastArmoredReq, ... }
type Asn1PaFxFastRequest = ExplicitContextTag0<Asn1KrbFastArmoredReq>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KrbFastReq {
    fast_options: ExplicitContextTag0<BitStringAsn1>,
    padata: ExplicitContextTag1<Asn1SequenceOf<Asn1PaData>>,
    req_body: ExplicitContextTag2<Asn1KdcReqBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KrbFastArmoredRep {
    enc_fast_rep: ExplicitContextTag0<Asn1EncryptedData>,
}

/// PA-FX-FAST-REPLY ::= CHOICE { armored-data [0] KrbFastArmoredRep, ... }
type Asn1PaFxFastReply = ExplicitContextTag0<Asn1KrbFastArmoredRep>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KrbFastFinished {
    timestamp: ExplicitContextTag0<Asn1KerberosTime>,
    usec: ExplicitContextTag1<IntegerAsn1>,
    crealm: ExplicitContextTag2<KerberosStringAsn1>,
    cname: ExplicitContextTag3<Asn1PrincipalName>,
    ticket_checksum: ExplicitContextTag4<Asn1Checksum>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KrbFastResponse {
    padata: ExplicitContextTag0<Asn1SequenceOf<Asn1PaData>>,
    strengthen_key: Optional<Option<ExplicitContextTag1<Asn1EncryptionKey>>>,
    finished: Optional<Option<ExplicitContextTag2<Asn1KrbFastFinished>>>,
    nonce: ExplicitContextTag3<IntegerAsn1>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KdcFastCookie {
    version: ExplicitContextTag0<OctetStringAsn1>,
    cookie: ExplicitContextTag1<Asn1EncryptedData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1KdcFastState {
    flags: ExplicitContextTag0<IntegerAsn1>,
    expiration: ExplicitContextTag1<Asn1KerberosTime>,
    fast_state: ExplicitContextTag2<Asn1SequenceOf<Asn1PaData>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastArmor {
    pub armor_type: i32,
    pub value: Vec<u8>,
}

/// KrbFastArmoredReq, the value of an FX-FAST request padata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastArmoredReq {
    pub armor: Option<FastArmor>,
    pub req_checksum: Checksum,
    pub enc_fast_req: EncryptedData,
}

impl FastArmoredReq {
    /// Decodes a PA-FX-FAST-REQUEST; only the armored-data alternative is understood.
    pub fn from_padata_value(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1PaFxFastRequest = decode_der("PA-FX-FAST-REQUEST", bytes)?;
        let inner = &asn1.0;

        let armor = match inner.armor.0.as_ref() {
            Some(armor) => Some(FastArmor {
                armor_type: to_i32("armor-type", &armor.0.armor_type.0)?,
                value: armor.0.armor_value.0 .0.clone(),
            }),
            None => None,
        };

        Ok(Self {
            armor,
            req_checksum: Checksum::from_asn1(&inner.req_checksum.0)?,
            enc_fast_req: EncryptedData::from_asn1(&inner.enc_fast_req.0)?,
        })
    }

    pub fn to_padata_value(&self) -> PduResult<Vec<u8>> {
        let armor = self.armor.as_ref().map(|armor| {
            ExplicitContextTag0::from(Asn1KrbFastArmor {
                armor_type: ExplicitContextTag0::from(int32(armor.armor_type)),
                armor_value: ExplicitContextTag1::from(octets(armor.value.as_slice())),
            })
        });

        let asn1: Asn1PaFxFastRequest = ExplicitContextTag0::from(Asn1KrbFastArmoredReq {
            armor: Optional::from(armor),
            req_checksum: ExplicitContextTag1::from(self.req_checksum.to_asn1()),
            enc_fast_req: ExplicitContextTag2::from(self.enc_fast_req.to_asn1()),
        });

        encode_der("PA-FX-FAST-REQUEST", &asn1)
    }
}

/// KrbFastReq, the plaintext of `enc-fast-req`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastReq {
    pub options: FastOptions,
    pub padata: Vec<PaData>,
    pub req_body: KdcReqBody,
}

impl FastReq {
    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1KrbFastReq = decode_der("KrbFastReq", bytes)?;

        Ok(Self {
            options: FastOptions::from_bits_retain(from_kerberos_flags(&asn1.fast_options.0)),
            padata: padata_from_asn1(&asn1.padata.0)?,
            req_body: KdcReqBody::from_asn1(&asn1.req_body.0)?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let asn1 = Asn1KrbFastReq {
            fast_options: ExplicitContextTag0::from(BitStringAsn1::from(BitString::with_bytes(
                self.options.bits().to_be_bytes().to_vec(),
            ))),
            padata: ExplicitContextTag1::from(padata_to_asn1(&self.padata)),
            req_body: ExplicitContextTag2::from(self.req_body.to_asn1()?),
        };

        encode_der("KrbFastReq", &asn1)
    }
}

/// KrbFastFinished, binds the issued ticket to the armored exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastFinished {
    pub timestamp: KerberosTime,
    pub usec: u32,
    pub crealm: String,
    pub cname: PrincipalName,
    pub ticket_checksum: Checksum,
}

/// KrbFastResponse, the plaintext of an armored reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastResponse {
    pub padata: Vec<PaData>,
    pub strengthen_key: Option<EncryptionKey>,
    pub finished: Option<FastFinished>,
    pub nonce: u32,
}

impl FastResponse {
    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let finished = match &self.finished {
            Some(finished) => Some(ExplicitContextTag2::from(Asn1KrbFastFinished {
                timestamp: ExplicitContextTag0::from(finished.timestamp.to_asn1()?),
                usec: ExplicitContextTag1::from(uint32(finished.usec)),
                crealm: ExplicitContextTag2::from(kerberos_string("crealm", &finished.crealm)?),
                cname: ExplicitContextTag3::from(finished.cname.to_asn1()?),
                ticket_checksum: ExplicitContextTag4::from(finished.ticket_checksum.to_asn1()),
            })),
            None => None,
        };

        let asn1 = Asn1KrbFastResponse {
            padata: ExplicitContextTag0::from(padata_to_asn1(&self.padata)),
            strengthen_key: Optional::from(
                self.strengthen_key
                    .as_ref()
                    .map(|key| ExplicitContextTag1::from(key.to_asn1())),
            ),
            finished: Optional::from(finished),
            nonce: ExplicitContextTag3::from(uint32(self.nonce)),
        };

        encode_der("KrbFastResponse", &asn1)
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1KrbFastResponse = decode_der("KrbFastResponse", bytes)?;

        let finished = match asn1.finished.0.as_ref() {
            Some(finished) => {
                let finished = &finished.0;
                Some(FastFinished {
                    timestamp: KerberosTime::from_asn1(&finished.timestamp.0)?,
                    usec: to_u32_lenient("usec", &finished.usec.0)?,
                    crealm: from_kerberos_string("crealm", &finished.crealm.0)?,
                    cname: PrincipalName::from_asn1(&finished.cname.0)?,
                    ticket_checksum: Checksum::from_asn1(&finished.ticket_checksum.0)?,
                })
            }
            None => None,
        };

        Ok(Self {
            padata: padata_from_asn1(&asn1.padata.0)?,
            strengthen_key: asn1
                .strengthen_key
                .0
                .as_ref()
                .map(|key| EncryptionKey::from_asn1(&key.0))
                .transpose()?,
            finished,
            nonce: to_u32_lenient("nonce", &asn1.nonce.0)?,
        })
    }
}

/// Encodes a PA-FX-FAST-REPLY around an encrypted KrbFastResponse.
pub fn encode_fast_reply(enc_fast_rep: &EncryptedData) -> PduResult<Vec<u8>> {
    let asn1: Asn1PaFxFastReply = ExplicitContextTag0::from(Asn1KrbFastArmoredRep {
        enc_fast_rep: ExplicitContextTag0::from(enc_fast_rep.to_asn1()),
    });

    encode_der("PA-FX-FAST-REPLY", &asn1)
}

pub fn decode_fast_reply(bytes: &[u8]) -> PduResult<EncryptedData> {
    let asn1: Asn1PaFxFastReply = decode_der("PA-FX-FAST-REPLY", bytes)?;
    EncryptedData::from_asn1(&asn1.0.enc_fast_rep.0)
}

/// KDCFastCookie, the value of FX-COOKIE padata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastCookie {
    pub version: Vec<u8>,
    pub cookie: EncryptedData,
}

impl FastCookie {
    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1KdcFastCookie = decode_der("KDCFastCookie", bytes)?;

        Ok(Self {
            version: asn1.version.0 .0.clone(),
            cookie: EncryptedData::from_asn1(&asn1.cookie.0)?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let asn1 = Asn1KdcFastCookie {
            version: ExplicitContextTag0::from(octets(self.version.as_slice())),
            cookie: ExplicitContextTag1::from(self.cookie.to_asn1()),
        };

        encode_der("KDCFastCookie", &asn1)
    }
}

/// KDCFastState, the plaintext of a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FastState {
    pub flags: u32,
    pub expiration: KerberosTime,
    pub fast_state: Vec<PaData>,
}

impl FastState {
    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1KdcFastState = decode_der("KDCFastState", bytes)?;

        let flags = u32::try_from(to_i64("flags", &asn1.flags.0)?)
            .map_err(|_| invalid_field_err!("KDCFastState", "flags", "negative"))?;

        Ok(Self {
            flags,
            expiration: KerberosTime::from_asn1(&asn1.expiration.0)?,
            fast_state: padata_from_asn1(&asn1.fast_state.0)?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let asn1 = Asn1KdcFastState {
            flags: ExplicitContextTag0::from(uint32(self.flags)),
            expiration: ExplicitContextTag1::from(self.expiration.to_asn1()?),
            fast_state: ExplicitContextTag2::from(padata_to_asn1(&self.fast_state)),
        };

        encode_der("KDCFastState", &asn1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{armor_types, Enctype};

    #[test]
    fn armored_request_without_armor_decodes() {
        let request = FastArmoredReq {
            armor: None,
            req_checksum: Checksum {
                cksumtype: 16,
                value: vec![1; 12],
            },
            enc_fast_req: EncryptedData {
                etype: Enctype::AES256_CTS_HMAC_SHA1_96,
                kvno: None,
                cipher: vec![2; 40],
            },
        };

        let decoded = FastArmoredReq::from_padata_value(&request.to_padata_value().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn armored_request_carries_ap_req_armor() {
        let request = FastArmoredReq {
            armor: Some(FastArmor {
                armor_type: armor_types::AP_REQUEST,
                value: vec![0x6E, 0x00],
            }),
            req_checksum: Checksum {
                cksumtype: 16,
                value: vec![1; 12],
            },
            enc_fast_req: EncryptedData {
                etype: Enctype::AES256_CTS_HMAC_SHA1_96,
                kvno: Some(3),
                cipher: vec![2; 40],
            },
        };

        let decoded = FastArmoredReq::from_padata_value(&request.to_padata_value().unwrap()).unwrap();
        assert_eq!(decoded.armor, request.armor);
        assert_eq!(decoded.enc_fast_req.kvno, Some(3));
    }

    #[test]
    fn fast_reply_with_finished() {
        let response = FastResponse {
            padata: vec![PaData::empty(crate::PaDataType::FX_COOKIE)],
            strengthen_key: None,
            finished: Some(FastFinished {
                timestamp: KerberosTime(1_700_000_000),
                usec: 0,
                crealm: "EXAMPLE.COM".to_owned(),
                cname: PrincipalName::new(crate::NameType::PRINCIPAL, ["alice"]),
                ticket_checksum: Checksum {
                    cksumtype: 16,
                    value: vec![3; 12],
                },
            }),
            nonce: 42,
        };

        assert_eq!(FastResponse::from_der(&response.to_der().unwrap()).unwrap(), response);
    }
}
