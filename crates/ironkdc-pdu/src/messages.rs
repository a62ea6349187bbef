//! AS exchange messages and the ticket/AP-REQ structures carried by FAST armor.

use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag10, ExplicitContextTag11,
    ExplicitContextTag12, ExplicitContextTag2, ExplicitContextTag3, ExplicitContextTag4, ExplicitContextTag5,
    ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8, ExplicitContextTag9, Optional,
};
use picky_asn1_der::application_tag::ApplicationTag;
use picky_krb::data_types::{
    Authenticator as Asn1Authenticator, AuthenticatorInner, EncTicketPart as Asn1EncTicketPart, EncTicketPartInner,
    Ticket as Asn1Ticket, TicketInner, TransitedEncoding as Asn1TransitedEncoding,
};
use picky_krb::messages::{
    ApReq as Asn1ApReq, ApReqInner, AsRep as Asn1AsRep, AsReq as Asn1AsReq, EncAsRepPart as Asn1EncAsRepPart,
    EncKdcRepPart, KdcRep, KdcReq, KdcReqBody as Asn1KdcReqBody, KrbError as Asn1KrbError, KrbErrorInner,
};

use crate::asn1::{
    from_kerberos_string, int32, integer, kerberos_string, octets, to_i32, to_i64, to_u32_lenient, uint32,
};
use crate::constants::{message_types, Enctype, ErrorCode, KRB5_PVNO};
use crate::data::{
    padata_from_asn1, padata_to_asn1, AuthorizationDataEntry, Checksum, EncryptedData, EncryptionKey, HostAddress,
    LastReqEntry, PaData,
};
use crate::flags::{from_kerberos_flags, to_kerberos_flags, KdcOptions, TicketFlags};
use crate::principal::PrincipalName;
use crate::time::KerberosTime;
use crate::{decode_der, encode_der, invalid_field_err, PduError, PduErrorExt as _, PduResult};

fn optional_time(value: Option<KerberosTime>) -> PduResult<Option<picky_krb::data_types::KerberosTime>> {
    value.map(KerberosTime::to_asn1).transpose()
}

fn addresses_to_asn1(addresses: &[HostAddress]) -> Asn1SequenceOf<picky_krb::data_types::HostAddress> {
    Asn1SequenceOf::from(addresses.iter().map(HostAddress::to_asn1).collect::<Vec<_>>())
}

fn addresses_from_asn1(
    addresses: &Asn1SequenceOf<picky_krb::data_types::HostAddress>,
) -> PduResult<Vec<HostAddress>> {
    addresses.0.iter().map(HostAddress::from_asn1).collect()
}

fn expect_message_type(context: &'static str, value: &picky_asn1::wrapper::IntegerAsn1, expected: i64) -> PduResult<()> {
    if to_i64("msg-type", value)? != expected {
        return Err(PduError::unexpected_message("msg-type", context));
    }

    Ok(())
}

/// KDC-REQ-BODY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReqBody {
    pub options: KdcOptions,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: Option<PrincipalName>,
    pub from: Option<KerberosTime>,
    pub till: KerberosTime,
    pub rtime: Option<KerberosTime>,
    pub nonce: u32,
    pub etypes: Vec<Enctype>,
    pub addresses: Option<Vec<HostAddress>>,
    pub enc_authorization_data: Option<EncryptedData>,
    pub additional_tickets: Vec<Ticket>,
}

impl KdcReqBody {
    pub fn to_asn1(&self) -> PduResult<Asn1KdcReqBody> {
        let cname = self.cname.as_ref().map(PrincipalName::to_asn1).transpose()?;
        let sname = self.sname.as_ref().map(PrincipalName::to_asn1).transpose()?;

        let additional_tickets = if self.additional_tickets.is_empty() {
            None
        } else {
            let tickets = self
                .additional_tickets
                .iter()
                .map(Ticket::to_asn1)
                .collect::<PduResult<Vec<_>>>()?;
            Some(ExplicitContextTag11::from(Asn1SequenceOf::from(tickets)))
        };

        Ok(Asn1KdcReqBody {
            kdc_options: ExplicitContextTag0::from(to_kerberos_flags(self.options.bits())),
            cname: Optional::from(cname.map(ExplicitContextTag1::from)),
            realm: ExplicitContextTag2::from(kerberos_string("realm", &self.realm)?),
            sname: Optional::from(sname.map(ExplicitContextTag3::from)),
            from: Optional::from(optional_time(self.from)?.map(ExplicitContextTag4::from)),
            till: ExplicitContextTag5::from(self.till.to_asn1()?),
            rtime: Optional::from(optional_time(self.rtime)?.map(ExplicitContextTag6::from)),
            nonce: ExplicitContextTag7::from(uint32(self.nonce)),
            etype: ExplicitContextTag8::from(Asn1SequenceOf::from(
                self.etypes.iter().map(|e| int32(e.0)).collect::<Vec<_>>(),
            )),
            addresses: Optional::from(
                self.addresses
                    .as_deref()
                    .map(|a| ExplicitContextTag9::from(addresses_to_asn1(a))),
            ),
            enc_authorization_data: Optional::from(
                self.enc_authorization_data
                    .as_ref()
                    .map(|e| ExplicitContextTag10::from(e.to_asn1())),
            ),
            additional_tickets: Optional::from(additional_tickets),
        })
    }

    pub fn from_asn1(value: &Asn1KdcReqBody) -> PduResult<Self> {
        let etypes = value
            .etype
            .0
            .0
            .iter()
            .map(|e| to_i32("etype", e).map(Enctype))
            .collect::<PduResult<Vec<_>>>()?;

        let additional_tickets = match value.additional_tickets.0.as_ref() {
            Some(tickets) => tickets.0 .0.iter().map(Ticket::from_asn1).collect::<PduResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            options: KdcOptions::from_bits_retain(from_kerberos_flags(&value.kdc_options.0)),
            cname: value
                .cname
                .0
                .as_ref()
                .map(|n| PrincipalName::from_asn1(&n.0))
                .transpose()?,
            realm: from_kerberos_string("realm", &value.realm.0)?,
            sname: value
                .sname
                .0
                .as_ref()
                .map(|n| PrincipalName::from_asn1(&n.0))
                .transpose()?,
            from: value
                .from
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            till: KerberosTime::from_asn1(&value.till.0)?,
            rtime: value
                .rtime
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            nonce: to_u32_lenient("nonce", &value.nonce.0)?,
            etypes,
            addresses: value
                .addresses
                .0
                .as_ref()
                .map(|a| addresses_from_asn1(&a.0))
                .transpose()?,
            enc_authorization_data: value
                .enc_authorization_data
                .0
                .as_ref()
                .map(|e| EncryptedData::from_asn1(&e.0))
                .transpose()?,
            additional_tickets,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        encode_der("KDC-REQ-BODY", &self.to_asn1()?)
    }
}

/// AS-REQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsReq {
    pub padata: Vec<PaData>,
    pub body: KdcReqBody,
    /// DER encoding of `body` as received, covered by the FAST request checksum.
    pub body_der: Vec<u8>,
}

impl AsReq {
    pub fn new(padata: Vec<PaData>, body: KdcReqBody) -> PduResult<Self> {
        let body_der = body.to_der()?;
        Ok(Self { padata, body, body_der })
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1AsReq = decode_der("AS-REQ", bytes)?;
        let request: &KdcReq = &asn1.0;

        expect_message_type("AS-REQ", &request.msg_type.0, message_types::AS_REQ)?;

        if to_i64("pvno", &request.pvno.0)? != KRB5_PVNO {
            return Err(invalid_field_err!("AS-REQ", "pvno", "unsupported protocol version"));
        }

        let padata = match request.padata.0.as_ref() {
            Some(padata) => padata_from_asn1(&padata.0)?,
            None => Vec::new(),
        };

        Ok(Self {
            padata,
            body: KdcReqBody::from_asn1(&request.req_body.0)?,
            body_der: encode_der("KDC-REQ-BODY", &request.req_body.0)?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let padata = if self.padata.is_empty() {
            None
        } else {
            Some(ExplicitContextTag3::from(padata_to_asn1(&self.padata)))
        };

        let asn1: Asn1AsReq = ApplicationTag(KdcReq {
            pvno: ExplicitContextTag1::from(integer(KRB5_PVNO)),
            msg_type: ExplicitContextTag2::from(integer(message_types::AS_REQ)),
            padata: Optional::from(padata),
            req_body: ExplicitContextTag4::from(self.body.to_asn1()?),
        });

        encode_der("AS-REQ", &asn1)
    }
}

/// Ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub realm: String,
    pub sname: PrincipalName,
    pub enc_part: EncryptedData,
}

impl Ticket {
    pub fn to_asn1(&self) -> PduResult<Asn1Ticket> {
        Ok(ApplicationTag(TicketInner {
            tkt_vno: ExplicitContextTag0::from(integer(KRB5_PVNO)),
            realm: ExplicitContextTag1::from(kerberos_string("realm", &self.realm)?),
            sname: ExplicitContextTag2::from(self.sname.to_asn1()?),
            enc_part: ExplicitContextTag3::from(self.enc_part.to_asn1()),
        }))
    }

    pub fn from_asn1(value: &Asn1Ticket) -> PduResult<Self> {
        let inner = &value.0;

        Ok(Self {
            realm: from_kerberos_string("realm", &inner.realm.0)?,
            sname: PrincipalName::from_asn1(&inner.sname.0)?,
            enc_part: EncryptedData::from_asn1(&inner.enc_part.0)?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        encode_der("Ticket", &self.to_asn1()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitedEncoding {
    pub tr_type: i32,
    pub contents: Vec<u8>,
}

/// EncTicketPart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTicketPart {
    pub flags: TicketFlags,
    pub key: EncryptionKey,
    pub crealm: String,
    pub cname: PrincipalName,
    pub transited: TransitedEncoding,
    pub authtime: KerberosTime,
    pub starttime: Option<KerberosTime>,
    pub endtime: KerberosTime,
    pub renew_till: Option<KerberosTime>,
    pub caddr: Option<Vec<HostAddress>>,
    pub authorization_data: Vec<AuthorizationDataEntry>,
}

impl EncTicketPart {
    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let authorization_data = if self.authorization_data.is_empty() {
            None
        } else {
            Some(ExplicitContextTag10::from(Asn1SequenceOf::from(
                self.authorization_data
                    .iter()
                    .map(AuthorizationDataEntry::to_asn1)
                    .collect::<Vec<_>>(),
            )))
        };

        let asn1: Asn1EncTicketPart = ApplicationTag(EncTicketPartInner {
            flags: ExplicitContextTag0::from(to_kerberos_flags(self.flags.bits())),
            key: ExplicitContextTag1::from(self.key.to_asn1()),
            crealm: ExplicitContextTag2::from(kerberos_string("crealm", &self.crealm)?),
            cname: ExplicitContextTag3::from(self.cname.to_asn1()?),
            transited: ExplicitContextTag4::from(Asn1TransitedEncoding {
                tr_type: ExplicitContextTag0::from(int32(self.transited.tr_type)),
                contents: ExplicitContextTag1::from(octets(self.transited.contents.as_slice())),
            }),
            auth_time: ExplicitContextTag5::from(self.authtime.to_asn1()?),
            starttime: Optional::from(optional_time(self.starttime)?.map(ExplicitContextTag6::from)),
            endtime: ExplicitContextTag7::from(self.endtime.to_asn1()?),
            renew_till: Optional::from(optional_time(self.renew_till)?.map(ExplicitContextTag8::from)),
            caddr: Optional::from(
                self.caddr
                    .as_deref()
                    .map(|a| ExplicitContextTag9::from(addresses_to_asn1(a))),
            ),
            authorization_data: Optional::from(authorization_data),
        });

        encode_der("EncTicketPart", &asn1)
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1EncTicketPart = decode_der("EncTicketPart", bytes)?;
        let inner = &asn1.0;

        let authorization_data = match inner.authorization_data.0.as_ref() {
            Some(ad) => ad
                .0
                .0
                .iter()
                .map(AuthorizationDataEntry::from_asn1)
                .collect::<PduResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            flags: TicketFlags::from_bits_retain(from_kerberos_flags(&inner.flags.0)),
            key: EncryptionKey::from_asn1(&inner.key.0)?,
            crealm: from_kerberos_string("crealm", &inner.crealm.0)?,
            cname: PrincipalName::from_asn1(&inner.cname.0)?,
            transited: TransitedEncoding {
                tr_type: to_i32("tr-type", &inner.transited.0.tr_type.0)?,
                contents: inner.transited.0.contents.0 .0.clone(),
            },
            authtime: KerberosTime::from_asn1(&inner.auth_time.0)?,
            starttime: inner
                .starttime
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            endtime: KerberosTime::from_asn1(&inner.endtime.0)?,
            renew_till: inner
                .renew_till
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            caddr: inner
                .caddr
                .0
                .as_ref()
                .map(|a| addresses_from_asn1(&a.0))
                .transpose()?,
            authorization_data,
        })
    }
}

/// AP-REQ, as carried in FAST armor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReq {
    pub options: u32,
    pub ticket: Ticket,
    pub authenticator: EncryptedData,
}

impl ApReq {
    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1ApReq = decode_der("AP-REQ", bytes)?;
        let inner = &asn1.0;

        expect_message_type("AP-REQ", &inner.msg_type.0, message_types::AP_REQ)?;

        Ok(Self {
            options: from_kerberos_flags(&inner.ap_options.0),
            ticket: Ticket::from_asn1(&inner.ticket.0)?,
            authenticator: EncryptedData::from_asn1(&inner.authenticator.0)?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let asn1: Asn1ApReq = ApplicationTag(ApReqInner {
            pvno: ExplicitContextTag0::from(integer(KRB5_PVNO)),
            msg_type: ExplicitContextTag1::from(integer(message_types::AP_REQ)),
            ap_options: ExplicitContextTag2::from(to_kerberos_flags(self.options)),
            ticket: ExplicitContextTag3::from(self.ticket.to_asn1()?),
            authenticator: ExplicitContextTag4::from(self.authenticator.to_asn1()),
        });

        encode_der("AP-REQ", &asn1)
    }
}

/// Authenticator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticator {
    pub crealm: String,
    pub cname: PrincipalName,
    pub cksum: Option<Checksum>,
    pub cusec: u32,
    pub ctime: KerberosTime,
    pub subkey: Option<EncryptionKey>,
    pub seq_number: Option<u32>,
}

impl Authenticator {
    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1Authenticator = decode_der("Authenticator", bytes)?;
        let inner = &asn1.0;

        let cusec = u32::try_from(to_i64("cusec", &inner.cusec.0)?)
            .map_err(|_| invalid_field_err!("Authenticator", "cusec", "negative"))?;

        Ok(Self {
            crealm: from_kerberos_string("crealm", &inner.crealm.0)?,
            cname: PrincipalName::from_asn1(&inner.cname.0)?,
            cksum: inner
                .cksum
                .0
                .as_ref()
                .map(|c| Checksum::from_asn1(&c.0))
                .transpose()?,
            cusec,
            ctime: KerberosTime::from_asn1(&inner.ctime.0)?,
            subkey: inner
                .subkey
                .0
                .as_ref()
                .map(|k| EncryptionKey::from_asn1(&k.0))
                .transpose()?,
            seq_number: inner
                .seq_number
                .0
                .as_ref()
                .map(|s| to_u32_lenient("seq-number", &s.0))
                .transpose()?,
        })
    }

    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let asn1: Asn1Authenticator = ApplicationTag(AuthenticatorInner {
            authenticator_vno: ExplicitContextTag0::from(integer(KRB5_PVNO)),
            crealm: ExplicitContextTag1::from(kerberos_string("crealm", &self.crealm)?),
            cname: ExplicitContextTag2::from(self.cname.to_asn1()?),
            cksum: Optional::from(self.cksum.as_ref().map(|c| ExplicitContextTag3::from(c.to_asn1()))),
            cusec: ExplicitContextTag4::from(uint32(self.cusec)),
            ctime: ExplicitContextTag5::from(self.ctime.to_asn1()?),
            subkey: Optional::from(self.subkey.as_ref().map(|k| ExplicitContextTag6::from(k.to_asn1()))),
            seq_number: Optional::from(self.seq_number.map(|s| ExplicitContextTag7::from(uint32(s)))),
            authorization_data: Optional::from(None),
        });

        encode_der("Authenticator", &asn1)
    }
}

/// EncASRepPart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncAsRepPart {
    pub key: EncryptionKey,
    pub last_req: Vec<LastReqEntry>,
    pub nonce: u32,
    pub key_expiration: Option<KerberosTime>,
    pub flags: TicketFlags,
    pub authtime: KerberosTime,
    pub starttime: Option<KerberosTime>,
    pub endtime: KerberosTime,
    pub renew_till: Option<KerberosTime>,
    pub srealm: String,
    pub sname: PrincipalName,
    pub caddr: Option<Vec<HostAddress>>,
    pub encrypted_pa_data: Vec<PaData>,
}

impl EncAsRepPart {
    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let last_req = self
            .last_req
            .iter()
            .map(|lr| lr.to_asn1())
            .collect::<PduResult<Vec<_>>>()?;

        let encrypted_pa_data = if self.encrypted_pa_data.is_empty() {
            None
        } else {
            Some(ExplicitContextTag12::from(padata_to_asn1(&self.encrypted_pa_data)))
        };

        let asn1: Asn1EncAsRepPart = ApplicationTag(EncKdcRepPart {
            key: ExplicitContextTag0::from(self.key.to_asn1()),
            last_req: ExplicitContextTag1::from(Asn1SequenceOf::from(last_req)),
            nonce: ExplicitContextTag2::from(uint32(self.nonce)),
            key_expiration: Optional::from(optional_time(self.key_expiration)?.map(ExplicitContextTag3::from)),
            flags: ExplicitContextTag4::from(to_kerberos_flags(self.flags.bits())),
            auth_time: ExplicitContextTag5::from(self.authtime.to_asn1()?),
            start_time: Optional::from(optional_time(self.starttime)?.map(ExplicitContextTag6::from)),
            end_time: ExplicitContextTag7::from(self.endtime.to_asn1()?),
            renew_till: Optional::from(optional_time(self.renew_till)?.map(ExplicitContextTag8::from)),
            srealm: ExplicitContextTag9::from(kerberos_string("srealm", &self.srealm)?),
            sname: ExplicitContextTag10::from(self.sname.to_asn1()?),
            caddr: Optional::from(
                self.caddr
                    .as_deref()
                    .map(|a| ExplicitContextTag11::from(addresses_to_asn1(a))),
            ),
            encrypted_pa_data: Optional::from(encrypted_pa_data),
        });

        encode_der("EncASRepPart", &asn1)
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1EncAsRepPart = decode_der("EncASRepPart", bytes)?;
        let inner = &asn1.0;

        Ok(Self {
            key: EncryptionKey::from_asn1(&inner.key.0)?,
            last_req: inner
                .last_req
                .0
                .0
                .iter()
                .map(LastReqEntry::from_asn1)
                .collect::<PduResult<Vec<_>>>()?,
            nonce: to_u32_lenient("nonce", &inner.nonce.0)?,
            key_expiration: inner
                .key_expiration
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            flags: TicketFlags::from_bits_retain(from_kerberos_flags(&inner.flags.0)),
            authtime: KerberosTime::from_asn1(&inner.auth_time.0)?,
            starttime: inner
                .start_time
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            endtime: KerberosTime::from_asn1(&inner.end_time.0)?,
            renew_till: inner
                .renew_till
                .0
                .as_ref()
                .map(|t| KerberosTime::from_asn1(&t.0))
                .transpose()?,
            srealm: from_kerberos_string("srealm", &inner.srealm.0)?,
            sname: PrincipalName::from_asn1(&inner.sname.0)?,
            caddr: inner
                .caddr
                .0
                .as_ref()
                .map(|a| addresses_from_asn1(&a.0))
                .transpose()?,
            encrypted_pa_data: match inner.encrypted_pa_data.0.as_ref() {
                Some(padata) => padata_from_asn1(&padata.0)?,
                None => Vec::new(),
            },
        })
    }
}

/// AS-REP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsRep {
    pub padata: Vec<PaData>,
    pub crealm: String,
    pub cname: PrincipalName,
    pub ticket: Ticket,
    pub enc_part: EncryptedData,
}

impl AsRep {
    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let padata = if self.padata.is_empty() {
            None
        } else {
            Some(ExplicitContextTag2::from(padata_to_asn1(&self.padata)))
        };

        let asn1: Asn1AsRep = ApplicationTag(KdcRep {
            pvno: ExplicitContextTag0::from(integer(KRB5_PVNO)),
            msg_type: ExplicitContextTag1::from(integer(message_types::AS_REP)),
            padata: Optional::from(padata),
            crealm: ExplicitContextTag3::from(kerberos_string("crealm", &self.crealm)?),
            cname: ExplicitContextTag4::from(self.cname.to_asn1()?),
            ticket: ExplicitContextTag5::from(self.ticket.to_asn1()?),
            enc_part: ExplicitContextTag6::from(self.enc_part.to_asn1()),
        });

        encode_der("AS-REP", &asn1)
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1AsRep = decode_der("AS-REP", bytes)?;
        let inner = &asn1.0;

        expect_message_type("AS-REP", &inner.msg_type.0, message_types::AS_REP)?;

        Ok(Self {
            padata: match inner.padata.0.as_ref() {
                Some(padata) => padata_from_asn1(&padata.0)?,
                None => Vec::new(),
            },
            crealm: from_kerberos_string("crealm", &inner.crealm.0)?,
            cname: PrincipalName::from_asn1(&inner.cname.0)?,
            ticket: Ticket::from_asn1(&inner.ticket.0)?,
            enc_part: EncryptedData::from_asn1(&inner.enc_part.0)?,
        })
    }
}

/// KRB-ERROR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrbError {
    pub stime: KerberosTime,
    pub susec: u32,
    pub error_code: ErrorCode,
    pub crealm: Option<String>,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: PrincipalName,
    pub e_text: Option<String>,
    pub e_data: Option<Vec<u8>>,
}

impl KrbError {
    pub fn to_der(&self) -> PduResult<Vec<u8>> {
        let crealm = self
            .crealm
            .as_deref()
            .map(|realm| kerberos_string("crealm", realm))
            .transpose()?;
        let cname = self.cname.as_ref().map(PrincipalName::to_asn1).transpose()?;
        let e_text = self
            .e_text
            .as_deref()
            .map(|text| kerberos_string("e-text", text))
            .transpose()?;

        let asn1: Asn1KrbError = ApplicationTag(KrbErrorInner {
            pvno: ExplicitContextTag0::from(integer(KRB5_PVNO)),
            msg_type: ExplicitContextTag1::from(integer(message_types::KRB_ERROR)),
            ctime: Optional::from(None),
            cusec: Optional::from(None),
            stime: ExplicitContextTag4::from(self.stime.to_asn1()?),
            susec: ExplicitContextTag5::from(uint32(self.susec)),
            error_code: ExplicitContextTag6::from(self.error_code.0),
            crealm: Optional::from(crealm.map(ExplicitContextTag7::from)),
            cname: Optional::from(cname.map(ExplicitContextTag8::from)),
            realm: ExplicitContextTag9::from(kerberos_string("realm", &self.realm)?),
            sname: ExplicitContextTag10::from(self.sname.to_asn1()?),
            e_text: Optional::from(e_text.map(ExplicitContextTag11::from)),
            e_data: Optional::from(self.e_data.as_deref().map(|d| ExplicitContextTag12::from(octets(d)))),
        });

        encode_der("KRB-ERROR", &asn1)
    }

    pub fn from_der(bytes: &[u8]) -> PduResult<Self> {
        let asn1: Asn1KrbError = decode_der("KRB-ERROR", bytes)?;
        let inner = &asn1.0;

        expect_message_type("KRB-ERROR", &inner.msg_type.0, message_types::KRB_ERROR)?;

        Ok(Self {
            stime: KerberosTime::from_asn1(&inner.stime.0)?,
            susec: to_u32_lenient("susec", &inner.susec.0)?,
            error_code: ErrorCode(inner.error_code.0),
            crealm: inner
                .crealm
                .0
                .as_ref()
                .map(|r| from_kerberos_string("crealm", &r.0))
                .transpose()?,
            cname: inner
                .cname
                .0
                .as_ref()
                .map(|n| PrincipalName::from_asn1(&n.0))
                .transpose()?,
            realm: from_kerberos_string("realm", &inner.realm.0)?,
            sname: PrincipalName::from_asn1(&inner.sname.0)?,
            e_text: inner
                .e_text
                .0
                .as_ref()
                .map(|t| from_kerberos_string("e-text", &t.0))
                .transpose()?,
            e_data: inner.e_data.0.as_ref().map(|d| d.0 .0.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;
    use crate::constants::NameType;

    fn sample_body() -> KdcReqBody {
        KdcReqBody {
            options: KdcOptions::FORWARDABLE | KdcOptions::RENEWABLE_OK | KdcOptions::CANONICALIZE,
            cname: Some(PrincipalName::new(NameType::PRINCIPAL, ["alice"])),
            realm: "EXAMPLE.COM".to_owned(),
            sname: Some(PrincipalName::krbtgt("EXAMPLE.COM")),
            from: None,
            till: KerberosTime(1_700_036_000),
            rtime: None,
            nonce: 0x1234_5678,
            etypes: vec![Enctype::AES256_CTS_HMAC_SHA1_96, Enctype::AES128_CTS_HMAC_SHA1_96],
            addresses: None,
            enc_authorization_data: None,
            additional_tickets: Vec::new(),
        }
    }

    #[test]
    fn as_req_decodes_what_a_client_sends() {
        let request = AsReq::new(vec![PaData::empty(crate::PaDataType::PAC_REQUEST)], sample_body()).unwrap();
        let bytes = request.to_der().unwrap();
        assert_eq!(bytes[0], 0x6A);

        let decoded = AsReq::from_der(&bytes).unwrap();
        assert_eq!(decoded.body, request.body);
        assert_eq!(decoded.body_der, request.body_der);
        assert_eq!(decoded.padata, request.padata);
    }

    #[test]
    fn tgs_req_is_not_an_as_req() {
        let mut bytes = AsReq::new(Vec::new(), sample_body()).unwrap().to_der().unwrap();
        bytes[0] = 0x6C; // [APPLICATION 12]
        assert!(AsReq::from_der(&bytes).is_err());
    }

    #[test]
    fn krb_error_rendering() {
        let error = KrbError {
            stime: KerberosTime(1_700_000_000),
            susec: 7,
            error_code: ErrorCode::PREAUTH_REQUIRED,
            crealm: Some("EXAMPLE.COM".to_owned()),
            cname: Some(PrincipalName::new(NameType::PRINCIPAL, ["alice"])),
            realm: "EXAMPLE.COM".to_owned(),
            sname: PrincipalName::krbtgt("EXAMPLE.COM"),
            e_text: Some("Need to use PA-ENC-TIMESTAMP/PA-PK-AS-REQ".to_owned()),
            e_data: None,
        };

        let decoded = KrbError::from_der(&error.to_der().unwrap()).unwrap();

        expect![[r#"
            KrbError {
                stime: KerberosTime(
                    1700000000,
                ),
                susec: 7,
                error_code: ErrorCode(
                    25,
                ),
                crealm: Some(
                    "EXAMPLE.COM",
                ),
                cname: Some(
                    PrincipalName {
                        name_type: NameType(
                            1,
                        ),
                        components: [
                            "alice",
                        ],
                    },
                ),
                realm: "EXAMPLE.COM",
                sname: PrincipalName {
                    name_type: NameType(
                        2,
                    ),
                    components: [
                        "krbtgt",
                        "EXAMPLE.COM",
                    ],
                },
                e_text: Some(
                    "Need to use PA-ENC-TIMESTAMP/PA-PK-AS-REQ",
                ),
                e_data: None,
            }
        "#]]
        .assert_debug_eq(&decoded);
    }
}
