// No need to be as strict as in production libraries
#![expect(clippy::unwrap_used, clippy::panic, reason = "fixtures panic on broken setup")]

//! Shared fixtures for the integration tests: a small realm, a client-side AS-REQ builder
//! and the client half of FAST armoring.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use ironkdc_as::{Kdc, KdcConfig, ProcessOutcome, RequestInfo};
use ironkdc_crypto::{Crypto as _, PickyCrypto};
use ironkdc_hdb::MemoryHdb;
use ironkdc_pdu::constants::{armor_types, key_usage, transited_types};
use ironkdc_pdu::data::{decode_method_data, find_padata, PaEncTsEnc};
use ironkdc_pdu::fast::{decode_fast_reply, FastArmor, FastArmoredReq, FastReq, FastResponse};
use ironkdc_pdu::messages::{
    ApReq, AsRep, AsReq, Authenticator, EncAsRepPart, EncTicketPart, KdcReqBody, KrbError, Ticket, TransitedEncoding,
};
use ironkdc_pdu::{
    EncryptedData, EncryptionKey, Enctype, FastOptions, KdcOptions, KerberosTime, NameType, PaData, PaDataType,
    PrincipalName, TicketFlags,
};

pub const REALM: &str = "EXAMPLE.COM";
pub const NOW: KerberosTime = KerberosTime(1_700_000_000);
pub const NONCE: u32 = 0x1234_5678;

pub const AES256: Enctype = Enctype::AES256_CTS_HMAC_SHA1_96;
pub const AES128: Enctype = Enctype::AES128_CTS_HMAC_SHA1_96;

pub const KRBTGT_KVNO: u32 = 2;

pub const DATABASE: &str = r#"
max_failed_logins = 3
not_found_here = ["rodc@EXAMPLE.COM"]

[[principal]]
name = "alice@EXAMPLE.COM"
password = "alice-password"
flags = ["client", "forwardable", "renewable"]
max_life_secs = 36000
max_renew_secs = 604800

[[principal]]
name = "bob@EXAMPLE.COM"
password = "bob-password"
enctypes = [17]
flags = ["client"]

[[principal]]
name = "carol@EXAMPLE.COM"
password = "carol-password"
flags = ["client", "locked-out"]

[[principal]]
name = "krbtgt/EXAMPLE.COM@EXAMPLE.COM"
password = "krbtgt-secret"
flags = ["server", "forwardable", "renewable"]
max_life_secs = 86400
max_renew_secs = 604800
kvno = 2

[[principal]]
name = "host/www.example.com@EXAMPLE.COM"
password = "host-secret"
flags = ["server"]

[[alias]]
name = "al@EXAMPLE.COM"
target = "alice@EXAMPLE.COM"
"#;

pub fn database() -> MemoryHdb {
    MemoryHdb::from_toml(DATABASE, &PickyCrypto).unwrap()
}

pub fn kdc_with(configure: impl FnOnce(&mut KdcConfig)) -> Kdc {
    let mut config = KdcConfig::new(REALM);
    configure(&mut config);

    Kdc::new(config, Arc::new(database()), Arc::new(PickyCrypto))
}

pub fn kdc() -> Kdc {
    kdc_with(|_| {})
}

pub fn peer() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 50_000)
}

/// A stream request from [`peer`] processed at [`NOW`].
pub fn info() -> RequestInfo {
    RequestInfo::new(Some(peer()), false).at(NOW)
}

pub fn principal_name(name: &str) -> PrincipalName {
    PrincipalName::new(NameType::PRINCIPAL, name.split('/'))
}

/// An AS-REQ body for `client` asking for a TGT valid ten hours.
pub fn body(client: &str) -> KdcReqBody {
    KdcReqBody {
        options: KdcOptions::empty(),
        cname: Some(principal_name(client)),
        realm: REALM.to_owned(),
        sname: Some(PrincipalName::krbtgt(REALM)),
        from: None,
        till: NOW.saturating_add(10 * 3600),
        rtime: None,
        nonce: NONCE,
        etypes: vec![AES256, AES128],
        addresses: None,
        enc_authorization_data: None,
        additional_tickets: Vec::new(),
    }
}

pub fn password_key(etype: Enctype, password: &str, salt: &str) -> EncryptionKey {
    PickyCrypto
        .string_to_key(etype, password.as_bytes(), salt.as_bytes())
        .unwrap()
}

pub fn alice_key() -> EncryptionKey {
    password_key(AES256, "alice-password", "EXAMPLE.COMalice")
}

pub fn krbtgt_key() -> EncryptionKey {
    password_key(AES256, "krbtgt-secret", "EXAMPLE.COMkrbtgtEXAMPLE.COM")
}

pub fn enc_timestamp(key: &EncryptionKey, timestamp: KerberosTime) -> PaData {
    let plaintext = PaEncTsEnc {
        timestamp,
        usec: Some(0),
    }
    .to_der()
    .unwrap();

    let enc_data = PickyCrypto
        .seal(key, key_usage::AS_REQ_PA_ENC_TIMESTAMP, &plaintext, None)
        .unwrap();

    PaData::new(PaDataType::ENC_TIMESTAMP, enc_data.to_der().unwrap())
}

pub fn as_req(padata: Vec<PaData>, body: KdcReqBody) -> Vec<u8> {
    AsReq::new(padata, body).unwrap().to_der().unwrap()
}

#[track_caller]
pub fn reply(outcome: ProcessOutcome) -> Vec<u8> {
    match outcome {
        ProcessOutcome::Reply(bytes) => bytes,
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[track_caller]
pub fn krb_error(outcome: ProcessOutcome) -> KrbError {
    KrbError::from_der(&reply(outcome)).unwrap()
}

#[track_caller]
pub fn as_rep(outcome: ProcessOutcome) -> AsRep {
    AsRep::from_der(&reply(outcome)).unwrap()
}

pub fn open_enc_part(rep: &AsRep, key: &EncryptionKey) -> EncAsRepPart {
    let plaintext = PickyCrypto
        .open(key, key_usage::AS_REP_ENC_PART, &rep.enc_part)
        .unwrap();

    EncAsRepPart::from_der(&plaintext).unwrap()
}

/// Opens the ticket of `rep` with the TGS key.
pub fn open_ticket(ticket: &Ticket) -> EncTicketPart {
    let plaintext = PickyCrypto
        .open(&krbtgt_key(), key_usage::TICKET, &ticket.enc_part)
        .unwrap();

    EncTicketPart::from_der(&plaintext).unwrap()
}

pub fn method_data(error: &KrbError) -> Vec<PaData> {
    decode_method_data(error.e_data.as_deref().unwrap()).unwrap()
}

pub fn padata_types(padata: &[PaData]) -> Vec<PaDataType> {
    padata.iter().map(|padata| padata.padata_type).collect()
}

pub fn find(padata: &[PaData], padata_type: PaDataType) -> Option<&PaData> {
    let mut start = 0;
    find_padata(padata, &mut start, padata_type)
}

/// The client side of FAST: a TGT for alice forged under the TGS key, presented with a fresh subkey.
pub struct Armor {
    pub key: EncryptionKey,
    pub ap_req: Vec<u8>,
}

impl Armor {
    pub fn new(now: KerberosTime) -> Self {
        let session_key = EncryptionKey::new(AES256, vec![0x11; 32]);
        let subkey = EncryptionKey::new(AES256, vec![0x22; 32]);

        let ticket_part = EncTicketPart {
            flags: TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT,
            key: session_key.clone(),
            crealm: REALM.to_owned(),
            cname: principal_name("alice"),
            transited: TransitedEncoding {
                tr_type: transited_types::DOMAIN_X500_COMPRESS,
                contents: Vec::new(),
            },
            authtime: now,
            starttime: None,
            endtime: now.saturating_add(36000),
            renew_till: None,
            caddr: None,
            authorization_data: Vec::new(),
        };

        let ticket = Ticket {
            realm: REALM.to_owned(),
            sname: PrincipalName::krbtgt(REALM),
            enc_part: PickyCrypto
                .seal(
                    &krbtgt_key(),
                    key_usage::TICKET,
                    &ticket_part.to_der().unwrap(),
                    Some(KRBTGT_KVNO),
                )
                .unwrap(),
        };

        let authenticator = Authenticator {
            crealm: REALM.to_owned(),
            cname: principal_name("alice"),
            cksum: None,
            cusec: 0,
            ctime: now,
            subkey: Some(subkey.clone()),
            seq_number: None,
        };

        let ap_req = ApReq {
            options: 0,
            ticket,
            authenticator: PickyCrypto
                .seal(
                    &session_key,
                    key_usage::AP_REQ_AUTH,
                    &authenticator.to_der().unwrap(),
                    None,
                )
                .unwrap(),
        };

        let key = PickyCrypto
            .cf2(&subkey, &session_key, b"subkeyarmor", b"ticketarmor")
            .unwrap();

        Self {
            key,
            ap_req: ap_req.to_der().unwrap(),
        }
    }

    /// The FX-FAST padata protecting `inner_padata` and `body`, checksummed over `outer_body`.
    pub fn fast_padata(
        &self,
        options: FastOptions,
        inner_padata: Vec<PaData>,
        body: &KdcReqBody,
        outer_body: &KdcReqBody,
    ) -> PaData {
        let fast_req = FastReq {
            options,
            padata: inner_padata,
            req_body: body.clone(),
        };

        let armored = FastArmoredReq {
            armor: Some(FastArmor {
                armor_type: armor_types::AP_REQUEST,
                value: self.ap_req.clone(),
            }),
            req_checksum: PickyCrypto
                .checksum(&self.key, key_usage::FAST_REQ_CHKSUM, &outer_body.to_der().unwrap())
                .unwrap(),
            enc_fast_req: PickyCrypto
                .seal(&self.key, key_usage::FAST_ENC, &fast_req.to_der().unwrap(), None)
                .unwrap(),
        };

        PaData::new(PaDataType::FX_FAST, armored.to_padata_value().unwrap())
    }

    /// An armored AS-REQ whose outer body is a copy of the inner one.
    pub fn request(&self, options: FastOptions, inner_padata: Vec<PaData>, body: KdcReqBody) -> Vec<u8> {
        let fast = self.fast_padata(options, inner_padata, &body, &body);
        as_req(vec![fast], body)
    }

    /// Decrypts the KrbFastResponse carried in `padata`.
    #[track_caller]
    pub fn open_response(&self, padata: &[PaData]) -> FastResponse {
        let fast = find(padata, PaDataType::FX_FAST).unwrap();
        let enc_fast_rep: EncryptedData = decode_fast_reply(&fast.value).unwrap();

        let plaintext = PickyCrypto
            .open(&self.key, key_usage::FAST_REP, &enc_fast_rep)
            .unwrap();

        FastResponse::from_der(&plaintext).unwrap()
    }

    /// The key ENC-CHAL timestamps are sealed under, bound to this armor and `client_key`.
    pub fn challenge_key(&self, client_key: &EncryptionKey) -> EncryptionKey {
        PickyCrypto
            .cf2(&self.key, client_key, b"clientchallengearmor", b"challengelongterm")
            .unwrap()
    }
}

pub fn enc_challenge(challenge_key: &EncryptionKey, timestamp: KerberosTime) -> PaData {
    let plaintext = PaEncTsEnc {
        timestamp,
        usec: Some(0),
    }
    .to_der()
    .unwrap();

    let enc_data = PickyCrypto
        .seal(challenge_key, key_usage::ENC_CHALLENGE_CLIENT, &plaintext, None)
        .unwrap();

    PaData::new(PaDataType::ENCRYPTED_CHALLENGE, enc_data.to_der().unwrap())
}
