use std::sync::Arc;

use ironkdc_crypto::Crypto;
use ironkdc_hdb::{AuthStatus, FetchFlags, FetchOutcome, Hdb};
use ironkdc_pdu::messages::{AsReq, KrbError};
use ironkdc_pdu::{Enctype, ErrorCode, KdcOptions, Principal, PrincipalName};

use crate::context::RequestContext;
use crate::etype::{self, Negotiation, Purpose, SelectionMode};
use crate::ticket::{self, EncodedReply};
use crate::{
    fast, policy, AccessPolicy, KdcConfig, KdcError, PacGenerator, PkinitBackend, PreauthRegistry, ProcessOutcome,
    RequestInfo,
};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    #[default]
    Received,
    ArmorUnwrapped,
    NamesResolved,
    ClientResolved,
    ServerResolved,
    EnctypeNegotiated,
    PreauthEvaluated,
    Authorized,
    ReplyBuilt,
    Encoded,
    ErrorReply,
}

impl ExchangeState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Received => "Received",
            Self::ArmorUnwrapped => "ArmorUnwrapped",
            Self::NamesResolved => "NamesResolved",
            Self::ClientResolved => "ClientResolved",
            Self::ServerResolved => "ServerResolved",
            Self::EnctypeNegotiated => "EnctypeNegotiated",
            Self::PreauthEvaluated => "PreauthEvaluated",
            Self::Authorized => "Authorized",
            Self::ReplyBuilt => "ReplyBuilt",
            Self::Encoded => "Encoded",
            Self::ErrorReply => "ErrorReply",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Encoded | Self::ErrorReply)
    }
}

/// Why processing stopped before a reply was encoded.
enum Halt {
    /// The database says another KDC must service this principal.
    NotFoundHere,
    Error(KdcError),
}

impl From<KdcError> for Halt {
    fn from(error: KdcError) -> Self {
        Self::Error(error)
    }
}

/// Authentication Service of one realm.
///
/// Shared by every worker; processing a request only borrows it.
pub struct Kdc {
    pub(crate) config: KdcConfig,
    pub(crate) hdb: Arc<dyn Hdb>,
    pub(crate) crypto: Arc<dyn Crypto>,
    pub(crate) pac: Option<Arc<dyn PacGenerator>>,
    pub(crate) access: Option<Arc<dyn AccessPolicy>>,
    supported: Vec<Enctype>,
    registry: PreauthRegistry,
}

impl Kdc {
    pub fn new(config: KdcConfig, hdb: Arc<dyn Hdb>, crypto: Arc<dyn Crypto>) -> Self {
        let supported = config.policy.supported_enctypes();

        Self {
            config,
            hdb,
            crypto,
            pac: None,
            access: None,
            supported,
            registry: PreauthRegistry::new(None),
        }
    }

    #[must_use]
    pub fn with_pac_generator(mut self, generator: Arc<dyn PacGenerator>) -> Self {
        self.pac = Some(generator);
        self
    }

    #[must_use]
    pub fn with_access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(policy);
        self
    }

    /// Installs a PKINIT backend; it is only announced and used when `enable_pkinit` is set.
    #[must_use]
    pub fn with_pkinit(mut self, backend: Arc<dyn PkinitBackend>) -> Self {
        if self.config.policy.enable_pkinit {
            self.registry = PreauthRegistry::new(Some(backend));
        } else {
            debug!("PKINIT backend installed but PKINIT is disabled");
        }

        self
    }

    pub fn config(&self) -> &KdcConfig {
        &self.config
    }

    pub fn registry(&self) -> &PreauthRegistry {
        &self.registry
    }

    pub(crate) fn negotiation(&self, mode: SelectionMode) -> Negotiation<'_> {
        Negotiation {
            mode,
            supported: &self.supported,
            allow_weak: self.config.policy.allow_weak_enctypes,
            crypto: self.crypto.as_ref(),
        }
    }

    /// Processes one request and tells the transport what to send back.
    pub fn process(&self, request: &[u8], info: &RequestInfo) -> ProcessOutcome {
        let req = match AsReq::from_der(request) {
            Ok(req) => req,
            Err(e) => {
                debug!(peer = %info.peer_display(), len = request.len(), error = %e.report(), "Not an AS-REQ, ignoring");
                return ProcessOutcome::NoReply;
            }
        };

        let mut ctx = RequestContext::new(self, info, request, req);

        match self.run(&mut ctx) {
            Ok(reply) => {
                info!(
                    client = %ctx.client_display(),
                    server = %ctx.server_display(),
                    peer = %info.peer_display(),
                    reply_etype = %reply.reply_etype,
                    ticket_etype = %reply.ticket_etype,
                    "AS-REQ authentication succeeded"
                );

                ProcessOutcome::Reply(reply.bytes)
            }
            Err(Halt::NotFoundHere) => {
                info!(
                    client = %ctx.client_display(),
                    server = %ctx.server_display(),
                    peer = %info.peer_display(),
                    "Principal not serviced here, request must be proxied"
                );

                ProcessOutcome::NotFoundHere
            }
            Err(Halt::Error(error)) => {
                info!(
                    client = %ctx.client_display(),
                    server = %ctx.server_display(),
                    peer = %info.peer_display(),
                    code = %error.code,
                    e_text = error.e_text.as_deref(),
                    after = ctx.state.name(),
                    "AS-REQ failed"
                );

                ctx.transition(ExchangeState::ErrorReply);

                match fast::build_error(&ctx, error) {
                    Ok(bytes) => ProcessOutcome::Reply(bytes),
                    Err(e) => {
                        error!(error = %e, "Failed to encode KRB-ERROR");
                        ProcessOutcome::NoReply
                    }
                }
            }
        }
    }

    /// Error reply for failures detected before the request could be parsed (oversized or unframeable input).
    pub fn transport_error(&self, code: ErrorCode, info: &RequestInfo) -> Option<Vec<u8>> {
        let error = KrbError {
            stime: info.now,
            susec: info.usec,
            error_code: code,
            crealm: None,
            cname: None,
            realm: self.config.realm.clone(),
            sname: PrincipalName::krbtgt(&self.config.realm),
            e_text: None,
            e_data: None,
        };

        match error.to_der() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(%code, error = %e.report(), "Failed to encode transport-level KRB-ERROR");
                None
            }
        }
    }

    fn run(&self, ctx: &mut RequestContext<'_>) -> Result<EncodedReply, Halt> {
        fast::unwrap_request(ctx)?;
        ctx.transition(ExchangeState::ArmorUnwrapped);

        resolve_names(ctx)?;
        ctx.transition(ExchangeState::NamesResolved);

        resolve_client(ctx)?;
        ctx.transition(ExchangeState::ClientResolved);

        resolve_server(ctx)?;
        ctx.transition(ExchangeState::ServerResolved);

        negotiate_session_etype(ctx)?;
        ctx.transition(ExchangeState::EnctypeNegotiated);

        self.registry.evaluate(ctx)?;
        self.hdb.auth_status(ctx.client()?, AuthStatus::Success);
        ctx.transition(ExchangeState::PreauthEvaluated);

        policy::check_access(ctx)?;

        let options = ctx.req.body.options;
        policy::check_kdc_options(options, self.config.policy.allow_anonymous)?;
        let option_flags = policy::ticket_option_flags(options, ctx.client()?, ctx.server()?)?;

        let peer = ctx.info.peer.map(|peer| peer.ip());
        if !policy::check_addresses(&self.config.policy, ctx.req.body.addresses.as_deref(), peer) {
            info!(client = %ctx.client_display(), peer = %ctx.info.peer_display(), "Bad address list requested");
            return Err(kdc_err!(ErrorCode::BADADDR, "Bad address list in requested").into());
        }

        ctx.transition(ExchangeState::Authorized);

        let draft = ticket::build(ctx, option_flags)?;
        ctx.transition(ExchangeState::ReplyBuilt);

        let reply = ticket::encode(ctx, draft)?;
        ctx.transition(ExchangeState::Encoded);

        Ok(reply)
    }
}

fn resolve_names(ctx: &mut RequestContext<'_>) -> Result<(), KdcError> {
    let body = &ctx.req.body;

    let Some(sname) = &body.sname else {
        return Err(kdc_err!(ErrorCode::GENERIC, "No server in request"));
    };
    let server_name = Principal::new(sname.clone(), body.realm.clone());

    let Some(cname) = &body.cname else {
        ctx.server_name = Some(server_name);
        return Err(kdc_err!(ErrorCode::GENERIC, "No client in request"));
    };
    let client_name = Principal::new(cname.clone(), body.realm.clone());

    let anonymous_option = body.options.contains(KdcOptions::REQUEST_ANONYMOUS);
    let anonymous_name = client_name.name.is_anonymous();

    ctx.server_name = Some(server_name);
    ctx.client_name = Some(client_name);

    if anonymous_name && !anonymous_option {
        info!(client = %ctx.client_display(), "Anonymous client name without the anonymous option");
        return Err(kdc_err!(ErrorCode::C_PRINCIPAL_UNKNOWN));
    }

    if anonymous_option && !anonymous_name {
        info!(client = %ctx.client_display(), "Anonymous ticket requested for a named client");
        return Err(kdc_err!(ErrorCode::C_PRINCIPAL_UNKNOWN));
    }

    debug!(client = %ctx.client_display(), server = %ctx.server_display(), "AS-REQ");

    Ok(())
}

fn resolve_client(ctx: &mut RequestContext<'_>) -> Result<(), Halt> {
    let Some(name) = &ctx.client_name else {
        return Err(KdcError::internal("client lookup", &"client name not resolved").into());
    };

    let mut flags = FetchFlags::CLIENT;
    if ctx.req.body.options.contains(KdcOptions::CANONICALIZE) {
        flags |= FetchFlags::CANONICALIZE;
    }

    match ctx.kdc.hdb.fetch(name, flags) {
        Ok(FetchOutcome::Found(entry)) => {
            ctx.client = Some(*entry);
            Ok(())
        }
        Ok(FetchOutcome::NotFoundHere) => Err(Halt::NotFoundHere),
        Ok(FetchOutcome::WrongRealm { canonical }) => {
            info!(client = %name, realm = %canonical, "Client belongs to another realm");
            ctx.referral_realm = Some(canonical);
            Err(kdc_err!(ErrorCode::WRONG_REALM).into())
        }
        Ok(FetchOutcome::NotFound) => {
            info!(client = %name, "UNKNOWN -- client");
            Err(kdc_err!(ErrorCode::C_PRINCIPAL_UNKNOWN).into())
        }
        Err(e) => {
            warn!(client = %name, error = %e.report(), "Client lookup failed");
            Err(kdc_err!(ErrorCode::C_PRINCIPAL_UNKNOWN).into())
        }
    }
}

fn resolve_server(ctx: &mut RequestContext<'_>) -> Result<(), Halt> {
    let Some(name) = &ctx.server_name else {
        return Err(KdcError::internal("server lookup", &"server name not resolved").into());
    };

    match ctx.kdc.hdb.fetch(name, FetchFlags::SERVER | FetchFlags::KRBTGT) {
        Ok(FetchOutcome::Found(entry)) => {
            ctx.server = Some(*entry);
            Ok(())
        }
        Ok(FetchOutcome::NotFoundHere) => Err(Halt::NotFoundHere),
        Ok(outcome) => {
            info!(server = %name, ?outcome, "UNKNOWN -- server");
            Err(kdc_err!(ErrorCode::S_PRINCIPAL_UNKNOWN).into())
        }
        Err(e) => {
            warn!(server = %name, error = %e.report(), "Server lookup failed");
            Err(kdc_err!(ErrorCode::S_PRINCIPAL_UNKNOWN).into())
        }
    }
}

/// Session key enctype, from the keys of the service the ticket is for.
fn negotiate_session_etype(ctx: &mut RequestContext<'_>) -> Result<(), KdcError> {
    let policy = &ctx.kdc.config.policy;
    let server = ctx.server()?;

    let use_strongest = if server.principal.name.is_krbtgt() {
        policy.tgt_use_strongest_session_key
    } else {
        policy.svc_use_strongest_session_key
    };

    let negotiation = ctx.kdc.negotiation(SelectionMode::from_strongest(use_strongest));

    let choice = etype::find_etype(&negotiation, server, &ctx.req.body.etypes, Purpose::SessionKey).map_err(|e| {
        info!(
            client = %ctx.client_display(),
            server = %server.principal,
            requested = ?ctx.req.body.etypes,
            "No common session enctype"
        );
        e
    })?;

    let session_etype = choice.etype;
    debug!(etype = %session_etype, "Session enctype");
    ctx.session_etype = Some(session_etype);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use ironkdc_crypto::PickyCrypto;
    use ironkdc_hdb::MemoryHdb;
    use ironkdc_pdu::constants::key_usage;
    use ironkdc_pdu::data::{decode_etype_info2, decode_method_data, PaEncTsEnc};
    use ironkdc_pdu::messages::{AsRep, EncAsRepPart, KdcReqBody};
    use ironkdc_pdu::{EncryptionKey, KerberosTime, NameType, PaData, PaDataType, TicketFlags};
    use pretty_assertions::assert_eq;

    use super::*;

    const AES256: Enctype = Enctype::AES256_CTS_HMAC_SHA1_96;
    const NOW: KerberosTime = KerberosTime(1_700_000_000);

    const DATABASE: &str = r#"
not_found_here = ["rodc@EXAMPLE.COM"]

[[principal]]
name = "alice@EXAMPLE.COM"
password = "alice-password"
flags = ["client", "forwardable"]
max_life_secs = 36000

[[principal]]
name = "krbtgt/EXAMPLE.COM@EXAMPLE.COM"
password = "krbtgt-secret"
flags = ["server"]
max_life_secs = 86400
kvno = 2
"#;

    fn kdc(configure: impl FnOnce(&mut KdcConfig)) -> Kdc {
        let mut config = KdcConfig::new("EXAMPLE.COM");
        configure(&mut config);

        let hdb = MemoryHdb::from_toml(DATABASE, &PickyCrypto).unwrap();
        Kdc::new(config, Arc::new(hdb), Arc::new(PickyCrypto))
    }

    fn info() -> RequestInfo {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 50_000);
        RequestInfo::new(Some(peer), false).at(NOW)
    }

    fn body(client: &str) -> KdcReqBody {
        KdcReqBody {
            options: KdcOptions::empty(),
            cname: Some(PrincipalName::new(NameType::PRINCIPAL, [client])),
            realm: "EXAMPLE.COM".to_owned(),
            sname: Some(PrincipalName::krbtgt("EXAMPLE.COM")),
            from: None,
            till: KerberosTime(NOW.0 + 10 * 3600),
            rtime: None,
            nonce: 0x1234_5678,
            etypes: vec![AES256, Enctype::AES128_CTS_HMAC_SHA1_96],
            addresses: None,
            enc_authorization_data: None,
            additional_tickets: Vec::new(),
        }
    }

    fn alice_key() -> EncryptionKey {
        PickyCrypto
            .string_to_key(AES256, b"alice-password", b"EXAMPLE.COMalice")
            .unwrap()
    }

    fn enc_timestamp(key: &EncryptionKey, timestamp: KerberosTime) -> PaData {
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

    fn request(padata: Vec<PaData>, body: KdcReqBody) -> Vec<u8> {
        AsReq::new(padata, body).unwrap().to_der().unwrap()
    }

    fn reply(outcome: ProcessOutcome) -> Vec<u8> {
        match outcome {
            ProcessOutcome::Reply(bytes) => bytes,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    fn krb_error(outcome: ProcessOutcome) -> KrbError {
        KrbError::from_der(&reply(outcome)).unwrap()
    }

    #[test]
    fn preauth_required_announces_methods_and_cookie() {
        let kdc = kdc(|_| {});
        let error = krb_error(kdc.process(&request(Vec::new(), body("alice")), &info()));

        assert_eq!(error.error_code, ErrorCode::PREAUTH_REQUIRED);
        assert_eq!(error.crealm.as_deref(), Some("EXAMPLE.COM"));
        assert_eq!(error.realm, "EXAMPLE.COM");

        let method_data = decode_method_data(&error.e_data.unwrap()).unwrap();
        let types = method_data.iter().map(|pa| pa.padata_type).collect::<Vec<_>>();
        assert_eq!(
            types,
            [
                PaDataType::ENC_TIMESTAMP,
                PaDataType::ENCRYPTED_CHALLENGE,
                PaDataType::FX_FAST,
                PaDataType::ETYPE_INFO2,
                PaDataType::FX_COOKIE,
            ]
        );

        let etype_info2 = decode_etype_info2(&method_data[3].value).unwrap();
        assert_eq!(etype_info2[0].etype, AES256);
        assert_eq!(etype_info2[0].salt, None);
    }

    #[test]
    fn enc_timestamp_yields_ticket() {
        let kdc = kdc(|_| {});
        let raw = request(vec![enc_timestamp(&alice_key(), NOW)], body("alice"));
        let rep = AsRep::from_der(&reply(kdc.process(&raw, &info()))).unwrap();

        assert_eq!(rep.crealm, "EXAMPLE.COM");
        assert_eq!(rep.cname.components, ["alice"]);
        assert_eq!(rep.ticket.enc_part.kvno, Some(2));
        assert_eq!(rep.enc_part.kvno, Some(1));

        let plaintext = PickyCrypto
            .open(&alice_key(), key_usage::AS_REP_ENC_PART, &rep.enc_part)
            .unwrap();
        let enc_part = EncAsRepPart::from_der(&plaintext).unwrap();

        assert_eq!(enc_part.nonce, 0x1234_5678);
        assert_eq!(enc_part.authtime, NOW);
        // Requested ten hours, the client may only have ten hours, the krbtgt a day.
        assert_eq!(enc_part.endtime, KerberosTime(NOW.0 + 36000));
        assert!(enc_part
            .flags
            .contains(TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT | TicketFlags::ENC_PA_REP));
        assert!(!enc_part.flags.contains(TicketFlags::FORWARDABLE));
        assert_eq!(enc_part.key.etype, AES256);
    }

    #[test]
    fn skewed_timestamp_has_no_e_text() {
        let kdc = kdc(|_| {});
        let raw = request(vec![enc_timestamp(&alice_key(), KerberosTime(NOW.0 - 1000))], body("alice"));

        let error = krb_error(kdc.process(&raw, &info()));

        assert_eq!(error.error_code, ErrorCode::SKEW);
        assert_eq!(error.e_text, None);
    }

    #[test]
    fn wrong_password_fails_preauth() {
        let kdc = kdc(|_| {});
        let wrong = PickyCrypto
            .string_to_key(AES256, b"not-the-password", b"EXAMPLE.COMalice")
            .unwrap();

        let error = krb_error(kdc.process(&request(vec![enc_timestamp(&wrong, NOW)], body("alice")), &info()));

        assert_eq!(error.error_code, ErrorCode::PREAUTH_FAILED);
    }

    #[test]
    fn unknown_client() {
        let kdc = kdc(|_| {});
        let error = krb_error(kdc.process(&request(Vec::new(), body("mallory")), &info()));

        assert_eq!(error.error_code, ErrorCode::C_PRINCIPAL_UNKNOWN);
        assert_eq!(error.cname.unwrap().components, ["mallory"]);
    }

    #[test]
    fn not_found_here_is_not_answered() {
        let kdc = kdc(|_| {});
        assert_eq!(
            kdc.process(&request(Vec::new(), body("rodc")), &info()),
            ProcessOutcome::NotFoundHere
        );
    }

    #[test]
    fn garbage_is_not_answered() {
        let kdc = kdc(|_| {});
        assert_eq!(kdc.process(b"\x6c\x03\x02\x01\x05", &info()), ProcessOutcome::NoReply);
    }

    #[test]
    fn forwardable_denied_by_server_flags() {
        let kdc = kdc(|_| {});
        let mut body = body("alice");
        body.options = KdcOptions::FORWARDABLE;

        // Alice may be forwarded, the krbtgt entry does not allow it.
        let raw = request(vec![enc_timestamp(&alice_key(), NOW)], body);
        let error = krb_error(kdc.process(&raw, &info()));

        assert_eq!(error.error_code, ErrorCode::POLICY);
        assert_eq!(error.e_text.as_deref(), Some("Ticket may not be forwardable"));
    }

    #[test]
    fn oversized_datagram_reply() {
        let kdc = kdc(|config| config.max_datagram_reply_length = 100);
        let info = RequestInfo {
            datagram: true,
            ..info()
        };

        let raw = request(vec![enc_timestamp(&alice_key(), NOW)], body("alice"));
        let error = krb_error(kdc.process(&raw, &info));

        assert_eq!(error.error_code, ErrorCode::RESPONSE_TOO_BIG);
        assert_eq!(error.e_text.as_deref(), Some("Reply packet too large"));
    }

    #[test]
    fn transport_error_names_the_realm() {
        let kdc = kdc(|_| {});
        let error = KrbError::from_der(&kdc.transport_error(ErrorCode::FIELD_TOOLONG, &info()).unwrap()).unwrap();

        assert_eq!(error.error_code, ErrorCode::FIELD_TOOLONG);
        assert_eq!(error.sname, PrincipalName::krbtgt("EXAMPLE.COM"));
        assert_eq!(error.stime, NOW);
    }

    #[test]
    fn state_names() {
        assert_eq!(ExchangeState::default().name(), "Received");
        assert!(ExchangeState::ErrorReply.is_terminal());
        assert!(!ExchangeState::Authorized.is_terminal());
    }
}
