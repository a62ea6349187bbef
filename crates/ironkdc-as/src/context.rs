use ironkdc_hdb::HdbEntry;
use ironkdc_pdu::fast::FastState;
use ironkdc_pdu::messages::AsReq;
use ironkdc_pdu::{EncryptionKey, Enctype, ErrorCode, FastOptions, KdcOptions, KerberosTime, PaData, Principal};

use crate::{ExchangeState, Kdc, KdcError, KdcResult, RequestInfo};

/// FAST continuation state of one request.
#[derive(Debug, Default)]
pub(crate) struct FastContext {
    pub(crate) state: FastState,
    pub(crate) options: Option<FastOptions>,
    /// Set once the armor has been verified; dropped (and wiped) with the context.
    pub(crate) armor_key: Option<EncryptionKey>,
}

impl FastContext {
    pub(crate) fn is_armored(&self) -> bool {
        self.armor_key.is_some()
    }
}

/// Everything known about one AS-REQ while it is being processed.
///
/// Key material is held in `EncryptionKey`s and wiped when the context is dropped.
pub(crate) struct RequestContext<'a> {
    pub(crate) kdc: &'a Kdc,
    pub(crate) info: &'a RequestInfo,
    /// Request bytes exactly as received.
    pub(crate) raw: &'a [u8],
    /// The request, with body and padata replaced by the inner FAST request once unwrapped.
    pub(crate) req: AsReq,
    pub(crate) client_name: Option<Principal>,
    pub(crate) server_name: Option<Principal>,
    pub(crate) client: Option<HdbEntry>,
    pub(crate) server: Option<HdbEntry>,
    pub(crate) session_etype: Option<Enctype>,
    pub(crate) reply_key: Option<EncryptionKey>,
    pub(crate) session_key: Option<EncryptionKey>,
    /// Padata for the AS-REP.
    pub(crate) outpadata: Vec<PaData>,
    pub(crate) fast: FastContext,
    pub(crate) pre_authenticated: bool,
    /// Realm to report as crealm in the error, when the database pointed elsewhere.
    pub(crate) referral_realm: Option<String>,
    pub(crate) state: ExchangeState,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(kdc: &'a Kdc, info: &'a RequestInfo, raw: &'a [u8], req: AsReq) -> Self {
        Self {
            kdc,
            info,
            raw,
            req,
            client_name: None,
            server_name: None,
            client: None,
            server: None,
            session_etype: None,
            reply_key: None,
            session_key: None,
            outpadata: Vec::new(),
            fast: FastContext::default(),
            pre_authenticated: false,
            referral_realm: None,
            state: ExchangeState::Received,
        }
    }

    pub(crate) fn transition(&mut self, next: ExchangeState) {
        debug!(as_exchange.state = next.name(), "Transition");
        self.state = next;
    }

    pub(crate) fn is_anonymous_request(&self) -> bool {
        self.req.body.options.contains(KdcOptions::REQUEST_ANONYMOUS)
    }

    /// Whether a client-supplied time is within the allowed clock skew of now.
    pub(crate) fn within_skew(&self, time: KerberosTime) -> bool {
        self.info.now.abs_diff(time) <= self.kdc.config.policy.max_skew_secs.unsigned_abs()
    }

    pub(crate) fn client(&self) -> KdcResult<&HdbEntry> {
        self.client
            .as_ref()
            .ok_or_else(|| KdcError::internal("request context", &"client entry not resolved"))
    }

    pub(crate) fn server(&self) -> KdcResult<&HdbEntry> {
        self.server
            .as_ref()
            .ok_or_else(|| KdcError::internal("request context", &"server entry not resolved"))
    }

    pub(crate) fn armor_key(&self) -> KdcResult<&EncryptionKey> {
        self.fast
            .armor_key
            .as_ref()
            .ok_or_else(|| kdc_err!(ErrorCode::PREAUTH_FAILED, "Request is not armored"))
    }

    pub(crate) fn client_display(&self) -> String {
        match &self.client_name {
            Some(name) => name.to_string(),
            None => "<unknown client>".to_owned(),
        }
    }

    pub(crate) fn server_display(&self) -> String {
        match &self.server_name {
            Some(name) => name.to_string(),
            None => "<unknown server>".to_owned(),
        }
    }
}
