use ironkdc_pdu::Enctype;
use serde::{Deserialize, Serialize};

/// Realm policy knobs, the `[policy]` table of the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub require_preauth: bool,
    pub check_ticket_addresses: bool,
    pub allow_null_ticket_addresses: bool,
    pub allow_anonymous: bool,
    pub max_skew_secs: i64,
    pub tgt_use_strongest_session_key: bool,
    pub svc_use_strongest_session_key: bool,
    pub preauth_use_strongest_session_key: bool,
    pub allow_weak_enctypes: bool,
    /// Enctypes this KDC issues keys for, strongest first.
    pub supported_enctypes: Vec<i32>,
    /// Warn about password expiry this many seconds ahead; 0 always warns.
    pub kdc_warn_pwexpire_secs: i64,
    pub enable_pkinit: bool,
    /// Omit the client name and realm from unarmored error replies.
    pub hide_client_names_in_errors: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_preauth: true,
            check_ticket_addresses: true,
            allow_null_ticket_addresses: true,
            allow_anonymous: false,
            max_skew_secs: 300,
            tgt_use_strongest_session_key: false,
            svc_use_strongest_session_key: false,
            preauth_use_strongest_session_key: false,
            allow_weak_enctypes: false,
            supported_enctypes: vec![
                Enctype::AES256_CTS_HMAC_SHA1_96.0,
                Enctype::AES128_CTS_HMAC_SHA1_96.0,
                Enctype::DES3_CBC_SHA1.0,
            ],
            kdc_warn_pwexpire_secs: 0,
            enable_pkinit: false,
            hide_client_names_in_errors: false,
        }
    }
}

impl PolicyConfig {
    pub fn supported_enctypes(&self) -> Vec<Enctype> {
        self.supported_enctypes.iter().copied().map(Enctype).collect()
    }
}

/// Everything the AS exchange needs to know about the realm it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcConfig {
    /// Default realm, used for transport-level errors that precede any request parsing.
    pub realm: String,
    pub policy: PolicyConfig,
    pub max_datagram_reply_length: usize,
}

impl KdcConfig {
    pub const DEFAULT_MAX_DATAGRAM_REPLY_LENGTH: usize = 1400;

    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            policy: PolicyConfig::default(),
            max_datagram_reply_length: Self::DEFAULT_MAX_DATAGRAM_REPLY_LENGTH,
        }
    }
}
