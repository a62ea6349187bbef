use ironkdc_hdb::HdbEntry;
use ironkdc_pdu::messages::AsReq;
use ironkdc_pdu::{EncryptionKey, Enctype, KerberosTime, PaData};

use crate::KdcResult;

/// Produces the signed PAC placed in issued tickets.
pub trait PacGenerator: Send + Sync {
    /// Returns the signed PAC bytes, or `None` when the client gets no PAC.
    fn generate(
        &self,
        client: &HdbEntry,
        server_key: &EncryptionKey,
        authtime: KerberosTime,
    ) -> KdcResult<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Fall back to the built-in flag and validity checks.
    NotHandled,
    Allowed,
    Denied(crate::KdcError),
}

/// Site-specific override of the built-in access check.
pub trait AccessPolicy: Send + Sync {
    fn check(&self, client: &HdbEntry, server: &HdbEntry, request: &AsReq) -> AccessDecision;
}

/// Result of a successful PKINIT exchange.
#[derive(Debug, Clone)]
pub struct PkinitReply {
    pub reply_key: EncryptionKey,
    /// PA-PK-AS-REP to return to the client.
    pub padata: PaData,
    /// Subject of the client certificate, for logging.
    pub client_cert: String,
}

/// Certificate-based preauthentication, delegated to an external implementation.
pub trait PkinitBackend: Send + Sync {
    fn validate(
        &self,
        client: &HdbEntry,
        request: &AsReq,
        padata: &PaData,
        session_etype: Enctype,
    ) -> KdcResult<PkinitReply>;
}
