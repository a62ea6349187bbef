use core::fmt;

use ironkdc_crypto::CryptoError;
use ironkdc_hdb::HdbError;
use ironkdc_pdu::{ErrorCode, PaData, PduError};

pub type KdcResult<T> = Result<T, KdcError>;

/// A Kerberos protocol failure, turned into a KRB-ERROR by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcError {
    pub code: ErrorCode,
    pub e_text: Option<String>,
    /// Extra padata for the error's METHOD-DATA (announced mechanisms, ETYPE-INFO).
    pub padata: Vec<PaData>,
}

impl KdcError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            e_text: None,
            padata: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_text(mut self, e_text: impl Into<String>) -> Self {
        self.e_text = Some(e_text.into());
        self
    }

    #[must_use]
    pub fn with_padata(mut self, padata: Vec<PaData>) -> Self {
        self.padata = padata;
        self
    }

    /// A collaborator broke its contract while handling a well-formed request.
    pub fn internal(context: &'static str, source: &dyn fmt::Display) -> Self {
        error!(context, error = %source, "KDC internal error");
        Self::new(ErrorCode::GENERIC).with_text("KDC internal error")
    }
}

impl fmt::Display for KdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;

        if let Some(e_text) = &self.e_text {
            write!(f, ": {e_text}")?;
        }

        Ok(())
    }
}

impl std::error::Error for KdcError {}

impl From<PduError> for KdcError {
    fn from(error: PduError) -> Self {
        Self::internal("encoding", &error.report())
    }
}

impl From<CryptoError> for KdcError {
    fn from(error: CryptoError) -> Self {
        Self::internal("crypto", &error.report())
    }
}

impl From<HdbError> for KdcError {
    fn from(error: HdbError) -> Self {
        Self::internal("database", &error.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_e_text() {
        assert_eq!(
            kdc_err!(ErrorCode::POLICY, "Ticket may not be {}", "forwardable").to_string(),
            "POLICY: Ticket may not be forwardable"
        );
        assert_eq!(kdc_err!(ErrorCode::SKEW).to_string(), "SKEW");
    }
}
