//! Preauthentication mechanisms and the registry that dispatches to them.

use core::fmt;
use std::sync::Arc;

use ironkdc_hdb::{AuthStatus, EntryFlags, HdbKey};
use ironkdc_pdu::constants::key_usage;
use ironkdc_pdu::data::{find_padata, PaEncTsEnc};
use ironkdc_pdu::{EncryptedData, EncryptionKey, ErrorCode, PaData, PaDataType};

use crate::context::RequestContext;
use crate::etype::{self, Purpose, SelectionMode};
use crate::{KdcError, KdcResult, PkinitBackend};

const CHALLENGE_ARMOR_PEPPER: &[u8] = b"clientchallengearmor";
const CHALLENGE_LONGTERM_PEPPER: &[u8] = b"challengelongterm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreauthFlag {
    /// Advertised in PREAUTH_REQUIRED replies.
    Announce,
    /// Only usable inside a FAST-armored request.
    FastOnly,
}

/// Checks one padata item and, on success, records the reply key in the request context.
pub(crate) trait Validate: Send + Sync {
    fn validate(&self, ctx: &mut RequestContext<'_>, padata: &PaData) -> KdcResult<()>;
}

pub struct PreauthMethod {
    padata_type: PaDataType,
    name: &'static str,
    flags: Vec<PreauthFlag>,
    validator: Option<Box<dyn Validate>>,
}

impl PreauthMethod {
    fn placeholder(padata_type: PaDataType, flags: &[PreauthFlag]) -> Self {
        Self {
            padata_type,
            name: padata_type.name().unwrap_or("unknown"),
            flags: flags.to_vec(),
            validator: None,
        }
    }

    fn validated_by(padata_type: PaDataType, flags: &[PreauthFlag], validator: Box<dyn Validate>) -> Self {
        Self {
            validator: Some(validator),
            ..Self::placeholder(padata_type, flags)
        }
    }

    pub fn padata_type(&self) -> PaDataType {
        self.padata_type
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn flags(&self) -> &[PreauthFlag] {
        &self.flags
    }

    pub fn has_flag(&self, flag: PreauthFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }
}

impl fmt::Debug for PreauthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreauthMethod")
            .field("padata_type", &self.padata_type)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Preauthentication mechanisms in evaluation order.
#[derive(Debug)]
pub struct PreauthRegistry {
    methods: Vec<PreauthMethod>,
}

impl PreauthRegistry {
    /// Builds the registry; PKINIT is announced and validated only when a backend is given.
    pub fn new(pkinit: Option<Arc<dyn PkinitBackend>>) -> Self {
        use PreauthFlag::{Announce, FastOnly};

        let pkinit_flags: &[PreauthFlag] = if pkinit.is_some() { &[Announce] } else { &[] };

        let mut methods = Vec::with_capacity(10);

        match pkinit {
            Some(backend) => {
                methods.push(PreauthMethod::validated_by(
                    PaDataType::PK_AS_REQ,
                    pkinit_flags,
                    Box::new(Pkinit(Arc::clone(&backend))),
                ));
                methods.push(PreauthMethod::validated_by(
                    PaDataType::PK_AS_REQ_WIN,
                    pkinit_flags,
                    Box::new(Pkinit(backend)),
                ));
            }
            None => {
                methods.push(PreauthMethod::placeholder(PaDataType::PK_AS_REQ, pkinit_flags));
                methods.push(PreauthMethod::placeholder(PaDataType::PK_AS_REQ_WIN, pkinit_flags));
            }
        }

        methods.push(PreauthMethod::placeholder(PaDataType::PKINIT_KX, pkinit_flags));
        methods.push(PreauthMethod::placeholder(PaDataType::OCSP, &[]));
        methods.push(PreauthMethod::validated_by(
            PaDataType::ENC_TIMESTAMP,
            &[Announce],
            Box::new(EncTimestamp),
        ));
        methods.push(PreauthMethod::validated_by(
            PaDataType::ENCRYPTED_CHALLENGE,
            &[Announce, FastOnly],
            Box::new(EncChallenge),
        ));
        methods.push(PreauthMethod::placeholder(PaDataType::REQ_ENC_PA_REP, &[]));
        methods.push(PreauthMethod::placeholder(PaDataType::FX_FAST, &[Announce]));
        methods.push(PreauthMethod::placeholder(PaDataType::FX_ERROR, &[]));
        methods.push(PreauthMethod::placeholder(PaDataType::FX_COOKIE, &[]));

        Self { methods }
    }

    pub fn methods(&self) -> &[PreauthMethod] {
        &self.methods
    }

    /// Empty padata for every announced mechanism.
    pub fn announced(&self) -> Vec<PaData> {
        self.methods
            .iter()
            .filter(|method| method.has_flag(PreauthFlag::Announce))
            .map(|method| PaData::empty(method.padata_type))
            .collect()
    }

    /// Runs the first mechanism whose padata the client sent, or works out what to tell the client.
    ///
    /// On return the reply key is set, unless an error asks the client to preauthenticate.
    pub(crate) fn evaluate(&self, ctx: &mut RequestContext<'_>) -> KdcResult<()> {
        if !ctx.req.padata.is_empty() {
            debug!(patypes = %PatypeList(&ctx.req.padata), "Client sent patypes");

            let is_armored = ctx.fast.is_armored();

            for method in &self.methods {
                let Some(validator) = &method.validator else {
                    continue;
                };

                if !is_armored && method.has_flag(PreauthFlag::FastOnly) {
                    continue;
                }

                debug!(method = method.name, client = %ctx.client_display(), "Looking for pa-data");

                let mut start = 0;
                let Some(padata) = find_padata(&ctx.req.padata, &mut start, method.padata_type).cloned() else {
                    continue;
                };

                validator.validate(ctx, &padata)?;

                debug!(method = method.name, client = %ctx.client_display(), "Pre-authentication succeeded");
                ctx.pre_authenticated = true;

                return Ok(());
            }
        }

        self.without_preauth(ctx)
    }

    fn without_preauth(&self, ctx: &mut RequestContext<'_>) -> KdcResult<()> {
        let policy = &ctx.kdc.config.policy;
        let negotiation = ctx
            .kdc
            .negotiation(SelectionMode::from_strongest(policy.preauth_use_strongest_session_key));

        let client = ctx.client()?;
        let client_key = etype::find_etype(&negotiation, client, &ctx.req.body.etypes, Purpose::ClientKey)
            .ok()
            .and_then(|choice| choice.key)
            .cloned();

        let mut padata = self.announced();

        if let Some(key) = &client_key {
            padata.extend(etype::etype_info_padata(key)?);
        }

        let server = ctx.server()?;
        let require_preauth = policy.require_preauth
            || client.flags.contains(EntryFlags::REQUIRE_PREAUTH)
            || server.flags.contains(EntryFlags::REQUIRE_PREAUTH);

        if require_preauth || ctx.is_anonymous_request() {
            return Err(
                kdc_err!(ErrorCode::PREAUTH_REQUIRED, "Need to use PA-ENC-TIMESTAMP/PA-PK-AS-REQ")
                    .with_padata(padata),
            );
        }

        let Some(key) = client_key else {
            return Err(kdc_err!(ErrorCode::CLIENT_NOTYET, "Doesn't have a client key available").with_padata(padata));
        };

        ctx.reply_key = Some(key.key);

        Ok(())
    }
}

struct PatypeList<'a>(&'a [PaData]);

impl fmt::Display for PatypeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, padata) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }

            write!(f, "{}", padata.padata_type)?;
        }

        Ok(())
    }
}

fn salt_padata(key: &HdbKey) -> Option<PaData> {
    key.salt
        .as_ref()
        .map(|salt| PaData::new(PaDataType::PW_SALT, salt.clone()))
}

fn decode_encrypted_padata(ctx: &RequestContext<'_>, padata: &PaData) -> KdcResult<EncryptedData> {
    EncryptedData::from_der(&padata.value).map_err(|e| {
        debug!(client = %ctx.client_display(), error = %e.report(), "Failed to decode PA-DATA");
        kdc_err!(ErrorCode::BAD_INTEGRITY)
    })
}

fn check_skew(ctx: &RequestContext<'_>, timestamp: &PaEncTsEnc) -> KdcResult<()> {
    if ctx.within_skew(timestamp.timestamp) {
        return Ok(());
    }

    info!(
        client = %ctx.client_display(),
        client_time = timestamp.timestamp.seconds(),
        offset = ctx.info.now.abs_diff(timestamp.timestamp),
        max_skew = ctx.kdc.config.policy.max_skew_secs,
        "Too large time skew"
    );

    // Older clients retry with the KDC time from the error only when there is no e-text.
    Err(kdc_err!(ErrorCode::SKEW))
}

/// PA-ENC-TIMESTAMP: the current time encrypted under the client's long-term key.
struct EncTimestamp;

impl Validate for EncTimestamp {
    fn validate(&self, ctx: &mut RequestContext<'_>, padata: &PaData) -> KdcResult<()> {
        if ctx.is_anonymous_request() {
            return Err(kdc_err!(ErrorCode::BAD_INTEGRITY, "ENC-TS doesn't support anon"));
        }

        let enc_data = decode_encrypted_padata(ctx, padata)?;
        let kdc = ctx.kdc;
        let client = ctx.client()?;

        let mut candidates = client
            .keys_of(enc_data.etype)
            .filter(|key| !key.key.is_null())
            .peekable();

        if candidates.peek().is_none() {
            return Err(kdc_err!(ErrorCode::ETYPE_NOSUPP, "No key matching entype"));
        }

        let mut opened = None;

        for key in candidates {
            match kdc
                .crypto
                .open(&key.key, key_usage::AS_REQ_PA_ENC_TIMESTAMP, &enc_data)
            {
                Ok(plaintext) => {
                    opened = Some((key.clone(), plaintext));
                    break;
                }
                Err(e) => {
                    debug!(client = %ctx.client_display(), etype = %key.key.etype, error = %e.report(), "Failed to decrypt PA-DATA");
                }
            }
        }

        let Some((key, plaintext)) = opened else {
            kdc.hdb.auth_status(client, AuthStatus::WrongPassword);
            return Err(kdc_err!(ErrorCode::PREAUTH_FAILED));
        };

        let timestamp = PaEncTsEnc::from_der(&plaintext).map_err(|e| {
            debug!(client = %ctx.client_display(), error = %e.report(), "Failed to decode PA-ENC-TS-ENC");
            kdc_err!(ErrorCode::PREAUTH_FAILED)
        })?;

        check_skew(ctx, &timestamp)?;

        ctx.outpadata.extend(salt_padata(&key));
        ctx.reply_key = Some(key.key);

        Ok(())
    }
}

/// PA-ENCRYPTED-CHALLENGE (RFC 6113): the timestamp under a key bound to both the armor and the client key.
struct EncChallenge;

impl EncChallenge {
    fn challenge_key(ctx: &RequestContext<'_>, armor_key: &EncryptionKey, key: &HdbKey) -> Option<EncryptionKey> {
        match ctx
            .kdc
            .crypto
            .cf2(armor_key, &key.key, CHALLENGE_ARMOR_PEPPER, CHALLENGE_LONGTERM_PEPPER)
        {
            Ok(challenge_key) => Some(challenge_key),
            Err(e) => {
                debug!(etype = %key.key.etype, error = %e.report(), "Cannot derive challenge key");
                None
            }
        }
    }

    fn kdc_challenge(ctx: &RequestContext<'_>, challenge_key: &EncryptionKey) -> KdcResult<PaData> {
        let timestamp = PaEncTsEnc {
            timestamp: ctx.info.now,
            usec: Some(ctx.info.usec),
        };

        let enc_data = ctx.kdc.crypto.seal(
            challenge_key,
            key_usage::ENC_CHALLENGE_KDC,
            &timestamp.to_der()?,
            None,
        )?;

        Ok(PaData::new(PaDataType::ENCRYPTED_CHALLENGE, enc_data.to_der()?))
    }
}

impl Validate for EncChallenge {
    fn validate(&self, ctx: &mut RequestContext<'_>, padata: &PaData) -> KdcResult<()> {
        if ctx.is_anonymous_request() {
            debug!("ENC-CHAL doesn't support anon");
            return Err(kdc_err!(ErrorCode::BAD_INTEGRITY));
        }

        let enc_data = decode_encrypted_padata(ctx, padata)?;
        let armor_key = ctx.armor_key()?.clone();
        let kdc = ctx.kdc;
        let client = ctx.client()?;

        let mut invalid_password = false;
        let mut accepted = None;

        for key in client.keys.iter().filter(|key| !key.key.is_null()) {
            let Some(challenge_key) = Self::challenge_key(ctx, &armor_key, key) else {
                continue;
            };

            let plaintext = match kdc
                .crypto
                .open(&challenge_key, key_usage::ENC_CHALLENGE_CLIENT, &enc_data)
            {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    invalid_password = true;
                    debug!(client = %ctx.client_display(), etype = %key.key.etype, error = %e.report(), "Failed to decrypt ENC-CHAL");
                    continue;
                }
            };

            let Ok(timestamp) = PaEncTsEnc::from_der(&plaintext) else {
                debug!(client = %ctx.client_display(), "Failed to decode PA-ENC-TS-ENC");
                continue;
            };

            check_skew(ctx, &timestamp)?;

            accepted = Some((key.clone(), Self::kdc_challenge(ctx, &challenge_key)?));
            break;
        }

        let Some((key, kdc_challenge)) = accepted else {
            if invalid_password {
                kdc.hdb.auth_status(client, AuthStatus::WrongPassword);
            }

            return Err(kdc_err!(ErrorCode::PREAUTH_FAILED));
        };

        ctx.outpadata.push(kdc_challenge);
        ctx.outpadata.extend(salt_padata(&key));
        ctx.reply_key = Some(key.key);

        Ok(())
    }
}

/// PA-PK-AS-REQ, handed to the configured backend.
struct Pkinit(Arc<dyn PkinitBackend>);

impl Validate for Pkinit {
    fn validate(&self, ctx: &mut RequestContext<'_>, padata: &PaData) -> KdcResult<()> {
        let session_etype = ctx
            .session_etype
            .ok_or_else(|| KdcError::internal("pkinit", &"session enctype not negotiated"))?;

        let reply = self.0.validate(ctx.client()?, &ctx.req, padata, session_etype)?;

        info!(client = %ctx.client_display(), certificate = %reply.client_cert, "PKINIT pre-authentication succeeded");

        ctx.outpadata.push(reply.padata);
        ctx.reply_key = Some(reply.reply_key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    fn summary(registry: &PreauthRegistry) -> String {
        registry
            .methods()
            .iter()
            .map(|m| format!("{} {:?} validator={}\n", m.name(), m.flags(), m.has_validator()))
            .collect()
    }

    #[test]
    fn registry_without_pkinit() {
        expect![[r#"
            PK-INIT(ietf) [] validator=false
            PK-INIT(win2k) [] validator=false
            Anonymous PK-INIT [] validator=false
            OCSP [] validator=false
            ENC-TS [Announce] validator=true
            ENC-CHAL [Announce, FastOnly] validator=true
            REQ-ENC-PA-REP [] validator=false
            FX-FAST [Announce] validator=false
            FX-ERROR [] validator=false
            FX-COOKIE [] validator=false
        "#]]
        .assert_eq(&summary(&PreauthRegistry::new(None)));
    }

    #[test]
    fn announced_methods_carry_no_value() {
        let announced = PreauthRegistry::new(None).announced();
        let types = announced.iter().map(|pa| pa.padata_type).collect::<Vec<_>>();

        assert_eq!(
            types,
            [PaDataType::ENC_TIMESTAMP, PaDataType::ENCRYPTED_CHALLENGE, PaDataType::FX_FAST]
        );
        assert!(announced.iter().all(|pa| pa.value.is_empty()));
    }

    #[test]
    fn patype_list_display() {
        let padata = [
            PaData::empty(PaDataType::ENC_TIMESTAMP),
            PaData::empty(PaDataType::PAC_REQUEST),
            PaData::empty(PaDataType(4242)),
        ];

        assert_eq!(PatypeList(&padata).to_string(), "ENC-TS, PA-PAC-REQUEST, 4242");
    }
}
