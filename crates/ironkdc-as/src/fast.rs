//! FAST (RFC 6113): armor verification, armored replies and errors, and the stateless FX-COOKIE.

use core::mem;

use ironkdc_crypto::Crypto;
use ironkdc_hdb::{FetchFlags, FetchOutcome, HdbEntry};
use ironkdc_pdu::constants::{armor_types, key_usage};
use ironkdc_pdu::data::{encode_method_data, find_padata};
use ironkdc_pdu::fast::{
    encode_fast_reply, FastArmoredReq, FastCookie, FastFinished, FastReq, FastResponse, FastState,
    FAST_COOKIE_VERSION,
};
use ironkdc_pdu::messages::{ApReq, AsRep, Authenticator, EncTicketPart, KrbError};
use ironkdc_pdu::{
    EncryptionKey, ErrorCode, KerberosTime, PaData, PaDataType, Principal, PrincipalName, TicketFlags,
};

use crate::context::RequestContext;
use crate::etype::{self, SelectionMode};
use crate::{Kdc, KdcError, KdcResult};

/// Lifetime of an issued cookie, in seconds.
pub const COOKIE_TTL_SECS: i64 = 180;

const SUBKEY_ARMOR_PEPPER: &[u8] = b"subkeyarmor";
const TICKET_ARMOR_PEPPER: &[u8] = b"ticketarmor";

/// Encrypts `state` into an FX-COOKIE value.
pub fn seal_cookie(crypto: &dyn Crypto, key: &EncryptionKey, state: &FastState) -> KdcResult<Vec<u8>> {
    let cookie = FastCookie {
        version: FAST_COOKIE_VERSION.to_vec(),
        cookie: crypto.seal(key, key_usage::FAST_COOKIE, &state.to_der()?, None)?,
    };

    Ok(cookie.to_der()?)
}

/// Decrypts an FX-COOKIE value and rejects it once `now` reaches its expiration.
pub fn open_cookie(crypto: &dyn Crypto, key: &EncryptionKey, value: &[u8], now: KerberosTime) -> KdcResult<FastState> {
    let cookie = FastCookie::from_der(value).map_err(|e| {
        debug!(error = %e.report(), "Failed to decode FX-COOKIE");
        kdc_err!(ErrorCode::PREAUTH_FAILED)
    })?;

    if cookie.version.as_slice() != FAST_COOKIE_VERSION.as_slice() {
        return Err(kdc_err!(ErrorCode::POLICY, "Unsupported FAST cookie version"));
    }

    let plaintext = crypto
        .open(key, key_usage::FAST_COOKIE, &cookie.cookie)
        .map_err(|e| {
            debug!(error = %e.report(), "Failed to decrypt FX-COOKIE");
            kdc_err!(ErrorCode::PREAUTH_FAILED)
        })?;

    let state = FastState::from_der(&plaintext).map_err(|e| {
        debug!(error = %e.report(), "Failed to decode KDCFastState");
        kdc_err!(ErrorCode::PREAUTH_FAILED)
    })?;

    if now >= state.expiration {
        return Err(kdc_err!(ErrorCode::POLICY, "Expired FAST cookie"));
    }

    Ok(state)
}

fn cookie_entry(kdc: &Kdc) -> KdcResult<Box<HdbEntry>> {
    match kdc.hdb.fetch(&Principal::fast_cookie(), FetchFlags::SERVER)? {
        FetchOutcome::Found(entry) => Ok(entry),
        outcome => {
            warn!(?outcome, "No FAST cookie key available");
            Err(kdc_err!(ErrorCode::GENERIC, "FAST cookie key unavailable"))
        }
    }
}

fn decode_cookie(ctx: &RequestContext<'_>, value: &[u8]) -> KdcResult<FastState> {
    let entry = cookie_entry(ctx.kdc)?;

    // Decrypt with whichever of our keys matches the cookie's enctype.
    let etype = FastCookie::from_der(value)
        .map(|cookie| cookie.cookie.etype)
        .map_err(|_| kdc_err!(ErrorCode::PREAUTH_FAILED))?;

    let key = entry
        .key_of(etype)
        .ok_or_else(|| kdc_err!(ErrorCode::PREAUTH_FAILED))?;

    open_cookie(ctx.kdc.crypto.as_ref(), &key.key, value, ctx.info.now)
}

/// FX-COOKIE carrying the current state of the conversation, valid for [`COOKIE_TTL_SECS`].
fn outgoing_cookie(ctx: &RequestContext<'_>) -> KdcResult<PaData> {
    let entry = cookie_entry(ctx.kdc)?;

    let key = etype::preferred_key(&ctx.kdc.negotiation(SelectionMode::StrongestKey), &entry)?;

    let state = FastState {
        expiration: ctx.info.now.saturating_add(COOKIE_TTL_SECS),
        ..ctx.fast.state.clone()
    };

    let value = seal_cookie(ctx.kdc.crypto.as_ref(), &key.key, &state)?;

    Ok(PaData::new(PaDataType::FX_COOKIE, value))
}

/// Decodes an inbound cookie and, when present, the FX-FAST armor, replacing the request body and padata.
pub(crate) fn unwrap_request(ctx: &mut RequestContext<'_>) -> KdcResult<()> {
    let mut cookie_decoded = false;

    let mut start = 0;
    if let Some(cookie) = find_padata(&ctx.req.padata, &mut start, PaDataType::FX_COOKIE).cloned() {
        ctx.fast.state = decode_cookie(ctx, &cookie.value)?;
        cookie_decoded = true;
    }

    let mut start = 0;
    let Some(fast) = find_padata(&ctx.req.padata, &mut start, PaDataType::FX_FAST).cloned() else {
        return Ok(());
    };

    let armored = FastArmoredReq::from_padata_value(&fast.value).map_err(|e| {
        debug!(error = %e.report(), "Failed to decode PA-FX-FAST-REQUEST");
        kdc_err!(ErrorCode::PREAUTH_FAILED)
    })?;

    let Some(armor) = &armored.armor else {
        return Err(kdc_err!(ErrorCode::PREAUTH_FAILED, "AS-REQ armor missing"));
    };

    if armor.armor_type != armor_types::AP_REQUEST {
        debug!(armor_type = armor.armor_type, "Unknown FAST armor type");
        return Err(kdc_err!(ErrorCode::PREAUTH_FAILED, "Unknown FAST armor type"));
    }

    let armor_key = verify_armor(ctx, &armor.value)?;

    // From here on, errors go back inside the armor.
    ctx.fast.armor_key = Some(armor_key.clone());
    let crypto = ctx.kdc.crypto.as_ref();

    crypto
        .verify_checksum(
            &armor_key,
            key_usage::FAST_REQ_CHKSUM,
            &ctx.req.body_der,
            &armored.req_checksum,
        )
        .map_err(|e| {
            debug!(error = %e.report(), "FAST request checksum mismatch");
            kdc_err!(ErrorCode::BAD_INTEGRITY)
        })?;

    let plaintext = crypto
        .open(&armor_key, key_usage::FAST_ENC, &armored.enc_fast_req)
        .map_err(|e| {
            debug!(error = %e.report(), "Failed to decrypt FAST request");
            kdc_err!(ErrorCode::BAD_INTEGRITY)
        })?;

    let inner = FastReq::from_der(&plaintext).map_err(|e| {
        debug!(error = %e.report(), "Failed to decode KrbFastReq");
        kdc_err!(ErrorCode::PREAUTH_FAILED)
    })?;

    let unsupported = inner.options.unsupported_critical();
    if unsupported != 0 {
        debug!(options = unsupported, "Unsupported critical FAST options");
        return Err(kdc_err!(ErrorCode::PREAUTH_FAILED, "Unsupported critical FAST options"));
    }

    // Outer padata other than the armor and cookie must not be honoured.
    ctx.req.body_der = inner.req_body.to_der()?;
    ctx.req.body = inner.req_body;
    ctx.req.padata = inner.padata;
    ctx.fast.options = Some(inner.options);

    if !cookie_decoded {
        let mut start = 0;
        if let Some(cookie) = find_padata(&ctx.req.padata, &mut start, PaDataType::FX_COOKIE).cloned() {
            ctx.fast.state = decode_cookie(ctx, &cookie.value)?;
        }
    }

    Ok(())
}

/// Verifies the AP-REQ armor and derives the armor key from its subkey and ticket session key.
fn verify_armor(ctx: &RequestContext<'_>, ap_req: &[u8]) -> KdcResult<EncryptionKey> {
    let kdc = ctx.kdc;

    let ap_req = ApReq::from_der(ap_req).map_err(|e| {
        debug!(error = %e.report(), "Failed to decode armor AP-REQ");
        kdc_err!(ErrorCode::PREAUTH_FAILED)
    })?;

    let armor_server = Principal::new(ap_req.ticket.sname.clone(), ap_req.ticket.realm.clone());

    let server = match kdc.hdb.fetch(&armor_server, FetchFlags::SERVER) {
        Ok(FetchOutcome::Found(entry)) => entry,
        _ => {
            debug!(server = %armor_server, "Armor ticket server not found");
            return Err(kdc_err!(ErrorCode::S_PRINCIPAL_UNKNOWN));
        }
    };

    let server_key = server
        .key_of(ap_req.ticket.enc_part.etype)
        .ok_or_else(|| kdc_err!(ErrorCode::ETYPE_NOSUPP))?;

    let ticket = kdc
        .crypto
        .open(&server_key.key, key_usage::TICKET, &ap_req.ticket.enc_part)
        .ok()
        .and_then(|plaintext| EncTicketPart::from_der(&plaintext).ok())
        .ok_or_else(|| kdc_err!(ErrorCode::BAD_INTEGRITY))?;

    let authenticator = kdc
        .crypto
        .open(&ticket.key, key_usage::AP_REQ_AUTH, &ap_req.authenticator)
        .ok()
        .and_then(|plaintext| Authenticator::from_der(&plaintext).ok())
        .ok_or_else(|| kdc_err!(ErrorCode::BAD_INTEGRITY))?;

    if authenticator.crealm != ticket.crealm || authenticator.cname.components != ticket.cname.components {
        return Err(kdc_err!(ErrorCode::BADMATCH));
    }

    let skew = kdc.config.policy.max_skew_secs;
    let now = ctx.info.now;

    if ticket.endtime.saturating_add(skew) < now {
        return Err(kdc_err!(ErrorCode::TKT_EXPIRED));
    }

    let starttime = ticket.starttime.unwrap_or(ticket.authtime);
    if ticket.flags.contains(TicketFlags::INVALID) || starttime.saturating_add(-skew) > now {
        return Err(kdc_err!(ErrorCode::TKT_NYV));
    }

    if !ctx.within_skew(authenticator.ctime) {
        return Err(kdc_err!(ErrorCode::SKEW));
    }

    let Some(subkey) = &authenticator.subkey else {
        return Err(kdc_err!(ErrorCode::PREAUTH_FAILED, "FAST armor without subkey"));
    };

    Ok(kdc
        .crypto
        .cf2(subkey, &ticket.key, SUBKEY_ARMOR_PEPPER, TICKET_ARMOR_PEPPER)?)
}

fn sealed_response(ctx: &RequestContext<'_>, armor_key: &EncryptionKey, response: &FastResponse) -> KdcResult<PaData> {
    let enc_fast_rep = ctx
        .kdc
        .crypto
        .seal(armor_key, key_usage::FAST_REP, &response.to_der()?, None)?;

    Ok(PaData::new(PaDataType::FX_FAST, encode_fast_reply(&enc_fast_rep)?))
}

/// Moves the reply padata into an armored KrbFastResponse bound to the ticket, and hides the client.
pub(crate) fn armor_reply(
    ctx: &RequestContext<'_>,
    rep: &mut AsRep,
    crealm: &str,
    cname: &PrincipalName,
) -> KdcResult<()> {
    let Some(armor_key) = &ctx.fast.armor_key else {
        return Ok(());
    };

    debug!(options = ?ctx.fast.options, "FAST armor protection");

    let ticket_checksum = ctx
        .kdc
        .crypto
        .checksum(armor_key, key_usage::FAST_FINISHED, &rep.ticket.to_der()?)?;

    let response = FastResponse {
        padata: mem::take(&mut rep.padata),
        strengthen_key: None,
        finished: Some(FastFinished {
            timestamp: ctx.info.now,
            usec: 0,
            crealm: crealm.to_owned(),
            cname: cname.clone(),
            ticket_checksum,
        }),
        nonce: ctx.req.body.nonce,
    };

    rep.padata = vec![sealed_response(ctx, armor_key, &response)?];
    rep.crealm = String::new();
    rep.cname = PrincipalName::empty();

    Ok(())
}

fn krb_error(ctx: &RequestContext<'_>, error: &KdcError, e_data: Option<Vec<u8>>, hide_client: bool) -> KrbError {
    let (realm, sname) = match &ctx.server_name {
        Some(server) => (server.realm.clone(), server.name.clone()),
        None => {
            let realm = if ctx.req.body.realm.is_empty() {
                ctx.kdc.config.realm.clone()
            } else {
                ctx.req.body.realm.clone()
            };
            let sname = ctx
                .req
                .body
                .sname
                .clone()
                .unwrap_or_else(|| PrincipalName::krbtgt(&realm));
            (realm, sname)
        }
    };

    let (crealm, cname) = if hide_client {
        (None, None)
    } else {
        let crealm = ctx
            .referral_realm
            .clone()
            .or_else(|| ctx.client_name.as_ref().map(|name| name.realm.clone()));
        (crealm, ctx.client_name.as_ref().map(|name| name.name.clone()))
    };

    KrbError {
        stime: ctx.info.now,
        susec: ctx.info.usec,
        error_code: error.code,
        crealm,
        cname,
        realm,
        sname,
        e_text: error.e_text.clone(),
        e_data,
    }
}

/// Encodes `error` as a KRB-ERROR, with a fresh cookie and FAST armor when the request was armored.
pub(crate) fn build_error(ctx: &RequestContext<'_>, mut error: KdcError) -> KdcResult<Vec<u8>> {
    let mut method_data = mem::take(&mut error.padata);

    match outgoing_cookie(ctx) {
        Ok(cookie) => method_data.push(cookie),
        Err(e) => warn!(error = %e, "Error reply goes out without FX-COOKIE"),
    }

    let mut outer_text = error.e_text.clone();
    let mut hide_client = ctx.kdc.config.policy.hide_client_names_in_errors;

    if let Some(armor_key) = &ctx.fast.armor_key {
        let inner = krb_error(ctx, &error, None, false);
        method_data.push(PaData::new(PaDataType::FX_ERROR, inner.to_der()?));

        let response = FastResponse {
            padata: mem::take(&mut method_data),
            strengthen_key: None,
            finished: None,
            nonce: ctx.req.body.nonce,
        };

        method_data.push(sealed_response(ctx, armor_key, &response)?);
        outer_text = None;
        hide_client = true;
    }

    let e_data = if method_data.is_empty() {
        None
    } else {
        Some(encode_method_data(&method_data)?)
    };

    let outer = KdcError {
        e_text: outer_text,
        ..error
    };

    Ok(krb_error(ctx, &outer, e_data, hide_client).to_der()?)
}
