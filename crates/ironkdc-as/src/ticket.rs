//! Ticket construction and AS-REP encoding.

use core::mem;

use ironkdc_hdb::{HdbEntry, HdbKey};
use ironkdc_pdu::authz::{encode_signed_path_data, if_relevant, signed_path};
use ironkdc_pdu::constants::{ad_types, key_usage, lr_types, transited_types, well_known};
use ironkdc_pdu::data::{decode_pac_request, find_padata, AuthorizationDataEntry, LastReqEntry};
use ironkdc_pdu::messages::{AsRep, EncAsRepPart, EncTicketPart, KdcReqBody, Ticket, TransitedEncoding};
use ironkdc_pdu::{Enctype, ErrorCode, KdcOptions, KerberosTime, PaData, PaDataType, PrincipalName, TicketFlags};

use crate::context::RequestContext;
use crate::etype::{self, SelectionMode};
use crate::{fast, KdcError, KdcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TicketTimes {
    pub(crate) starttime: Option<KerberosTime>,
    pub(crate) endtime: KerberosTime,
    pub(crate) renew_till: Option<KerberosTime>,
    /// POSTDATED, INVALID and RENEWABLE, as decided by the requested times.
    pub(crate) flags: TicketFlags,
}

fn or_max(time: Option<KerberosTime>) -> KerberosTime {
    match time {
        Some(time) if time != KerberosTime::EPOCH => time,
        _ => KerberosTime::MAX,
    }
}

fn clip(start: KerberosTime, end: KerberosTime, max_secs: Option<i64>) -> KerberosTime {
    match max_secs {
        Some(max_secs) => start.saturating_add((end.seconds().saturating_sub(start.seconds())).min(max_secs)),
        None => end,
    }
}

/// Start, end and renew-till of the ticket, clipped by both entries' maximum lifetimes.
pub(crate) fn ticket_times(body: &KdcReqBody, client: &HdbEntry, server: &HdbEntry, now: KerberosTime) -> TicketTimes {
    let mut flags = TicketFlags::empty();
    let mut start = now;
    let mut starttime = None;

    if let (true, Some(from)) = (body.options.contains(KdcOptions::POSTDATED), body.from) {
        start = from;
        starttime = Some(from);
        flags |= TicketFlags::INVALID | TicketFlags::POSTDATED;
    }

    let till = or_max(Some(body.till));
    let endtime = clip(start, clip(start, till, client.max_life), server.max_life);

    let mut renewable = body.options.contains(KdcOptions::RENEWABLE);
    let mut rtime = body.rtime;

    if body.options.contains(KdcOptions::RENEWABLE_OK) && endtime < till {
        renewable = true;
        rtime = Some(rtime.unwrap_or(KerberosTime::EPOCH).max(till));
    }

    let mut renew_till = None;

    if renewable {
        if let Some(rtime) = rtime {
            let limit = clip(start, clip(start, or_max(Some(rtime)), client.max_renew), server.max_renew);
            renew_till = Some(limit);
            flags |= TicketFlags::RENEWABLE;
        }
    }

    TicketTimes {
        starttime,
        endtime,
        renew_till,
        flags,
    }
}

/// Password and account expiry hints; a lone LR_NONE entry when neither applies.
pub(crate) fn last_req(client: &HdbEntry, now: KerberosTime, warn_secs: i64) -> Vec<LastReqEntry> {
    let mut entries = Vec::with_capacity(2);

    if let Some(pw_end) = client.pw_end {
        if warn_secs == 0 || now.saturating_add(warn_secs) >= pw_end {
            entries.push(LastReqEntry {
                lr_type: lr_types::PW_EXPTIME,
                value: pw_end,
            });
        }
    }

    if let Some(valid_end) = client.valid_end {
        entries.push(LastReqEntry {
            lr_type: lr_types::ACCT_EXPTIME,
            value: valid_end,
        });
    }

    if entries.is_empty() {
        entries.push(LastReqEntry {
            lr_type: lr_types::NONE,
            value: KerberosTime::EPOCH,
        });
    }

    entries
}

pub(crate) fn key_expiration(client: &HdbEntry) -> Option<KerberosTime> {
    match (client.valid_end, client.pw_end) {
        (Some(valid_end), Some(pw_end)) => Some(valid_end.min(pw_end)),
        (valid_end, pw_end) => valid_end.or(pw_end),
    }
}

/// Both encrypted parts, ready to be sealed.
pub(crate) struct ReplyDraft {
    ticket_realm: String,
    ticket_sname: PrincipalName,
    crealm: String,
    cname: PrincipalName,
    server_key: HdbKey,
    enc_ticket: EncTicketPart,
    enc_rep: EncAsRepPart,
}

pub(crate) struct EncodedReply {
    pub(crate) bytes: Vec<u8>,
    pub(crate) reply_etype: Enctype,
    pub(crate) ticket_etype: Enctype,
}

fn pac_requested(padata: &[PaData]) -> bool {
    let mut start = 0;

    match find_padata(padata, &mut start, PaDataType::PAC_REQUEST) {
        Some(pa) => decode_pac_request(&pa.value).unwrap_or(true),
        None => true,
    }
}

fn authorization_data(
    ctx: &RequestContext<'_>,
    client: &HdbEntry,
    server: &HdbEntry,
    server_key: &HdbKey,
    authtime: KerberosTime,
) -> KdcResult<Vec<AuthorizationDataEntry>> {
    let mut entries = Vec::new();

    if let Some(generator) = &ctx.kdc.pac {
        if pac_requested(&ctx.req.padata) {
            match generator.generate(client, &server_key.key, authtime) {
                Ok(Some(pac)) => {
                    entries.push(if_relevant(&[AuthorizationDataEntry::new(ad_types::WIN2K_PAC, pac)])?);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(client = %client.principal, %error, "PAC generation failed, issuing ticket without PAC");
                }
            }
        }
    }

    if server.principal.name.is_krbtgt() {
        let data = encode_signed_path_data(Some(&client.principal), authtime)?;
        let checksum = ctx
            .kdc
            .crypto
            .checksum(&server_key.key, key_usage::KRB5_SIGNEDPATH, &data)?;

        entries.push(if_relevant(&[signed_path(server_key.key.etype, &checksum)?])?);
    }

    Ok(entries)
}

/// Fills in the ticket and the encrypted reply part from the resolved entries and the request.
pub(crate) fn build(ctx: &mut RequestContext<'_>, option_flags: TicketFlags) -> KdcResult<ReplyDraft> {
    let Some(reply_key) = &ctx.reply_key else {
        return Err(kdc_err!(ErrorCode::CLIENT_NOTYET, "Client have no reply key"));
    };

    let session_etype = ctx
        .session_etype
        .ok_or_else(|| KdcError::internal("reply", &"session enctype not negotiated"))?;

    let kdc = ctx.kdc;
    let client = ctx.client()?;
    let server = ctx.server()?;
    let body = &ctx.req.body;
    let now = ctx.info.now;

    let server_key = etype::preferred_key(&kdc.negotiation(SelectionMode::StrongestKey), server)?.clone();

    let crealm = if client.principal.name.is_anonymous() {
        well_known::ANONYMOUS_REALM.to_owned()
    } else {
        client.principal.realm.clone()
    };
    let cname = client.principal.name.clone();

    let mut ticket_sname = server.principal.name.clone();
    if let Some(requested) = &body.sname {
        if requested.has_simple_name_type() {
            ticket_sname.name_type = requested.name_type;
        }
    }

    let times = ticket_times(body, client, server, now);

    let mut flags = TicketFlags::INITIAL | TicketFlags::ENC_PA_REP | option_flags | times.flags;

    if ctx.pre_authenticated {
        flags |= TicketFlags::PRE_AUTHENT;
    }

    if ctx.is_anonymous_request() {
        flags |= TicketFlags::ANONYMOUS;
    }

    let session_key = kdc.crypto.random_key(session_etype)?;

    let mut encrypted_pa_data = Vec::new();
    let mut start = 0;
    if find_padata(&ctx.req.padata, &mut start, PaDataType::REQ_ENC_PA_REP).is_some() {
        let checksum = kdc.crypto.checksum(reply_key, key_usage::AS_REQ, ctx.raw)?;
        encrypted_pa_data.push(PaData::new(PaDataType::REQ_ENC_PA_REP, checksum.to_der()?));
        encrypted_pa_data.push(PaData::empty(PaDataType::FX_FAST));
    }

    let enc_ticket = EncTicketPart {
        flags,
        key: session_key.clone(),
        crealm: crealm.clone(),
        cname: cname.clone(),
        transited: TransitedEncoding {
            tr_type: transited_types::DOMAIN_X500_COMPRESS,
            contents: Vec::new(),
        },
        authtime: now,
        starttime: times.starttime,
        endtime: times.endtime,
        renew_till: times.renew_till,
        caddr: body.addresses.clone(),
        authorization_data: authorization_data(ctx, client, server, &server_key, now)?,
    };

    let enc_rep = EncAsRepPart {
        key: session_key.clone(),
        last_req: last_req(client, now, kdc.config.policy.kdc_warn_pwexpire_secs),
        nonce: body.nonce,
        key_expiration: key_expiration(client),
        flags,
        authtime: now,
        starttime: times.starttime,
        endtime: times.endtime,
        renew_till: times.renew_till,
        srealm: server.principal.realm.clone(),
        sname: ticket_sname.clone(),
        caddr: body.addresses.clone(),
        encrypted_pa_data,
    };

    let draft = ReplyDraft {
        ticket_realm: server.principal.realm.clone(),
        ticket_sname,
        crealm,
        cname,
        server_key,
        enc_ticket,
        enc_rep,
    };

    ctx.session_key = Some(session_key);

    Ok(draft)
}

/// Seals the ticket and the reply part, applies FAST armor and enforces the datagram size limit.
pub(crate) fn encode(ctx: &mut RequestContext<'_>, draft: ReplyDraft) -> KdcResult<EncodedReply> {
    let kdc = ctx.kdc;
    let client = ctx.client()?;
    let server = ctx.server()?;

    let reply_key = ctx
        .reply_key
        .as_ref()
        .ok_or_else(|| kdc_err!(ErrorCode::CLIENT_NOTYET, "Client have no reply key"))?;

    if ctx.session_key.is_none() {
        return Err(KdcError::internal("reply", &"session key not generated"));
    }

    debug!(
        client = %client.principal,
        authtime = draft.enc_ticket.authtime.seconds(),
        starttime = draft.enc_ticket.starttime.map(KerberosTime::seconds),
        endtime = draft.enc_ticket.endtime.seconds(),
        renew_till = draft.enc_ticket.renew_till.map(KerberosTime::seconds),
        "AS-REQ ticket times"
    );

    let ticket_enc_part = kdc.crypto.seal(
        &draft.server_key.key,
        key_usage::TICKET,
        &draft.enc_ticket.to_der()?,
        Some(server.kvno),
    )?;

    let enc_part = kdc.crypto.seal(
        reply_key,
        key_usage::AS_REP_ENC_PART,
        &draft.enc_rep.to_der()?,
        Some(client.kvno),
    )?;

    let mut rep = AsRep {
        padata: mem::take(&mut ctx.outpadata),
        crealm: draft.crealm.clone(),
        cname: draft.cname.clone(),
        ticket: Ticket {
            realm: draft.ticket_realm,
            sname: draft.ticket_sname,
            enc_part: ticket_enc_part,
        },
        enc_part,
    };

    fast::armor_reply(ctx, &mut rep, &draft.crealm, &draft.cname)?;

    let bytes = rep.to_der()?;

    if ctx.info.datagram && bytes.len() > kdc.config.max_datagram_reply_length {
        debug!(
            len = bytes.len(),
            max = kdc.config.max_datagram_reply_length,
            "Reply too large for a datagram"
        );
        return Err(kdc_err!(ErrorCode::RESPONSE_TOO_BIG, "Reply packet too large"));
    }

    Ok(EncodedReply {
        bytes,
        reply_etype: reply_key.etype,
        ticket_etype: draft.server_key.key.etype,
    })
}

#[cfg(test)]
mod tests {
    use ironkdc_hdb::EntryFlags;
    use ironkdc_pdu::data::encode_pac_request;
    use ironkdc_pdu::NameType;
    use rstest::rstest;

    use super::*;

    const NOW: KerberosTime = KerberosTime(1_700_000_000);
    const HOUR: i64 = 3600;

    fn entry(name: &str, max_life: Option<i64>, max_renew: Option<i64>) -> HdbEntry {
        HdbEntry {
            principal: name.parse().unwrap(),
            kvno: 1,
            keys: Vec::new(),
            flags: EntryFlags::CLIENT | EntryFlags::SERVER,
            valid_start: None,
            valid_end: None,
            pw_end: None,
            max_life,
            max_renew,
        }
    }

    fn body(options: KdcOptions, till: KerberosTime, rtime: Option<KerberosTime>) -> KdcReqBody {
        KdcReqBody {
            options,
            cname: Some(PrincipalName::new(NameType::PRINCIPAL, ["alice"])),
            realm: "EXAMPLE.COM".to_owned(),
            sname: Some(PrincipalName::krbtgt("EXAMPLE.COM")),
            from: None,
            till,
            rtime,
            nonce: 42,
            etypes: vec![Enctype::AES256_CTS_HMAC_SHA1_96],
            addresses: None,
            enc_authorization_data: None,
            additional_tickets: Vec::new(),
        }
    }

    #[rstest]
    #[case::requested_is_shortest(Some(10 * HOUR), Some(8 * HOUR), NOW.0 + HOUR, NOW.0 + HOUR)]
    #[case::client_is_shortest(Some(2 * HOUR), Some(8 * HOUR), NOW.0 + 5 * HOUR, NOW.0 + 2 * HOUR)]
    #[case::server_is_shortest(Some(10 * HOUR), Some(3 * HOUR), NOW.0 + 5 * HOUR, NOW.0 + 3 * HOUR)]
    #[case::no_limits(None, None, NOW.0 + 5 * HOUR, NOW.0 + 5 * HOUR)]
    #[case::zero_till_means_forever(None, None, 0, KerberosTime::MAX.0)]
    fn endtime_is_the_minimum(
        #[case] client_life: Option<i64>,
        #[case] server_life: Option<i64>,
        #[case] till: i64,
        #[case] expected: i64,
    ) {
        let client = entry("alice@EXAMPLE.COM", client_life, None);
        let server = entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", server_life, None);

        let times = ticket_times(&body(KdcOptions::empty(), KerberosTime(till), None), &client, &server, NOW);

        assert_eq!(times.endtime, KerberosTime(expected));
        assert_eq!(times.starttime, None);
        assert_eq!(times.renew_till, None);
        assert!(times.flags.is_empty());
    }

    #[rstest]
    #[case::bounded_till(NOW.0 + 10 * HOUR, NOW.0 + 10 * HOUR)]
    #[case::zero_till_renews_up_to_the_limit(0, NOW.0 + 24 * HOUR)]
    fn renewable_ok_turns_into_renewable(#[case] till: i64, #[case] expected_renew_till: i64) {
        let client = entry("alice@EXAMPLE.COM", Some(HOUR), Some(7 * 24 * HOUR));
        let server = entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", None, Some(24 * HOUR));

        let times = ticket_times(
            &body(KdcOptions::RENEWABLE_OK, KerberosTime(till), None),
            &client,
            &server,
            NOW,
        );

        assert_eq!(times.endtime, KerberosTime(NOW.0 + HOUR));
        assert_eq!(times.renew_till, Some(KerberosTime(expected_renew_till)));
        assert_eq!(times.flags, TicketFlags::RENEWABLE);
    }

    #[test]
    fn renew_till_is_clipped() {
        let client = entry("alice@EXAMPLE.COM", None, Some(7 * 24 * HOUR));
        let server = entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", None, Some(24 * HOUR));

        let times = ticket_times(
            &body(KdcOptions::RENEWABLE, KerberosTime(NOW.0 + HOUR), Some(KerberosTime::EPOCH)),
            &client,
            &server,
            NOW,
        );

        assert_eq!(times.renew_till, Some(KerberosTime(NOW.0 + 24 * HOUR)));
    }

    #[test]
    fn postdated_ticket_starts_invalid() {
        let client = entry("alice@EXAMPLE.COM", Some(HOUR), None);
        let server = entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", None, None);
        let mut body = body(KdcOptions::POSTDATED, KerberosTime(NOW.0 + 10 * HOUR), None);
        body.from = Some(KerberosTime(NOW.0 + 2 * HOUR));

        let times = ticket_times(&body, &client, &server, NOW);

        assert_eq!(times.starttime, body.from);
        assert_eq!(times.endtime, KerberosTime(NOW.0 + 3 * HOUR));
        assert_eq!(times.flags, TicketFlags::INVALID | TicketFlags::POSTDATED);
    }

    #[test]
    fn last_req_defaults_to_none_entry() {
        let client = entry("alice@EXAMPLE.COM", None, None);

        assert_eq!(
            last_req(&client, NOW, 0),
            [LastReqEntry {
                lr_type: lr_types::NONE,
                value: KerberosTime::EPOCH
            }]
        );
        assert_eq!(key_expiration(&client), None);
    }

    #[test]
    fn last_req_reports_expiry() {
        let mut client = entry("alice@EXAMPLE.COM", None, None);
        client.pw_end = Some(KerberosTime(NOW.0 + 30 * 24 * HOUR));
        client.valid_end = Some(KerberosTime(NOW.0 + 10 * 24 * HOUR));

        let types = |entries: Vec<LastReqEntry>| entries.iter().map(|e| e.lr_type).collect::<Vec<_>>();

        // Password expiry is only announced inside the warning window.
        assert_eq!(types(last_req(&client, NOW, 7 * 24 * HOUR)), [lr_types::ACCT_EXPTIME]);
        assert_eq!(
            types(last_req(&client, NOW, 0)),
            [lr_types::PW_EXPTIME, lr_types::ACCT_EXPTIME]
        );
        assert_eq!(key_expiration(&client), client.valid_end);
    }

    #[test]
    fn pac_request_false_disables_pac() {
        let no_pac = PaData::new(PaDataType::PAC_REQUEST, encode_pac_request(false).unwrap());
        let garbage = PaData::new(PaDataType::PAC_REQUEST, vec![0xff]);

        assert!(!pac_requested(&[no_pac]));
        assert!(pac_requested(&[garbage]));
        assert!(pac_requested(&[]));
    }
}
