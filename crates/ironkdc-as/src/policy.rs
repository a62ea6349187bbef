//! Access checks on the client and server entries, and on the options of the request.

use std::net::IpAddr;

use ironkdc_hdb::{EntryFlags, HdbEntry};
use ironkdc_pdu::constants::address_types;
use ironkdc_pdu::{ErrorCode, HostAddress, KdcOptions, KerberosTime, TicketFlags};

use crate::context::RequestContext;
use crate::{AccessDecision, KdcResult, PolicyConfig};

fn is_before(limit: Option<KerberosTime>, now: KerberosTime) -> bool {
    limit.is_some_and(|limit| limit < now)
}

fn is_after(limit: Option<KerberosTime>, now: KerberosTime) -> bool {
    limit.is_some_and(|limit| limit > now)
}

/// Built-in check that both entries may take part in an AS exchange at `now`.
pub fn check_flags(client: &HdbEntry, server: &HdbEntry, now: KerberosTime) -> KdcResult<()> {
    let client_name = &client.principal;
    let server_name = &server.principal;

    if client.flags.contains(EntryFlags::LOCKED_OUT) {
        info!(client = %client_name, "Client is locked out");
        return Err(kdc_err!(ErrorCode::POLICY));
    }

    if client.flags.contains(EntryFlags::INVALID) {
        info!(client = %client_name, "Client has invalid bit set");
        return Err(kdc_err!(ErrorCode::POLICY));
    }

    if !client.flags.contains(EntryFlags::CLIENT) {
        info!(client = %client_name, "Principal may not act as client");
        return Err(kdc_err!(ErrorCode::POLICY));
    }

    if is_after(client.valid_start, now) {
        info!(client = %client_name, "Client not yet valid");
        return Err(kdc_err!(ErrorCode::CLIENT_NOTYET));
    }

    if is_before(client.valid_end, now) {
        info!(client = %client_name, "Client expired");
        return Err(kdc_err!(ErrorCode::NAME_EXP));
    }

    // The password change service stays reachable with an expired password.
    if !server.flags.contains(EntryFlags::CHANGE_PW) {
        if client.flags.contains(EntryFlags::REQUIRE_PWCHANGE) {
            info!(client = %client_name, "Client's key must be changed");
            return Err(kdc_err!(ErrorCode::KEY_EXPIRED));
        }

        if is_before(client.pw_end, now) {
            info!(client = %client_name, "Client's key has expired");
            return Err(kdc_err!(ErrorCode::KEY_EXPIRED));
        }
    }

    if server.flags.contains(EntryFlags::LOCKED_OUT) {
        info!(server = %server_name, "Server locked out");
        return Err(kdc_err!(ErrorCode::POLICY));
    }

    if server.flags.contains(EntryFlags::INVALID) {
        info!(server = %server_name, "Server has invalid flag set");
        return Err(kdc_err!(ErrorCode::POLICY));
    }

    if !server.flags.contains(EntryFlags::SERVER) {
        info!(server = %server_name, "Principal may not act as server");
        return Err(kdc_err!(ErrorCode::POLICY));
    }

    if is_after(server.valid_start, now) {
        info!(server = %server_name, "Server not yet valid");
        return Err(kdc_err!(ErrorCode::SERVICE_NOTYET));
    }

    if is_before(server.valid_end, now) {
        info!(server = %server_name, "Server expired");
        return Err(kdc_err!(ErrorCode::SERVICE_EXP));
    }

    if is_before(server.pw_end, now) {
        info!(server = %server_name, "Server's key has expired");
        return Err(kdc_err!(ErrorCode::KEY_EXPIRED));
    }

    Ok(())
}

/// Consults the access policy plugin, falling back to [`check_flags`] when it does not decide.
pub(crate) fn check_access(ctx: &RequestContext<'_>) -> KdcResult<()> {
    let client = ctx.client()?;
    let server = ctx.server()?;

    let decision = match &ctx.kdc.access {
        Some(policy) => policy.check(client, server, &ctx.req),
        None => AccessDecision::NotHandled,
    };

    match decision {
        AccessDecision::Allowed => Ok(()),
        AccessDecision::Denied(error) => {
            info!(client = %client.principal, server = %server.principal, %error, "Access denied by policy plugin");
            Err(error)
        }
        AccessDecision::NotHandled => check_flags(client, server, ctx.info.now),
    }
}

/// Options that only make sense in a TGS exchange, and anonymous requests when they are disabled.
pub fn check_kdc_options(options: KdcOptions, allow_anonymous: bool) -> KdcResult<()> {
    let tgs_only = KdcOptions::RENEW
        | KdcOptions::VALIDATE
        | KdcOptions::PROXY
        | KdcOptions::FORWARDED
        | KdcOptions::ENC_TKT_IN_SKEY;

    if options.intersects(tgs_only) || (options.contains(KdcOptions::REQUEST_ANONYMOUS) && !allow_anonymous) {
        return Err(kdc_err!(ErrorCode::BADOPTION, "Bad KDC options"));
    }

    Ok(())
}

/// Forwardable, proxiable and may-postdate ticket flags, each granted only when both entries allow it.
pub fn ticket_option_flags(options: KdcOptions, client: &HdbEntry, server: &HdbEntry) -> KdcResult<TicketFlags> {
    let rules = [
        (
            KdcOptions::FORWARDABLE,
            EntryFlags::FORWARDABLE,
            TicketFlags::FORWARDABLE,
            "forwardable",
        ),
        (
            KdcOptions::PROXIABLE,
            EntryFlags::PROXIABLE,
            TicketFlags::PROXIABLE,
            "proxiable",
        ),
        (
            KdcOptions::ALLOW_POSTDATE,
            EntryFlags::POSTDATE,
            TicketFlags::MAY_POSTDATE,
            "postdate",
        ),
    ];

    let mut flags = TicketFlags::empty();

    for (option, entry_flag, ticket_flag, what) in rules {
        if !options.contains(option) {
            continue;
        }

        if !(client.flags.contains(entry_flag) && server.flags.contains(entry_flag)) {
            return Err(kdc_err!(ErrorCode::POLICY, "Ticket may not be {what}"));
        }

        flags |= ticket_flag;
    }

    Ok(flags)
}

/// Host address of the peer, the way it appears in a request's address list.
pub fn peer_address(peer: IpAddr) -> HostAddress {
    match peer.to_canonical() {
        IpAddr::V4(addr) => HostAddress {
            addr_type: address_types::INET,
            address: addr.octets().to_vec(),
        },
        IpAddr::V6(addr) => HostAddress {
            addr_type: address_types::INET6,
            address: addr.octets().to_vec(),
        },
    }
}

/// Whether a ticket may be issued for `addresses` to a client connecting from `peer`.
pub fn check_addresses(policy: &PolicyConfig, addresses: Option<&[HostAddress]>, peer: Option<IpAddr>) -> bool {
    if !policy.check_ticket_addresses {
        return true;
    }

    let Some(addresses) = addresses else {
        return policy.allow_null_ticket_addresses;
    };

    // Windows clients send only their NetBIOS name.
    if addresses
        .iter()
        .all(|address| address.addr_type == address_types::NETBIOS)
    {
        return policy.allow_null_ticket_addresses;
    }

    let Some(peer) = peer else {
        return false;
    };

    addresses.contains(&peer_address(peer))
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use rstest::rstest;

    use super::*;

    fn entry(name: &str, flags: EntryFlags) -> HdbEntry {
        HdbEntry {
            principal: name.parse().unwrap(),
            kvno: 1,
            keys: Vec::new(),
            flags,
            valid_start: None,
            valid_end: None,
            pw_end: None,
            max_life: None,
            max_renew: None,
        }
    }

    fn client() -> HdbEntry {
        entry("alice@EXAMPLE.COM", EntryFlags::CLIENT)
    }

    fn server() -> HdbEntry {
        entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", EntryFlags::SERVER)
    }

    const NOW: KerberosTime = KerberosTime(1_000_000);

    #[rstest]
    #[case::locked_out(|c: &mut HdbEntry| c.flags |= EntryFlags::LOCKED_OUT, ErrorCode::POLICY)]
    #[case::invalid(|c: &mut HdbEntry| c.flags |= EntryFlags::INVALID, ErrorCode::POLICY)]
    #[case::not_a_client(|c: &mut HdbEntry| c.flags = EntryFlags::SERVER, ErrorCode::POLICY)]
    #[case::not_yet_valid(|c: &mut HdbEntry| c.valid_start = Some(KerberosTime(NOW.0 + 1)), ErrorCode::CLIENT_NOTYET)]
    #[case::expired(|c: &mut HdbEntry| c.valid_end = Some(KerberosTime(NOW.0 - 1)), ErrorCode::NAME_EXP)]
    #[case::must_change_password(|c: &mut HdbEntry| c.flags |= EntryFlags::REQUIRE_PWCHANGE, ErrorCode::KEY_EXPIRED)]
    #[case::password_expired(|c: &mut HdbEntry| c.pw_end = Some(KerberosTime(NOW.0 - 1)), ErrorCode::KEY_EXPIRED)]
    fn client_checks(#[case] tweak: fn(&mut HdbEntry), #[case] expected: ErrorCode) {
        let mut client = client();
        tweak(&mut client);

        assert_eq!(check_flags(&client, &server(), NOW).unwrap_err().code, expected);
    }

    #[rstest]
    #[case::locked_out(|s: &mut HdbEntry| s.flags |= EntryFlags::LOCKED_OUT, ErrorCode::POLICY)]
    #[case::not_a_server(|s: &mut HdbEntry| s.flags = EntryFlags::CLIENT, ErrorCode::POLICY)]
    #[case::not_yet_valid(|s: &mut HdbEntry| s.valid_start = Some(KerberosTime(NOW.0 + 1)), ErrorCode::SERVICE_NOTYET)]
    #[case::expired(|s: &mut HdbEntry| s.valid_end = Some(KerberosTime(NOW.0 - 1)), ErrorCode::SERVICE_EXP)]
    #[case::password_expired(|s: &mut HdbEntry| s.pw_end = Some(KerberosTime(NOW.0 - 1)), ErrorCode::KEY_EXPIRED)]
    fn server_checks(#[case] tweak: fn(&mut HdbEntry), #[case] expected: ErrorCode) {
        let mut server = server();
        tweak(&mut server);

        assert_eq!(check_flags(&client(), &server, NOW).unwrap_err().code, expected);
    }

    #[test]
    fn expired_password_may_still_reach_kadmin_changepw() {
        let mut client = client();
        client.pw_end = Some(KerberosTime(NOW.0 - 1));
        client.flags |= EntryFlags::REQUIRE_PWCHANGE;

        let changepw = entry(
            "kadmin/changepw@EXAMPLE.COM",
            EntryFlags::SERVER | EntryFlags::CHANGE_PW,
        );

        check_flags(&client, &changepw, NOW).unwrap();
    }

    #[test]
    fn as_req_required_flag_is_not_checked() {
        let server = entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", EntryFlags::SERVER | EntryFlags::INITIAL);
        check_flags(&client(), &server, NOW).unwrap();
    }

    #[rstest]
    #[case(KdcOptions::RENEW)]
    #[case(KdcOptions::VALIDATE)]
    #[case(KdcOptions::PROXY)]
    #[case(KdcOptions::FORWARDED)]
    #[case(KdcOptions::ENC_TKT_IN_SKEY)]
    #[case(KdcOptions::REQUEST_ANONYMOUS)]
    fn bad_options(#[case] options: KdcOptions) {
        let err = check_kdc_options(options | KdcOptions::FORWARDABLE, false).unwrap_err();
        assert_eq!(err.to_string(), "BADOPTION: Bad KDC options");
    }

    #[test]
    fn anonymous_allowed_by_policy() {
        check_kdc_options(KdcOptions::REQUEST_ANONYMOUS, true).unwrap();
    }

    #[test]
    fn forwardable_needs_both_entries() {
        let mut client = client();
        let mut server = server();
        client.flags |= EntryFlags::FORWARDABLE;

        let err = ticket_option_flags(KdcOptions::FORWARDABLE, &client, &server).unwrap_err();
        assert_eq!(err.to_string(), "POLICY: Ticket may not be forwardable");

        server.flags |= EntryFlags::FORWARDABLE;
        let flags = ticket_option_flags(KdcOptions::FORWARDABLE | KdcOptions::RENEWABLE, &client, &server).unwrap();
        assert_eq!(flags, TicketFlags::FORWARDABLE);
    }

    fn inet(octets: [u8; 4]) -> HostAddress {
        HostAddress {
            addr_type: address_types::INET,
            address: octets.to_vec(),
        }
    }

    #[test]
    fn address_checks() {
        let policy = PolicyConfig::default();
        let peer = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));
        let netbios = HostAddress {
            addr_type: address_types::NETBIOS,
            address: b"WORKSTATION     ".to_vec(),
        };

        assert!(check_addresses(&policy, None, peer));
        assert!(check_addresses(&policy, Some(&[netbios.clone()]), peer));
        assert!(check_addresses(&policy, Some(&[netbios, inet([192, 0, 2, 7])]), peer));
        assert!(!check_addresses(&policy, Some(&[inet([192, 0, 2, 8])]), peer));
        assert!(!check_addresses(&policy, Some(&[inet([192, 0, 2, 7])]), None));

        let strict = PolicyConfig {
            allow_null_ticket_addresses: false,
            ..PolicyConfig::default()
        };
        assert!(!check_addresses(&strict, None, peer));

        let unchecked = PolicyConfig {
            check_ticket_addresses: false,
            ..PolicyConfig::default()
        };
        assert!(check_addresses(&unchecked, Some(&[inet([192, 0, 2, 8])]), peer));
    }

    #[test]
    fn mapped_ipv6_peer_matches_inet_address() {
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 0, 2, 7).to_ipv6_mapped());
        assert_eq!(peer_address(mapped), inet([192, 0, 2, 7]));

        let v6 = peer_address(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(v6.addr_type, address_types::INET6);
        assert_eq!(v6.address.len(), 16);
    }
}
