//! Kerberos flag fields.
//!
//! Kerberos numbers BIT STRING bits from the most significant bit of the first octet,
//! so bit `n` of the wire encoding is `1 << (31 - n)` here.

use bitflags::bitflags;
use picky_asn1::bit_string::BitString;
use picky_krb::data_types::KerberosFlags;

const fn bit(n: u32) -> u32 {
    1 << (31 - n)
}

bitflags! {
    /// KDCOptions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KdcOptions: u32 {
        const FORWARDABLE = bit(1);
        const FORWARDED = bit(2);
        const PROXIABLE = bit(3);
        const PROXY = bit(4);
        const ALLOW_POSTDATE = bit(5);
        const POSTDATED = bit(6);
        const RENEWABLE = bit(8);
        const CNAME_IN_ADDL_TKT = bit(14);
        const CANONICALIZE = bit(15);
        const REQUEST_ANONYMOUS = bit(16);
        const DISABLE_TRANSITED_CHECK = bit(26);
        const RENEWABLE_OK = bit(27);
        const ENC_TKT_IN_SKEY = bit(28);
        const RENEW = bit(30);
        const VALIDATE = bit(31);

        const _ = !0;
    }
}

bitflags! {
    /// TicketFlags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TicketFlags: u32 {
        const FORWARDABLE = bit(1);
        const FORWARDED = bit(2);
        const PROXIABLE = bit(3);
        const PROXY = bit(4);
        const MAY_POSTDATE = bit(5);
        const POSTDATED = bit(6);
        const INVALID = bit(7);
        const RENEWABLE = bit(8);
        const INITIAL = bit(9);
        const PRE_AUTHENT = bit(10);
        const HW_AUTHENT = bit(11);
        const TRANSITED_POLICY_CHECKED = bit(12);
        const OK_AS_DELEGATE = bit(13);
        const ENC_PA_REP = bit(15);
        const ANONYMOUS = bit(16);
    }
}

bitflags! {
    /// FastOptions (RFC 6113 section 5.4.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FastOptions: u32 {
        const RESERVED = bit(0);
        const HIDE_CLIENT_NAMES = bit(1);
        const KDC_FOLLOW_REFERRALS = bit(16);

        const _ = !0;
    }
}

impl FastOptions {
    /// Critical bits 2 to 15. Bit 0 is reserved and bit 1 (hide-client-names) is implemented.
    pub const UNSUPPORTED_CRITICAL_MASK: u32 = 0x3FFF_0000;

    /// Critical bits this KDC does not implement; a non-zero result must fail the request.
    pub fn unsupported_critical(self) -> u32 {
        self.bits() & Self::UNSUPPORTED_CRITICAL_MASK
    }
}

pub(crate) fn to_kerberos_flags(bits: u32) -> KerberosFlags {
    KerberosFlags::from(BitString::with_bytes(bits.to_be_bytes().to_vec()))
}

pub(crate) fn from_kerberos_flags(flags: &KerberosFlags) -> u32 {
    let payload = flags.0.payload_view();
    let mut bytes = [0u8; 4];

    for (dst, src) in bytes.iter_mut().zip(payload) {
        *dst = *src;
    }

    u32::from_be_bytes(bytes)
}
