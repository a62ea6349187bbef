//! Assigned numbers used by the AS exchange (RFC 4120, RFC 6113 and the MS-KILE additions).

use core::fmt;

macro_rules! code_type {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty) {
            $( $konst:ident = $value:expr, $display:literal; )*
        }
        $( impl { $($extra:tt)* } )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $repr);

        impl $name {
            $( pub const $konst: Self = Self($value); )*

            /// Returns the registered name, if this value is a known one.
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $( Self::$konst => Some($display), )*
                    _ => None,
                }
            }

            $( $($extra)* )?
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => write!(f, "{name}"),
                    None => write!(f, "{}", self.0),
                }
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

code_type! {
    /// Kerberos error code carried in KRB-ERROR
    ErrorCode(u32) {
        NONE = 0, "NONE";
        NAME_EXP = 1, "NAME_EXP";
        SERVICE_EXP = 2, "SERVICE_EXP";
        BAD_PVNO = 3, "BAD_PVNO";
        C_PRINCIPAL_UNKNOWN = 6, "C_PRINCIPAL_UNKNOWN";
        S_PRINCIPAL_UNKNOWN = 7, "S_PRINCIPAL_UNKNOWN";
        NULL_KEY = 9, "NULL_KEY";
        BADOPTION = 13, "BADOPTION";
        ETYPE_NOSUPP = 14, "ETYPE_NOSUPP";
        KEY_EXPIRED = 23, "KEY_EXPIRED";
        PREAUTH_FAILED = 24, "PREAUTH_FAILED";
        PREAUTH_REQUIRED = 25, "PREAUTH_REQUIRED";
        SERVER_NOMATCH = 26, "SERVER_NOMATCH";
        CLIENT_NOTYET = 21, "CLIENT_NOTYET";
        SERVICE_NOTYET = 22, "SERVICE_NOTYET";
        POLICY = 12, "POLICY";
        BAD_INTEGRITY = 31, "BAD_INTEGRITY";
        TKT_EXPIRED = 32, "TKT_EXPIRED";
        TKT_NYV = 33, "TKT_NYV";
        REPEAT = 34, "REPEAT";
        NOT_US = 35, "NOT_US";
        BADMATCH = 36, "BADMATCH";
        SKEW = 37, "SKEW";
        BADADDR = 38, "BADADDR";
        MODIFIED = 41, "MODIFIED";
        INAPP_CKSUM = 50, "INAPP_CKSUM";
        RESPONSE_TOO_BIG = 52, "RESPONSE_TOO_BIG";
        GENERIC = 60, "GENERIC";
        FIELD_TOOLONG = 61, "FIELD_TOOLONG";
        WRONG_REALM = 68, "WRONG_REALM";
        PREAUTH_EXPIRED = 90, "PREAUTH_EXPIRED";
        MORE_PREAUTH_DATA_REQUIRED = 91, "MORE_PREAUTH_DATA_REQUIRED";
        UNKNOWN_CRITICAL_FAST_OPTIONS = 93, "UNKNOWN_CRITICAL_FAST_OPTIONS";
    }
}

code_type! {
    /// PA-DATA type
    PaDataType(i32) {
        TGS_REQ = 1, "TGS-REQ";
        ENC_TIMESTAMP = 2, "ENC-TS";
        PW_SALT = 3, "PW-SALT";
        ETYPE_INFO = 11, "ETYPE-INFO";
        PK_AS_REQ_WIN = 15, "PK-INIT(win2k)";
        PK_AS_REQ = 16, "PK-INIT(ietf)";
        PK_AS_REP = 17, "PK-AS-REP";
        OCSP = 18, "OCSP";
        ETYPE_INFO2 = 19, "ETYPE-INFO2";
        PAC_REQUEST = 128, "PA-PAC-REQUEST";
        FX_COOKIE = 133, "FX-COOKIE";
        FX_FAST = 136, "FX-FAST";
        FX_ERROR = 137, "FX-ERROR";
        ENCRYPTED_CHALLENGE = 138, "ENC-CHAL";
        PKINIT_KX = 147, "Anonymous PK-INIT";
        REQ_ENC_PA_REP = 149, "REQ-ENC-PA-REP";
    }
}

code_type! {
    /// Encryption type
    Enctype(i32) {
        NULL = 0, "null";
        DES_CBC_CRC = 1, "des-cbc-crc";
        DES_CBC_MD4 = 2, "des-cbc-md4";
        DES_CBC_MD5 = 3, "des-cbc-md5";
        DES3_CBC_MD5 = 5, "des3-cbc-md5";
        OLD_DES3_CBC_SHA1 = 7, "old-des3-cbc-sha1";
        DES3_CBC_SHA1 = 16, "des3-cbc-sha1";
        AES128_CTS_HMAC_SHA1_96 = 17, "aes128-cts-hmac-sha1-96";
        AES256_CTS_HMAC_SHA1_96 = 18, "aes256-cts-hmac-sha1-96";
        ARCFOUR_HMAC_MD5 = 23, "arcfour-hmac-md5";
        ARCFOUR_HMAC_MD5_56 = 24, "arcfour-hmac-md5-56";
        ARCFOUR_HMAC_OLD = -128, "arcfour-hmac-old";
        ARCFOUR_HMAC_OLD_EXP = -135, "arcfour-hmac-old-exp";
        ARCFOUR_MD4 = -133, "arcfour-md4";
    }
    impl {
        /// Enctypes whose clients only understand ETYPE-INFO (not ETYPE-INFO2).
        pub fn is_older(self) -> bool {
            matches!(
                self,
                Self::DES_CBC_CRC
                    | Self::DES_CBC_MD4
                    | Self::DES_CBC_MD5
                    | Self::DES3_CBC_SHA1
                    | Self::ARCFOUR_HMAC_MD5
                    | Self::ARCFOUR_HMAC_MD5_56
                    | Self::ARCFOUR_MD4
                    | Self::ARCFOUR_HMAC_OLD
                    | Self::ARCFOUR_HMAC_OLD_EXP
            )
        }

        /// Single DES enctypes.
        pub fn is_weak(self) -> bool {
            matches!(self, Self::DES_CBC_CRC | Self::DES_CBC_MD4 | Self::DES_CBC_MD5)
        }

        /// AES enctypes use an iteration count in their string-to-key parameters.
        pub fn is_aes(self) -> bool {
            matches!(self, Self::AES128_CTS_HMAC_SHA1_96 | Self::AES256_CTS_HMAC_SHA1_96)
        }
    }
}

code_type! {
    /// Principal name type
    NameType(i32) {
        UNKNOWN = 0, "UNKNOWN";
        PRINCIPAL = 1, "PRINCIPAL";
        SRV_INST = 2, "SRV_INST";
        SRV_HST = 3, "SRV_HST";
        SRV_XHST = 4, "SRV_XHST";
        UID = 5, "UID";
        X500_PRINCIPAL = 6, "X500_PRINCIPAL";
        SMTP_NAME = 7, "SMTP_NAME";
        ENTERPRISE_PRINCIPAL = 10, "ENTERPRISE";
        WELLKNOWN = 11, "WELLKNOWN";
    }
}

/// Kerberos message types (`msg-type` field)
pub mod message_types {
    pub const AS_REQ: i64 = 10;
    pub const AS_REP: i64 = 11;
    pub const TGS_REQ: i64 = 12;
    pub const AP_REQ: i64 = 14;
    pub const KRB_ERROR: i64 = 30;
}

/// Protocol version number
pub const KRB5_PVNO: i64 = 5;

/// Key usage numbers
pub mod key_usage {
    pub const AS_REQ_PA_ENC_TIMESTAMP: i32 = 1;
    pub const TICKET: i32 = 2;
    pub const AS_REP_ENC_PART: i32 = 3;
    pub const AP_REQ_AUTH: i32 = 11;
    pub const FAST_REQ_CHKSUM: i32 = 50;
    pub const FAST_ENC: i32 = 51;
    pub const FAST_REP: i32 = 52;
    pub const FAST_FINISHED: i32 = 53;
    pub const ENC_CHALLENGE_CLIENT: i32 = 54;
    pub const ENC_CHALLENGE_KDC: i32 = 55;
    pub const AS_REQ: i32 = 56;
    pub const FAST_COOKIE: i32 = 1024;
    pub const KRB5_SIGNEDPATH: i32 = -21;
}

/// Authorization data types
pub mod ad_types {
    pub const IF_RELEVANT: i32 = 1;
    pub const WIN2K_PAC: i32 = 128;
    pub const SIGNTICKET: i32 = 512;
}

/// Last request types
pub mod lr_types {
    pub const NONE: i32 = 0;
    pub const PW_EXPTIME: i32 = 6;
    pub const ACCT_EXPTIME: i32 = 7;
}

/// Host address types
pub mod address_types {
    pub const INET: i32 = 2;
    pub const NETBIOS: i32 = 20;
    pub const INET6: i32 = 24;
}

/// FAST armor types
pub mod armor_types {
    pub const AP_REQUEST: i32 = 1;
}

/// Transited encoding types
pub mod transited_types {
    pub const DOMAIN_X500_COMPRESS: i32 = 1;
}

/// Well-known names
pub mod well_known {
    pub const KRBTGT: &str = "krbtgt";
    pub const WELLKNOWN: &str = "WELLKNOWN";
    pub const ANONYMOUS: &str = "ANONYMOUS";
    pub const ANONYMOUS_REALM: &str = "WELLKNOWN:ANONYMOUS";
    pub const FAST_COOKIE_NAME: &str = "org.h5l.fast-cookie";
    pub const FAST_COOKIE_REALM: &str = "WELLKNOWN:ORG.H5L";
    pub const KADMIN: &str = "kadmin";
    pub const CHANGEPW: &str = "changepw";
}
