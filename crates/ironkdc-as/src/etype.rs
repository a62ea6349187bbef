//! Enctype negotiation and the ETYPE-INFO hints sent with preauthentication errors.

use ironkdc_crypto::Crypto;
use ironkdc_hdb::{HdbEntry, HdbKey};
use ironkdc_pdu::data::{encode_etype_info, encode_etype_info2, EtypeInfo2Entry, EtypeInfoEntry};
use ironkdc_pdu::{Enctype, ErrorCode, PaData, PaDataType, Principal};

use crate::KdcResult;

/// Default PBKDF2 iteration count of the AES string-to-key functions.
const AES_DEFAULT_ITERATIONS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Walk the KDC's own list, strongest first, and keep the first enctype the client also offers.
    StrongestKey,
    /// Walk the client's list in order.
    ClientPreference,
}

impl SelectionMode {
    pub fn from_strongest(use_strongest: bool) -> Self {
        if use_strongest {
            Self::StrongestKey
        } else {
            Self::ClientPreference
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Choosing the session key enctype; only the enctype matters.
    SessionKey,
    /// Choosing the client's long-term key, preferring keys with the default salt.
    ClientKey,
}

/// KDC-side constraints of a negotiation.
#[derive(Clone, Copy)]
pub struct Negotiation<'a> {
    pub mode: SelectionMode,
    /// Enctypes the KDC supports, strongest first.
    pub supported: &'a [Enctype],
    pub allow_weak: bool,
    pub crypto: &'a dyn Crypto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtypeChoice<'e> {
    pub etype: Enctype,
    /// The principal's key of that enctype; `None` only for the single DES exception.
    pub key: Option<&'e HdbKey>,
}

/// Principals for which single DES stays available even when weak enctypes are disabled.
pub fn is_weak_exception(principal: &Principal, etype: Enctype) -> bool {
    principal.name.first() == Some("afs") && etype.is_weak()
}

fn is_usable(negotiation: &Negotiation<'_>, entry: &HdbEntry, etype: Enctype) -> bool {
    let allowed = negotiation.crypto.is_supported(etype) && (negotiation.allow_weak || !etype.is_weak());
    allowed || is_weak_exception(&entry.principal, etype)
}

fn is_default_salt(entry: &HdbEntry, key: &HdbKey) -> bool {
    match &key.salt {
        None => true,
        Some(salt) => *salt == entry.default_salt(),
    }
}

/// First non-null key of `etype`, preferring the default salt when asked to.
fn usable_key(entry: &HdbEntry, etype: Enctype, prefer_default_salt: bool) -> Option<&HdbKey> {
    let mut fallback = None;

    for key in entry.keys_of(etype) {
        if key.key.is_null() {
            continue;
        }

        if !prefer_default_salt || is_default_salt(entry, key) {
            return Some(key);
        }

        fallback.get_or_insert(key);
    }

    fallback
}

/// Picks an enctype that the client offers and `entry` holds a usable key for.
pub fn find_etype<'e>(
    negotiation: &Negotiation<'_>,
    entry: &'e HdbEntry,
    client_etypes: &[Enctype],
    purpose: Purpose,
) -> KdcResult<EtypeChoice<'e>> {
    let prefer_default_salt = purpose == Purpose::ClientKey;

    let candidates: Box<dyn Iterator<Item = Enctype> + '_> = match negotiation.mode {
        SelectionMode::StrongestKey => Box::new(
            negotiation
                .supported
                .iter()
                .copied()
                .filter(|etype| client_etypes.contains(etype)),
        ),
        SelectionMode::ClientPreference => Box::new(client_etypes.iter().copied()),
    };

    for etype in candidates {
        if !is_usable(negotiation, entry, etype) {
            continue;
        }

        if let Some(key) = usable_key(entry, etype, prefer_default_salt) {
            return Ok(EtypeChoice { etype, key: Some(key) });
        }
    }

    if purpose == Purpose::SessionKey && is_weak_exception(&entry.principal, Enctype::DES_CBC_CRC) {
        return Ok(EtypeChoice {
            etype: Enctype::DES_CBC_CRC,
            key: None,
        });
    }

    Err(kdc_err!(ErrorCode::ETYPE_NOSUPP))
}

/// Key the KDC encrypts `entry`'s tickets with: its first key in the KDC's preference order.
pub fn preferred_key<'e>(negotiation: &Negotiation<'_>, entry: &'e HdbEntry) -> KdcResult<&'e HdbKey> {
    negotiation
        .supported
        .iter()
        .copied()
        .filter(|etype| is_usable(negotiation, entry, *etype))
        .find_map(|etype| entry.key_of(etype))
        .ok_or_else(|| {
            warn!(principal = %entry.principal, "No valid kerberos key found");
            kdc_err!(ErrorCode::ETYPE_NOSUPP)
        })
}

fn s2kparams(etype: Enctype) -> Option<Vec<u8>> {
    etype.is_aes().then(|| AES_DEFAULT_ITERATIONS.to_be_bytes().to_vec())
}

/// ETYPE-INFO (only for older enctypes) followed by ETYPE-INFO2, both describing `key`.
pub fn etype_info_padata(key: &HdbKey) -> KdcResult<Vec<PaData>> {
    let etype = key.key.etype;
    let mut padata = Vec::new();

    if etype.is_older() {
        let entry = EtypeInfoEntry {
            etype,
            salt: key.salt.clone(),
        };

        padata.push(PaData::new(PaDataType::ETYPE_INFO, encode_etype_info(&[entry])?));
    }

    let entry = EtypeInfo2Entry {
        etype,
        salt: key.salt.as_deref().map(|salt| String::from_utf8_lossy(salt).into_owned()),
        s2kparams: s2kparams(etype),
    };

    padata.push(PaData::new(PaDataType::ETYPE_INFO2, encode_etype_info2(&[entry])?));

    Ok(padata)
}

#[cfg(test)]
mod tests {
    use ironkdc_crypto::PickyCrypto;
    use ironkdc_hdb::EntryFlags;
    use ironkdc_pdu::data::decode_etype_info2;
    use ironkdc_pdu::EncryptionKey;
    use rstest::rstest;

    use super::*;

    const AES256: Enctype = Enctype::AES256_CTS_HMAC_SHA1_96;
    const AES128: Enctype = Enctype::AES128_CTS_HMAC_SHA1_96;
    const DES3: Enctype = Enctype::DES3_CBC_SHA1;
    const DES: Enctype = Enctype::DES_CBC_CRC;

    fn key(etype: Enctype, salt: Option<&str>) -> HdbKey {
        HdbKey {
            key: EncryptionKey::new(etype, vec![7; 16]),
            salt: salt.map(|s| s.as_bytes().to_vec()),
        }
    }

    fn entry(name: &str, keys: Vec<HdbKey>) -> HdbEntry {
        HdbEntry {
            principal: name.parse().unwrap(),
            kvno: 1,
            keys,
            flags: EntryFlags::SERVER,
            valid_start: None,
            valid_end: None,
            pw_end: None,
            max_life: None,
            max_renew: None,
        }
    }

    fn negotiation(mode: SelectionMode) -> Negotiation<'static> {
        Negotiation {
            mode,
            supported: &[AES256, AES128, DES3],
            allow_weak: false,
            crypto: &PickyCrypto,
        }
    }

    #[rstest]
    #[case::strongest_wins(SelectionMode::StrongestKey, &[AES128, AES256], AES256)]
    #[case::client_order_wins(SelectionMode::ClientPreference, &[AES128, AES256], AES128)]
    #[case::unknown_client_etypes_skipped(SelectionMode::ClientPreference, &[Enctype(-1), AES256], AES256)]
    fn session_etype(#[case] mode: SelectionMode, #[case] client: &[Enctype], #[case] expected: Enctype) {
        let server = entry(
            "krbtgt/EXAMPLE.COM@EXAMPLE.COM",
            vec![key(AES256, None), key(AES128, None)],
        );

        let choice = find_etype(&negotiation(mode), &server, client, Purpose::SessionKey).unwrap();
        assert_eq!(choice.etype, expected);
    }

    #[test]
    fn null_keys_count_as_absent() {
        let mut null = key(AES256, None);
        null.key = EncryptionKey::new(AES256, Vec::new());
        let server = entry("host/a@EXAMPLE.COM", vec![null, key(AES128, None)]);

        let choice = find_etype(
            &negotiation(SelectionMode::StrongestKey),
            &server,
            &[AES256, AES128],
            Purpose::SessionKey,
        )
        .unwrap();
        assert_eq!(choice.etype, AES128);
    }

    #[test]
    fn no_common_enctype() {
        let server = entry("host/a@EXAMPLE.COM", vec![key(AES256, None)]);

        for mode in [SelectionMode::StrongestKey, SelectionMode::ClientPreference] {
            let err = find_etype(&negotiation(mode), &server, &[AES128], Purpose::SessionKey).unwrap_err();
            assert_eq!(err.code, ErrorCode::ETYPE_NOSUPP);
        }
    }

    #[test]
    fn client_key_prefers_default_salt() {
        let client = entry(
            "alice@EXAMPLE.COM",
            vec![key(AES256, Some("OTHERSALT")), key(AES256, None)],
        );

        let choice = find_etype(
            &negotiation(SelectionMode::ClientPreference),
            &client,
            &[AES256],
            Purpose::ClientKey,
        )
        .unwrap();
        assert!(choice.key.unwrap().salt.is_none());
    }

    #[test]
    fn explicit_default_salt_counts_as_default() {
        let client = entry(
            "bob@EXAMPLE.COM",
            vec![key(AES256, Some("OTHERSALT")), key(AES256, Some("EXAMPLE.COMbob"))],
        );

        let choice = find_etype(
            &negotiation(SelectionMode::ClientPreference),
            &client,
            &[AES256],
            Purpose::ClientKey,
        )
        .unwrap();
        assert_eq!(choice.key.unwrap().salt.as_deref(), Some(&b"EXAMPLE.COMbob"[..]));
    }

    #[test]
    fn afs_gets_single_des() {
        let afs = entry("afs/cell@EXAMPLE.COM", vec![key(AES256, None)]);

        let choice = find_etype(
            &negotiation(SelectionMode::ClientPreference),
            &afs,
            &[DES],
            Purpose::SessionKey,
        )
        .unwrap();
        assert_eq!(choice, EtypeChoice { etype: DES, key: None });

        let err = find_etype(&negotiation(SelectionMode::ClientPreference), &afs, &[DES], Purpose::ClientKey)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ETYPE_NOSUPP);
    }

    #[test]
    fn preferred_key_follows_kdc_order() {
        let server = entry("host/a@EXAMPLE.COM", vec![key(AES128, None), key(AES256, None)]);
        let chosen = preferred_key(&negotiation(SelectionMode::ClientPreference), &server).unwrap();
        assert_eq!(chosen.key.etype, AES256);
    }

    #[test]
    fn etype_info2_for_aes_carries_iterations() {
        let padata = etype_info_padata(&key(AES256, Some("EXAMPLE.COMbob"))).unwrap();

        assert_eq!(padata.len(), 1);
        assert_eq!(padata[0].padata_type, PaDataType::ETYPE_INFO2);

        let entries = decode_etype_info2(&padata[0].value).unwrap();
        assert_eq!(entries[0].salt.as_deref(), Some("EXAMPLE.COMbob"));
        assert_eq!(entries[0].s2kparams.as_deref(), Some(&[0, 0, 0x10, 0][..]));
    }

    #[test]
    fn older_enctypes_also_get_etype_info() {
        let padata = etype_info_padata(&key(DES3, None)).unwrap();
        let types = padata.iter().map(|pa| pa.padata_type).collect::<Vec<_>>();
        assert_eq!(types, [PaDataType::ETYPE_INFO, PaDataType::ETYPE_INFO2]);
    }
}
