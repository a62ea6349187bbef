//! Authorization data carried in issued tickets.

use picky_asn1::wrapper::{Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, IntegerAsn1, Optional};
use picky_krb::data_types::{
    AuthorizationDataInner, Checksum as Asn1Checksum, KerberosStringAsn1, KerberosTime as Asn1KerberosTime,
    PrincipalName as Asn1PrincipalName,
};
use serde::{Deserialize, Serialize};

use crate::asn1::{int32, kerberos_string};
use crate::constants::{ad_types, Enctype};
use crate::data::{AuthorizationDataEntry, Checksum};
use crate::principal::Principal;
use crate::time::KerberosTime;
use crate::{decode_der, encode_der, PduResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1Principal {
    name: ExplicitContextTag0<Asn1PrincipalName>,
    realm: ExplicitContextTag1<KerberosStringAsn1>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1SignedPathData {
    client: Optional<Option<ExplicitContextTag0<Asn1Principal>>>,
    authtime: ExplicitContextTag1<Asn1KerberosTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Asn1SignedPath {
    etype: ExplicitContextTag0<IntegerAsn1>,
    cksum: ExplicitContextTag1<Asn1Checksum>,
}

/// Wraps entries as AD-IF-RELEVANT.
pub fn if_relevant(entries: &[AuthorizationDataEntry]) -> PduResult<AuthorizationDataEntry> {
    let inner = Asn1SequenceOf::from(
        entries
            .iter()
            .map(AuthorizationDataEntry::to_asn1)
            .collect::<Vec<AuthorizationDataInner>>(),
    );

    Ok(AuthorizationDataEntry::new(
        ad_types::IF_RELEVANT,
        encode_der("AD-IF-RELEVANT", &inner)?,
    ))
}

pub fn decode_if_relevant(data: &[u8]) -> PduResult<Vec<AuthorizationDataEntry>> {
    let inner: Asn1SequenceOf<AuthorizationDataInner> = decode_der("AD-IF-RELEVANT", data)?;
    inner.0.iter().map(AuthorizationDataEntry::from_asn1).collect()
}

/// KRB5SignedPathData: the bytes a ticket's signed path checksum covers.
pub fn encode_signed_path_data(client: Option<&Principal>, authtime: KerberosTime) -> PduResult<Vec<u8>> {
    let client = match client {
        Some(client) => Some(ExplicitContextTag0::from(Asn1Principal {
            name: ExplicitContextTag0::from(client.name.to_asn1()?),
            realm: ExplicitContextTag1::from(kerberos_string("realm", &client.realm)?),
        })),
        None => None,
    };

    let asn1 = Asn1SignedPathData {
        client: Optional::from(client),
        authtime: ExplicitContextTag1::from(authtime.to_asn1()?),
    };

    encode_der("KRB5SignedPathData", &asn1)
}

/// KRB5SignedPath, the AD-SIGNTICKET payload.
pub fn signed_path(etype: Enctype, cksum: &Checksum) -> PduResult<AuthorizationDataEntry> {
    let asn1 = Asn1SignedPath {
        etype: ExplicitContextTag0::from(int32(etype.0)),
        cksum: ExplicitContextTag1::from(cksum.to_asn1()),
    };

    Ok(AuthorizationDataEntry::new(
        ad_types::SIGNTICKET,
        encode_der("KRB5SignedPath", &asn1)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_relevant_nests_entries() {
        let pac = AuthorizationDataEntry::new(ad_types::WIN2K_PAC, vec![1, 2, 3]);
        let wrapped = if_relevant(&[pac.clone()]).unwrap();

        assert_eq!(wrapped.ad_type, ad_types::IF_RELEVANT);
        assert_eq!(decode_if_relevant(&wrapped.data).unwrap(), vec![pac]);
    }

    #[test]
    fn signed_path_data_depends_on_client() {
        let alice: Principal = "alice@EXAMPLE.COM".parse().unwrap();
        let bob: Principal = "bob@EXAMPLE.COM".parse().unwrap();
        let t = KerberosTime(1_700_000_000);

        assert_ne!(
            encode_signed_path_data(Some(&alice), t).unwrap(),
            encode_signed_path_data(Some(&bob), t).unwrap()
        );
    }
}
