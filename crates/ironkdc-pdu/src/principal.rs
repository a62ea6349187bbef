use core::fmt;
use core::str::FromStr;

use picky_asn1::wrapper::{Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1};
use picky_krb::data_types::PrincipalName as Asn1PrincipalName;

use crate::asn1::{from_kerberos_string, int32, kerberos_string, to_i32};
use crate::constants::{well_known, NameType};
use crate::{invalid_field_err, PduError, PduResult};

/// Name of a principal, without its realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalName {
    pub name_type: NameType,
    pub components: Vec<String>,
}

impl PrincipalName {
    pub fn new(name_type: NameType, components: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name_type,
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// `krbtgt/<realm>`
    pub fn krbtgt(realm: &str) -> Self {
        Self::new(NameType::SRV_INST, [well_known::KRBTGT, realm])
    }

    /// `WELLKNOWN/ANONYMOUS`
    pub fn anonymous() -> Self {
        Self::new(NameType::WELLKNOWN, [well_known::WELLKNOWN, well_known::ANONYMOUS])
    }

    /// Name with no components, used to hide the client in armored replies.
    pub fn empty() -> Self {
        Self::new(NameType::UNKNOWN, Vec::<String>::new())
    }

    pub fn first(&self) -> Option<&str> {
        self.components.first().map(String::as_str)
    }

    pub fn is_krbtgt(&self) -> bool {
        self.components.len() == 2 && self.first() == Some(well_known::KRBTGT)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.name_type, NameType::WELLKNOWN | NameType::UNKNOWN)
            && self.components.len() == 2
            && self.components[0] == well_known::WELLKNOWN
            && self.components[1] == well_known::ANONYMOUS
    }

    /// Name type is one for which the name is a plain list of components.
    pub fn has_simple_name_type(&self) -> bool {
        matches!(
            self.name_type,
            NameType::UNKNOWN | NameType::PRINCIPAL | NameType::SRV_INST | NameType::SRV_HST | NameType::SRV_XHST
        )
    }

    pub fn to_asn1(&self) -> PduResult<Asn1PrincipalName> {
        let name_string = self
            .components
            .iter()
            .map(|c| kerberos_string("name-string", c))
            .collect::<PduResult<Vec<_>>>()?;

        Ok(Asn1PrincipalName {
            name_type: ExplicitContextTag0::from(int32(self.name_type.0)),
            name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(name_string)),
        })
    }

    pub fn from_asn1(value: &Asn1PrincipalName) -> PduResult<Self> {
        let name_type = NameType(to_i32("name-type", &value.name_type.0)?);

        let components = value
            .name_string
            .0
            .0
            .iter()
            .map(|c| from_kerberos_string("name-string", c))
            .collect::<PduResult<Vec<_>>>()?;

        Ok(Self { name_type, components })
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, component) in self.components.iter().enumerate() {
            if idx > 0 {
                f.write_str("/")?;
            }

            write_escaped(f, component)?;
        }

        Ok(())
    }
}

/// Principal name qualified with its realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub name: PrincipalName,
    pub realm: String,
}

impl Principal {
    pub fn new(name: PrincipalName, realm: impl Into<String>) -> Self {
        Self {
            name,
            realm: realm.into(),
        }
    }

    /// Key of the FX-COOKIE service, `WELLKNOWN/org.h5l.fast-cookie@WELLKNOWN:ORG.H5L`.
    pub fn fast_cookie() -> Self {
        Self::new(
            PrincipalName::new(NameType::UNKNOWN, [well_known::WELLKNOWN, well_known::FAST_COOKIE_NAME]),
            well_known::FAST_COOKIE_REALM,
        )
    }

    pub fn krbtgt(realm: &str) -> Self {
        Self::new(PrincipalName::krbtgt(realm), realm)
    }

    /// Compares names and realms, ignoring the name type.
    pub fn same_as(&self, other: &Self) -> bool {
        self.realm == other.realm && self.name.components == other.name.components
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@", self.name)?;
        write_escaped(f, &self.realm)
    }
}

impl FromStr for Principal {
    type Err = PduError;

    /// Parses `comp1/comp2@REALM`; `\` escapes `/`, `@` and itself.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut components = Vec::new();
        let mut realm = None;
        let mut current = String::new();
        let mut chars = s.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| invalid_field_err!("principal", "name", "dangling escape"))?;
                    current.push(escaped);
                }
                '/' if realm.is_none() => components.push(core::mem::take(&mut current)),
                '@' if realm.is_none() => {
                    components.push(core::mem::take(&mut current));
                    realm = Some(String::new());
                }
                _ => current.push(c),
            }
        }

        let realm = match realm {
            Some(_) => current,
            None => return Err(invalid_field_err!("principal", "realm", "missing realm")),
        };

        if realm.is_empty() || components.iter().any(String::is_empty) {
            return Err(invalid_field_err!("principal", "name", "empty component"));
        }

        let name_type = if components.first().map(String::as_str) == Some(well_known::KRBTGT) {
            NameType::SRV_INST
        } else {
            NameType::PRINCIPAL
        };

        Ok(Self::new(PrincipalName { name_type, components }, realm))
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    for c in value.chars() {
        if matches!(c, '/' | '@' | '\\') {
            f.write_str("\\")?;
        }

        write!(f, "{c}")?;
    }

    Ok(())
}
