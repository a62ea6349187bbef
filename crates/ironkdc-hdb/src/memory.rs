use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use ironkdc_crypto::Crypto;
use ironkdc_pdu::{EncryptionKey, Enctype, KerberosTime, Principal};
use serde::Deserialize;

use crate::{AuthStatus, EntryFlags, FetchFlags, FetchOutcome, Hdb, HdbEntry, HdbError, HdbErrorKind, HdbKey, HdbResult};

const DEFAULT_KVNO: u32 = 1;

fn default_kvno() -> u32 {
    DEFAULT_KVNO
}

fn default_enctypes() -> Vec<i32> {
    vec![
        Enctype::AES256_CTS_HMAC_SHA1_96.0,
        Enctype::AES128_CTS_HMAC_SHA1_96.0,
    ]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseFile {
    #[serde(default)]
    max_failed_logins: Option<u32>,
    #[serde(default, rename = "principal")]
    principals: Vec<PrincipalRecord>,
    #[serde(default, rename = "alias")]
    aliases: Vec<AliasRecord>,
    #[serde(default)]
    not_found_here: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrincipalRecord {
    name: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_enctypes")]
    enctypes: Vec<i32>,
    #[serde(default)]
    salt: Option<String>,
    #[serde(default = "default_kvno")]
    kvno: u32,
    #[serde(default)]
    keys: Vec<KeyRecord>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    max_life_secs: Option<i64>,
    #[serde(default)]
    max_renew_secs: Option<i64>,
    #[serde(default)]
    valid_start: Option<i64>,
    #[serde(default)]
    valid_end: Option<i64>,
    #[serde(default)]
    pw_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyRecord {
    etype: i32,
    key: String,
    #[serde(default)]
    salt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AliasRecord {
    name: String,
    target: String,
}

/// Lookup key: name components and realm, ignoring the name type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey(Vec<String>, String);

impl From<&Principal> for EntryKey {
    fn from(principal: &Principal) -> Self {
        Self(principal.name.components.clone(), principal.realm.clone())
    }
}

/// In-memory principal database.
#[derive(Debug)]
pub struct MemoryHdb {
    entries: HashMap<EntryKey, HdbEntry>,
    aliases: HashMap<EntryKey, Principal>,
    not_found_here: HashSet<EntryKey>,
    max_failed_logins: Option<u32>,
    failed_logins: Mutex<HashMap<EntryKey, u32>>,
}

fn invalid(context: &'static str, reason: String) -> HdbError {
    HdbError::new(context, HdbErrorKind::InvalidEntry(reason))
}

fn parse_principal(context: &'static str, name: &str) -> HdbResult<Principal> {
    name.parse()
        .map_err(|e: ironkdc_pdu::PduError| invalid(context, format!("{name}: {}", e.report())))
}

impl MemoryHdb {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            aliases: HashMap::new(),
            not_found_here: HashSet::new(),
            max_failed_logins: None,
            failed_logins: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(path: &Path, crypto: &dyn Crypto) -> HdbResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| HdbError::new("read database file", HdbErrorKind::Io(e)))?;
        Self::from_toml(&content, crypto)
    }

    pub fn from_toml(content: &str, crypto: &dyn Crypto) -> HdbResult<Self> {
        let file: DatabaseFile =
            toml::from_str(content).map_err(|e| HdbError::new("parse database file", HdbErrorKind::Parse(e)))?;

        let mut hdb = Self::empty();
        hdb.max_failed_logins = file.max_failed_logins;

        for record in file.principals {
            let entry = entry_from_record(record, crypto)?;
            debug!(principal = %entry.principal, keys = entry.keys.len(), "Loaded principal");
            hdb.insert(entry);
        }

        for alias in file.aliases {
            let name = parse_principal("alias name", &alias.name)?;
            let target = parse_principal("alias target", &alias.target)?;
            hdb.aliases.insert(EntryKey::from(&name), target);
        }

        for name in file.not_found_here {
            let principal = parse_principal("not_found_here", &name)?;
            hdb.not_found_here.insert(EntryKey::from(&principal));
        }

        hdb.ensure_fast_cookie_key(crypto)?;

        info!(principals = hdb.entries.len(), aliases = hdb.aliases.len(), "Principal database loaded");

        Ok(hdb)
    }

    pub fn insert(&mut self, entry: HdbEntry) {
        self.entries.insert(EntryKey::from(&entry.principal), entry);
    }

    /// FX-COOKIE needs a key shared by every worker; generate one when the file has none.
    fn ensure_fast_cookie_key(&mut self, crypto: &dyn Crypto) -> HdbResult<()> {
        let cookie = Principal::fast_cookie();

        if self.entries.contains_key(&EntryKey::from(&cookie)) {
            return Ok(());
        }

        let key = crypto
            .random_key(Enctype::AES256_CTS_HMAC_SHA1_96)
            .map_err(|e| HdbError::new("FX-COOKIE key", HdbErrorKind::Crypto(e)))?;

        debug!(principal = %cookie, "Generated FX-COOKIE key");

        self.insert(HdbEntry {
            principal: cookie,
            kvno: DEFAULT_KVNO,
            keys: vec![HdbKey { key, salt: None }],
            flags: EntryFlags::SERVER,
            valid_start: None,
            valid_end: None,
            pw_end: None,
            max_life: None,
            max_renew: None,
        });

        Ok(())
    }

    fn failure_count(&self, key: &EntryKey) -> u32 {
        match self.failed_logins.lock() {
            Ok(failures) => failures.get(key).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(key).copied().unwrap_or(0),
        }
    }
}

impl Hdb for MemoryHdb {
    fn fetch(&self, principal: &Principal, flags: FetchFlags) -> HdbResult<FetchOutcome> {
        let mut key = EntryKey::from(principal);

        if let Some(target) = self.aliases.get(&key) {
            if target.realm != principal.realm {
                if flags.contains(FetchFlags::CLIENT) && flags.contains(FetchFlags::CANONICALIZE) {
                    return Ok(FetchOutcome::WrongRealm {
                        canonical: target.realm.clone(),
                    });
                }

                return Ok(FetchOutcome::NotFound);
            }

            key = EntryKey::from(target);
        }

        if self.not_found_here.contains(&key) {
            return Ok(FetchOutcome::NotFoundHere);
        }

        let Some(entry) = self.entries.get(&key) else {
            return Ok(FetchOutcome::NotFound);
        };

        let mut entry = entry.clone();

        if let Some(max) = self.max_failed_logins {
            if self.failure_count(&key) >= max {
                entry.flags |= EntryFlags::LOCKED_OUT;
            }
        }

        Ok(FetchOutcome::Found(Box::new(entry)))
    }

    fn auth_status(&self, entry: &HdbEntry, status: AuthStatus) {
        let key = EntryKey::from(&entry.principal);

        let mut failures = match self.failed_logins.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };

        match status {
            // A locked-out entry stays locked out even when the password is right.
            AuthStatus::Success if entry.flags.contains(EntryFlags::LOCKED_OUT) => {}
            AuthStatus::Success => {
                failures.remove(&key);
            }
            AuthStatus::WrongPassword => {
                let count = failures.entry(key).or_insert(0);
                *count = count.saturating_add(1);
                debug!(principal = %entry.principal, failures = *count, "Failed pre-authentication");
            }
        }
    }
}

fn entry_from_record(record: PrincipalRecord, crypto: &dyn Crypto) -> HdbResult<HdbEntry> {
    let principal = parse_principal("principal name", &record.name)?;

    let mut flags = EntryFlags::empty();

    for name in &record.flags {
        let flag = EntryFlags::parse(name).ok_or_else(|| invalid("principal flags", format!("unknown flag `{name}`")))?;
        flags |= flag;
    }

    let mut keys = Vec::new();

    for key in record.keys {
        let value = hex::decode(&key.key)
            .map_err(|_| invalid("principal key", format!("{}: key is not valid hex", record.name)))?;

        keys.push(HdbKey {
            key: EncryptionKey::new(Enctype(key.etype), value),
            salt: key.salt.map(String::into_bytes),
        });
    }

    if let Some(password) = &record.password {
        let mut salt = record.salt.clone().map(String::into_bytes);

        let default_salt = crate::default_salt(&principal);

        if salt.as_deref() == Some(default_salt.as_slice()) {
            salt = None;
        }

        for etype in &record.enctypes {
            let etype = Enctype(*etype);

            let key = crypto
                .string_to_key(etype, password.as_bytes(), salt.as_deref().unwrap_or(&default_salt))
                .map_err(|e| HdbError::new("string-to-key", HdbErrorKind::Crypto(e)))?;

            keys.push(HdbKey {
                key,
                salt: salt.clone(),
            });
        }
    }

    if keys.is_empty() && !principal.name.is_anonymous() {
        warn!(principal = %principal, "Principal has no keys");
    }

    Ok(HdbEntry {
        principal,
        kvno: record.kvno,
        keys,
        flags,
        valid_start: record.valid_start.map(KerberosTime),
        valid_end: record.valid_end.map(KerberosTime),
        pw_end: record.pw_end.map(KerberosTime),
        max_life: record.max_life_secs,
        max_renew: record.max_renew_secs,
    })
}

#[cfg(test)]
mod tests {
    use ironkdc_crypto::PickyCrypto;

    use super::*;

    const DATABASE: &str = r#"
max_failed_logins = 2
not_found_here = ["rodc-only@EXAMPLE.COM"]

[[principal]]
name = "alice@EXAMPLE.COM"
password = "alice-password"
flags = ["client", "require-preauth"]
max_life_secs = 36000

[[principal]]
name = "krbtgt/EXAMPLE.COM@EXAMPLE.COM"
flags = ["server"]
kvno = 3

[[principal.keys]]
etype = 18
key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"

[[alias]]
name = "alice@EXAMPLE.ORG"
target = "alice@EXAMPLE.COM"

[[alias]]
name = "al@EXAMPLE.COM"
target = "alice@EXAMPLE.COM"
"#;

    fn load() -> MemoryHdb {
        MemoryHdb::from_toml(DATABASE, &PickyCrypto).unwrap()
    }

    fn found(outcome: FetchOutcome) -> HdbEntry {
        match outcome {
            FetchOutcome::Found(entry) => *entry,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn password_keys_use_default_salt() {
        let hdb = load();
        let alice = found(hdb.fetch(&"alice@EXAMPLE.COM".parse().unwrap(), FetchFlags::CLIENT).unwrap());

        assert_eq!(alice.keys.len(), 2);
        assert!(alice.keys.iter().all(|k| k.salt.is_none()));
        assert_eq!(alice.default_salt(), b"EXAMPLE.COMalice");
        assert_eq!(alice.max_life, Some(36000));
        assert!(alice.flags.contains(EntryFlags::CLIENT | EntryFlags::REQUIRE_PREAUTH));
    }

    #[test]
    fn explicit_keys_are_hex() {
        let hdb = load();
        let krbtgt = found(
            hdb.fetch(&Principal::krbtgt("EXAMPLE.COM"), FetchFlags::SERVER)
                .unwrap(),
        );

        assert_eq!(krbtgt.kvno, 3);
        assert_eq!(krbtgt.key_of(Enctype::AES256_CTS_HMAC_SHA1_96).unwrap().key.value[1], 1);
        assert!(krbtgt.key_of(Enctype::AES128_CTS_HMAC_SHA1_96).is_none());
    }

    #[test]
    fn fetch_outcomes() {
        let hdb = load();

        assert_eq!(
            hdb.fetch(&"nobody@EXAMPLE.COM".parse().unwrap(), FetchFlags::CLIENT).unwrap(),
            FetchOutcome::NotFound
        );
        assert_eq!(
            hdb.fetch(&"rodc-only@EXAMPLE.COM".parse().unwrap(), FetchFlags::CLIENT).unwrap(),
            FetchOutcome::NotFoundHere
        );
        assert_eq!(
            hdb.fetch(
                &"alice@EXAMPLE.ORG".parse().unwrap(),
                FetchFlags::CLIENT | FetchFlags::CANONICALIZE
            )
            .unwrap(),
            FetchOutcome::WrongRealm {
                canonical: "EXAMPLE.COM".to_owned()
            }
        );
        assert_eq!(
            hdb.fetch(&"alice@EXAMPLE.ORG".parse().unwrap(), FetchFlags::CLIENT).unwrap(),
            FetchOutcome::NotFound
        );

        let via_alias = found(hdb.fetch(&"al@EXAMPLE.COM".parse().unwrap(), FetchFlags::CLIENT).unwrap());
        assert_eq!(via_alias.principal.to_string(), "alice@EXAMPLE.COM");
    }

    #[test]
    fn repeated_failures_lock_the_entry_out() {
        let hdb = load();
        let alice_name: Principal = "alice@EXAMPLE.COM".parse().unwrap();
        let alice = found(hdb.fetch(&alice_name, FetchFlags::CLIENT).unwrap());

        hdb.auth_status(&alice, AuthStatus::WrongPassword);
        assert!(!found(hdb.fetch(&alice_name, FetchFlags::CLIENT).unwrap())
            .flags
            .contains(EntryFlags::LOCKED_OUT));

        hdb.auth_status(&alice, AuthStatus::WrongPassword);
        let locked = found(hdb.fetch(&alice_name, FetchFlags::CLIENT).unwrap());
        assert!(locked.flags.contains(EntryFlags::LOCKED_OUT));

        // The right password does not lift a lockout.
        hdb.auth_status(&locked, AuthStatus::Success);
        assert!(found(hdb.fetch(&alice_name, FetchFlags::CLIENT).unwrap())
            .flags
            .contains(EntryFlags::LOCKED_OUT));

        hdb.auth_status(&alice, AuthStatus::Success);
        assert!(!found(hdb.fetch(&alice_name, FetchFlags::CLIENT).unwrap())
            .flags
            .contains(EntryFlags::LOCKED_OUT));
    }

    #[test]
    fn cookie_key_is_generated() {
        let hdb = load();
        let cookie = found(hdb.fetch(&Principal::fast_cookie(), FetchFlags::SERVER).unwrap());
        assert!(cookie.key_of(Enctype::AES256_CTS_HMAC_SHA1_96).is_some());
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = MemoryHdb::from_toml(
            r#"
[[principal]]
name = "bob@EXAMPLE.COM"
flags = ["sudo"]
"#,
            &PickyCrypto,
        )
        .unwrap_err();

        expect_test::expect!["[principal flags] invalid entry: unknown flag `sudo`"].assert_eq(&err.to_string());
    }
}
