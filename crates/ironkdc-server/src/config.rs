use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use ironkdc_as::{KdcConfig, PolicyConfig};
use serde::{Deserialize, Serialize};

use crate::{ServerError, ServerErrorExt as _, ServerErrorKind, ServerResult};

/// Daemon configuration, usually read from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub realm: String,
    /// Principal database read by the in-memory backend.
    pub database: PathBuf,
    /// Serve from a single worker running on the caller's task, without a supervisor.
    #[serde(default)]
    pub single_process: bool,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    pub ports: Vec<String>,
    pub addresses: Vec<IpAddr>,
    pub enable_http: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ports: vec!["+".to_owned()],
            addresses: vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED), IpAddr::V6(Ipv6Addr::UNSPECIFIED)],
            enable_http: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// 0 means one worker per available processor.
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub idle_timeout_secs: u64,
    pub max_request_udp: usize,
    pub max_request_tcp: usize,
    pub max_datagram_reply_length: usize,
    pub connection_grow_step: usize,
    pub max_connections: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 4,
            max_request_udp: 64 * 1024,
            max_request_tcp: 64 * 1024,
            max_datagram_reply_length: KdcConfig::DEFAULT_MAX_DATAGRAM_REPLY_LENGTH,
            connection_grow_step: 4,
            max_connections: 1024,
        }
    }
}

impl LimitsConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl ServerConfig {
    pub fn new(realm: impl Into<String>, database: impl Into<PathBuf>) -> Self {
        Self {
            realm: realm.into(),
            database: database.into(),
            single_process: false,
            listen: ListenConfig::default(),
            workers: WorkersConfig::default(),
            limits: LimitsConfig::default(),
            policy: PolicyConfig::default(),
        }
    }

    pub fn from_toml(content: &str) -> ServerResult<Self> {
        toml::from_str(content).map_err(|e| ServerError::new("parse configuration", ServerErrorKind::Config(e)))
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::io("read configuration", e))?;
        Self::from_toml(&content)
    }

    /// Number of workers the supervisor keeps alive, at least one.
    pub fn worker_count(&self) -> usize {
        match self.workers.count {
            0 => std::thread::available_parallelism().map_or(1, usize::from),
            count => count,
        }
    }

    pub fn kdc_config(&self) -> KdcConfig {
        KdcConfig {
            realm: self.realm.clone(),
            policy: self.policy.clone(),
            max_datagram_reply_length: self.limits.max_datagram_reply_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn minimal_file_takes_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            realm = "EXAMPLE.COM"
            database = "principals.toml"
            "#,
        )
        .unwrap();

        assert_eq!(config, ServerConfig::new("EXAMPLE.COM", "principals.toml"));
        assert_eq!(config.limits.idle_timeout(), Duration::from_secs(4));
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn every_table_is_read() {
        let config = ServerConfig::from_toml(
            r#"
            realm = "EXAMPLE.COM"
            database = "/var/lib/ironkdc/principals.toml"
            single_process = true

            [listen]
            ports = ["88/udp", "kerberos/tcp"]
            addresses = ["127.0.0.1"]
            enable_http = false

            [workers]
            count = 3

            [limits]
            idle_timeout_secs = 10
            max_connections = 16

            [policy]
            require_preauth = false
            max_skew_secs = 60
            "#,
        )
        .unwrap();

        assert!(config.single_process);
        assert_eq!(config.listen.ports, ["88/udp", "kerberos/tcp"]);
        assert_eq!(config.listen.addresses, [IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        assert!(!config.listen.enable_http);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.limits.max_connections, 16);
        assert_eq!(config.limits.connection_grow_step, 4);
        assert!(!config.policy.require_preauth);
        assert_eq!(config.policy.max_skew_secs, 60);

        let kdc = config.kdc_config();
        assert_eq!(kdc.realm, "EXAMPLE.COM");
        assert_eq!(kdc.max_datagram_reply_length, 1400);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = ServerConfig::from_toml(
            r#"
            realm = "EXAMPLE.COM"
            database = "principals.toml"

            [limits]
            idle_timeout = 10
            "#,
        )
        .unwrap_err();

        assert!(matches!(error.kind(), ServerErrorKind::Config(_)));
    }

    #[test]
    fn effective_config_renders_as_toml() {
        let mut config = ServerConfig::new("EXAMPLE.COM", "principals.toml");
        config.listen.addresses = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
        config.policy.supported_enctypes = vec![18];

        let rendered = toml::to_string(&config).unwrap();

        expect![[r#"
            realm = "EXAMPLE.COM"
            database = "principals.toml"
            single_process = false

            [listen]
            ports = ["+"]
            addresses = ["127.0.0.1"]
            enable_http = true

            [workers]
            count = 0

            [limits]
            idle_timeout_secs = 4
            max_request_udp = 65536
            max_request_tcp = 65536
            max_datagram_reply_length = 1400
            connection_grow_step = 4
            max_connections = 1024

            [policy]
            require_preauth = true
            check_ticket_addresses = true
            allow_null_ticket_addresses = true
            allow_anonymous = false
            max_skew_secs = 300
            tgt_use_strongest_session_key = false
            svc_use_strongest_session_key = false
            preauth_use_strongest_session_key = false
            allow_weak_enctypes = false
            supported_enctypes = [18]
            kdc_warn_pwexpire_secs = 0
            enable_pkinit = false
            hide_client_names_in_errors = false
        "#]]
        .assert_eq(&rendered);
    }
}
