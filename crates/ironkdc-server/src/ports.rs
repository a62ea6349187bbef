use core::fmt;

use crate::{ServerError, ServerErrorExt as _, ServerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn name(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

/// One port to listen on, bound on every configured address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortDescriptor {
    pub transport: Transport,
    pub port: u16,
}

impl PortDescriptor {
    pub const fn new(transport: Transport, port: u16) -> Self {
        Self { transport, port }
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.transport.name())
    }
}

const SERVICES: &[(&str, u16)] = &[("kerberos", 88), ("kerberos-sec", 88), ("kerberos-iv", 750), ("http", 80)];

fn service_port(name: &str) -> Option<u16> {
    SERVICES
        .iter()
        .find_map(|(service, port)| (*service == name).then_some(*port))
}

/// Expands the `[listen] ports` strings into port descriptors.
///
/// Each string holds whitespace-separated tokens: `+` for the standard set,
/// a service name or port number for both transports, or `name/udp`, `name/tcp`
/// for a single one. Duplicates are dropped, first occurrence wins.
pub fn parse_port_specs<S: AsRef<str>>(specs: &[S], enable_http: bool) -> ServerResult<Vec<PortDescriptor>> {
    let mut ports = Vec::new();

    let mut push = |descriptor: PortDescriptor| {
        if !ports.contains(&descriptor) {
            ports.push(descriptor);
        }
    };

    for token in specs.iter().flat_map(|spec| spec.as_ref().split_whitespace()) {
        if token == "+" {
            push(PortDescriptor::new(Transport::Udp, 88));
            push(PortDescriptor::new(Transport::Tcp, 88));
            if enable_http {
                push(PortDescriptor::new(Transport::Tcp, 80));
            }
            continue;
        }

        let (service, protocol) = match token.split_once('/') {
            Some((service, protocol)) => (service, Some(protocol)),
            None => (token, None),
        };

        let port = match service.parse::<u16>() {
            Ok(0) => return Err(ServerError::invalid_port("parse port", token)),
            Ok(port) => port,
            Err(_) => service_port(service).ok_or_else(|| ServerError::invalid_port("unknown service", token))?,
        };

        match protocol {
            None => {
                push(PortDescriptor::new(Transport::Udp, port));
                push(PortDescriptor::new(Transport::Tcp, port));
            }
            Some("udp") => push(PortDescriptor::new(Transport::Udp, port)),
            Some("tcp") => push(PortDescriptor::new(Transport::Tcp, port)),
            Some(_) => return Err(ServerError::invalid_port("unknown protocol", token)),
        }
    }

    Ok(ports)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::Transport::{Tcp, Udp};
    use super::*;

    fn describe(ports: &[PortDescriptor]) -> Vec<String> {
        ports.iter().map(ToString::to_string).collect()
    }

    #[rstest]
    #[case(&["+"], true, &["88/udp", "88/tcp", "80/tcp"])]
    #[case(&["+"], false, &["88/udp", "88/tcp"])]
    #[case(&["88"], true, &["88/udp", "88/tcp"])]
    #[case(&["kerberos-iv/udp"], true, &["750/udp"])]
    #[case(&["kerberos/tcp kerberos-sec/tcp"], true, &["88/tcp"])]
    #[case(&["http/tcp", "+"], true, &["80/tcp", "88/udp", "88/tcp"])]
    #[case(&["8888/tcp", "8888"], true, &["8888/tcp", "8888/udp"])]
    #[case(&[], true, &[])]
    fn expands(#[case] specs: &[&str], #[case] enable_http: bool, #[case] expected: &[&str]) {
        let ports = parse_port_specs(specs, enable_http).unwrap();
        assert_eq!(describe(&ports), expected);
    }

    #[rstest]
    #[case("kerberos-v9")]
    #[case("88/sctp")]
    #[case("0")]
    #[case("70000")]
    #[case("/udp")]
    fn rejects(#[case] spec: &str) {
        assert!(parse_port_specs(&[spec], true).is_err());
    }

    #[test]
    fn descriptor_fields() {
        let ports = parse_port_specs(&["kerberos/udp"], false).unwrap();
        assert_eq!(ports, [PortDescriptor::new(Udp, 88)]);
        assert_ne!(ports[0], PortDescriptor::new(Tcp, 88));
    }
}
