use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

use crate::ports::{PortDescriptor, Transport};
use crate::{ServerError, ServerErrorExt as _, ServerErrorKind, ServerResult};

const LISTEN_BACKLOG: i32 = 64;

/// Every socket the daemon listens on.
///
/// Held as std sockets in non-blocking mode; each worker registers its own
/// duplicated handles with the runtime.
#[derive(Debug)]
pub struct BoundSockets {
    udp: Vec<std::net::UdpSocket>,
    tcp: Vec<std::net::TcpListener>,
}

/// A worker's private handles on the shared sockets.
#[derive(Debug)]
pub(crate) struct WorkerSockets {
    pub(crate) udp: Vec<tokio::net::UdpSocket>,
    pub(crate) tcp: Vec<tokio::net::TcpListener>,
}

impl BoundSockets {
    /// Binds every port on every address, skipping the ones that fail.
    ///
    /// Fails only when nothing could be bound.
    pub fn bind(addresses: &[IpAddr], ports: &[PortDescriptor]) -> ServerResult<Self> {
        let mut sockets = Self {
            udp: Vec::new(),
            tcp: Vec::new(),
        };

        for port in ports {
            for address in addresses {
                let addr = SocketAddr::new(*address, port.port);

                let result = match port.transport {
                    Transport::Udp => bind_udp(addr).map(|socket| sockets.udp.push(socket)),
                    Transport::Tcp => bind_tcp(addr).map(|listener| sockets.tcp.push(listener)),
                };

                match result {
                    Ok(()) => info!(%addr, transport = port.transport.name(), "Listening"),
                    Err(error) => warn!(%addr, transport = port.transport.name(), %error, "Failed to bind socket"),
                }
            }
        }

        if sockets.udp.is_empty() && sockets.tcp.is_empty() {
            return Err(ServerError::new("bind sockets", ServerErrorKind::NoSockets));
        }

        Ok(sockets)
    }

    pub fn udp_addrs(&self) -> Vec<SocketAddr> {
        self.udp.iter().filter_map(|socket| socket.local_addr().ok()).collect()
    }

    pub fn tcp_addrs(&self) -> Vec<SocketAddr> {
        self.tcp.iter().filter_map(|listener| listener.local_addr().ok()).collect()
    }

    pub(crate) fn for_worker(&self) -> ServerResult<WorkerSockets> {
        let udp = self
            .udp
            .iter()
            .map(|socket| {
                socket
                    .try_clone()
                    .and_then(tokio::net::UdpSocket::from_std)
                    .map_err(|e| ServerError::io("register datagram socket", e))
            })
            .collect::<ServerResult<Vec<_>>>()?;

        let tcp = self
            .tcp
            .iter()
            .map(|listener| {
                listener
                    .try_clone()
                    .and_then(tokio::net::TcpListener::from_std)
                    .map_err(|e| ServerError::io("register listener", e))
            })
            .collect::<ServerResult<Vec<_>>>()?;

        Ok(WorkerSockets { udp, tcp })
    }
}

/// IPv6 sockets are v6-only so the wildcard addresses of both families can share a port.
fn bind_socket(addr: SocketAddr, ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

fn bind_udp(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = bind_socket(addr, Type::DGRAM, Protocol::UDP)?;
    Ok(socket.into())
}

fn bind_tcp(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = bind_socket(addr, Type::STREAM, Protocol::TCP)?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use rstest::rstest;

    use super::*;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const ANY_V4: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    const ANY_V6: IpAddr = IpAddr::V6(Ipv6Addr::UNSPECIFIED);

    #[tokio::test]
    async fn binds_both_transports() {
        let ports = [
            PortDescriptor::new(Transport::Udp, 0),
            PortDescriptor::new(Transport::Tcp, 0),
        ];

        let sockets = BoundSockets::bind(&[LOCALHOST], &ports).unwrap();

        assert_eq!(sockets.udp_addrs().len(), 1);
        assert_eq!(sockets.tcp_addrs().len(), 1);
        assert!(sockets.tcp_addrs()[0].port() != 0);

        let worker = sockets.for_worker().unwrap();
        assert_eq!(worker.udp.len(), 1);
        assert_eq!(worker.tcp.len(), 1);
        assert_eq!(worker.tcp[0].local_addr().unwrap(), sockets.tcp_addrs()[0]);
    }

    #[tokio::test]
    async fn failed_binds_are_skipped() {
        let taken = std::net::UdpSocket::bind((LOCALHOST, 0)).unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let ports = [
            PortDescriptor::new(Transport::Udp, taken_port),
            PortDescriptor::new(Transport::Tcp, 0),
        ];

        let sockets = BoundSockets::bind(&[LOCALHOST], &ports).unwrap();

        assert!(sockets.udp_addrs().is_empty());
        assert_eq!(sockets.tcp_addrs().len(), 1);
    }

    #[tokio::test]
    async fn nothing_bound_is_fatal() {
        let taken = std::net::UdpSocket::bind((LOCALHOST, 0)).unwrap();
        let ports = [PortDescriptor::new(Transport::Udp, taken.local_addr().unwrap().port())];

        let error = BoundSockets::bind(&[LOCALHOST], &ports).unwrap_err();

        assert!(matches!(error.kind(), ServerErrorKind::NoSockets));
    }

    #[rstest]
    #[case::udp(Transport::Udp)]
    #[case::tcp(Transport::Tcp)]
    #[tokio::test]
    async fn both_families_share_a_port(#[case] transport: Transport) {
        if std::net::UdpSocket::bind((ANY_V6, 0)).is_err() {
            // No IPv6 on this host.
            return;
        }

        let v4 = BoundSockets::bind(&[ANY_V4], &[PortDescriptor::new(transport, 0)]).unwrap();
        let port = match transport {
            Transport::Udp => v4.udp_addrs()[0].port(),
            Transport::Tcp => v4.tcp_addrs()[0].port(),
        };

        let v6 = BoundSockets::bind(&[ANY_V6], &[PortDescriptor::new(transport, port)]).unwrap();
        let addrs = match transport {
            Transport::Udp => v6.udp_addrs(),
            Transport::Tcp => v6.tcp_addrs(),
        };

        assert_eq!(addrs, [SocketAddr::new(ANY_V6, port)]);
    }
}
