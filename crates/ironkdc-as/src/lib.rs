#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

mod config;
mod context;
mod error;
mod exchange;
pub mod etype;
pub mod fast;
mod plugin;
pub mod policy;
pub mod preauth;
mod ticket;

use core::fmt;
use std::net::SocketAddr;

use ironkdc_pdu::KerberosTime;

pub use self::config::{KdcConfig, PolicyConfig};
pub use self::error::{KdcError, KdcResult};
pub use self::exchange::{ExchangeState, Kdc};
pub use self::plugin::{AccessDecision, AccessPolicy, PacGenerator, PkinitBackend, PkinitReply};
pub use self::preauth::{PreauthFlag, PreauthMethod, PreauthRegistry};

/// Where a request came from and when it is being processed.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub peer: Option<SocketAddr>,
    /// The reply goes back as a single datagram and is subject to the datagram size limit.
    pub datagram: bool,
    pub now: KerberosTime,
    pub usec: u32,
}

impl RequestInfo {
    pub fn new(peer: Option<SocketAddr>, datagram: bool) -> Self {
        let (now, usec) = KerberosTime::now();

        Self {
            peer,
            datagram,
            now,
            usec,
        }
    }

    #[must_use]
    pub fn at(mut self, now: KerberosTime) -> Self {
        self.now = now;
        self.usec = 0;
        self
    }

    pub fn peer_display(&self) -> PeerDisplay<'_> {
        PeerDisplay(self.peer.as_ref())
    }
}

pub struct PeerDisplay<'a>(Option<&'a SocketAddr>);

impl fmt::Display for PeerDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "<unknown>"),
        }
    }
}

/// What the transport should do with a processed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Send these bytes back (an AS-REP or a KRB-ERROR).
    Reply(Vec<u8>),
    /// The principal is not serviced by this KDC; the request must be proxied elsewhere.
    NotFoundHere,
    /// Nothing to send: the input was not an AS-REQ, or no reply could be encoded.
    NoReply,
}
