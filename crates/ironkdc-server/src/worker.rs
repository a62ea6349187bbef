use core::any::Any;
use core::future::poll_fn;
use core::panic::AssertUnwindSafe;
use core::task::{Context, Poll};
use core::time::Duration;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use ironkdc_as::{Kdc, ProcessOutcome, RequestInfo};
use ironkdc_pdu::ErrorCode;
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionTable};
use crate::framing::{self, Frame};
use crate::socket::WorkerSockets;
use crate::{LimitsConfig, ServerConfig};

const READ_CHUNK: usize = 4096;

/// Per-worker knobs derived from the daemon configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerOptions {
    pub(crate) limits: LimitsConfig,
    pub(crate) enable_http: bool,
    /// Length-prefix datagram replies as if they were sent over TCP.
    pub(crate) prepend_length: bool,
}

impl WorkerOptions {
    pub(crate) fn new(config: &ServerConfig, prepend_length: bool) -> Self {
        Self {
            limits: config.limits,
            enable_http: config.listen.enable_http,
            prepend_length,
        }
    }
}

enum Event {
    Datagram(usize),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Readable(usize),
}

enum ReadOutcome {
    Data,
    Closed,
    Nothing,
    Failed(io::Error),
}

/// One worker: a single task multiplexing every socket, serving one request at a time.
pub(crate) struct Worker {
    id: usize,
    kdc: Arc<Kdc>,
    options: WorkerOptions,
    sockets: WorkerSockets,
    connections: ConnectionTable<TcpStream>,
    datagram: Vec<u8>,
    liveness: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        kdc: Arc<Kdc>,
        options: WorkerOptions,
        sockets: WorkerSockets,
        liveness: CancellationToken,
    ) -> Self {
        Self {
            id,
            kdc,
            connections: ConnectionTable::new(options.limits.connection_grow_step, options.limits.max_connections),
            datagram: vec![0; options.limits.max_request_udp],
            options,
            sockets,
            liveness,
        }
    }

    pub(crate) async fn run(mut self) {
        let idle_timeout = self.options.limits.idle_timeout();

        info!(worker = self.id, "Worker started");

        loop {
            let events = tokio::select! {
                biased;
                () = self.liveness.cancelled() => break,
                events = poll_fn(|cx| self.poll_events(cx)) => events,
                () = tokio::time::sleep(idle_timeout) => Vec::new(),
            };

            for connection in self.connections.sweep(Instant::now()) {
                warn!(
                    worker = self.id,
                    peer = %connection.peer,
                    len = connection.buf.len(),
                    "Connection timed out"
                );
            }

            for event in events {
                match event {
                    Event::Datagram(index) => self.handle_datagram(index).await,
                    Event::Accepted(Ok((stream, peer))) => self.accept(stream, peer),
                    Event::Accepted(Err(error)) => {
                        if !is_transient(&error) {
                            warn!(worker = self.id, %error, "Failed to accept connection");
                        }
                    }
                    Event::Readable(key) => self.handle_stream(key).await,
                }
            }
        }

        info!(worker = self.id, open = self.connections.len(), "Worker stopped");
    }

    fn poll_events(&self, cx: &mut Context<'_>) -> Poll<Vec<Event>> {
        let mut events = Vec::new();

        for (index, socket) in self.sockets.udp.iter().enumerate() {
            if socket.poll_recv_ready(cx).is_ready() {
                events.push(Event::Datagram(index));
            }
        }

        for listener in &self.sockets.tcp {
            if let Poll::Ready(accepted) = listener.poll_accept(cx) {
                events.push(Event::Accepted(accepted));
            }
        }

        for (key, connection) in self.connections.iter() {
            if connection.stream.poll_read_ready(cx).is_ready() {
                events.push(Event::Readable(key));
            }
        }

        if events.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(events)
        }
    }

    async fn handle_datagram(&mut self, index: usize) {
        let Some(socket) = self.sockets.udp.get(index) else {
            return;
        };

        let (len, peer) = match socket.try_recv_from(&mut self.datagram) {
            Ok(received) => received,
            Err(error) if is_transient(&error) => return,
            Err(error) => {
                warn!(worker = self.id, %error, "Failed to receive datagram");
                return;
            }
        };

        let info = RequestInfo::new(Some(peer), true);

        let reply = if len == self.options.limits.max_request_udp {
            debug!(worker = self.id, %peer, len, "Datagram fills the receive buffer, asking the client to use TCP");
            self.kdc.transport_error(ErrorCode::RESPONSE_TOO_BIG, &info)
        } else {
            trace!(worker = self.id, %peer, len, "Datagram received");

            let request = &self.datagram[..len];
            match guarded(&info, || self.kdc.process(request, &info)) {
                ProcessOutcome::Reply(bytes) => Some(bytes),
                ProcessOutcome::NotFoundHere | ProcessOutcome::NoReply => None,
            }
        };

        let Some(reply) = reply else {
            return;
        };

        let reply = if self.options.prepend_length {
            match framing::frame_reply(&reply, false) {
                Ok(framed) => framed,
                Err(e) => {
                    error!(worker = self.id, error = %e.report(), "Failed to frame datagram reply");
                    return;
                }
            }
        } else {
            reply
        };

        match socket.send_to(&reply, peer).await {
            Ok(sent) => trace!(worker = self.id, %peer, len = sent, "Datagram reply sent"),
            Err(error) => warn!(worker = self.id, %peer, %error, "Failed to send datagram reply"),
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let connection = Connection {
            stream,
            peer,
            buf: Vec::new(),
            deadline: Instant::now() + self.options.limits.idle_timeout(),
        };

        match self.connections.insert(connection) {
            Ok(key) => trace!(worker = self.id, %peer, key, "Connection accepted"),
            Err(_) => warn!(
                worker = self.id,
                %peer,
                max = self.options.limits.max_connections,
                "Connection table full, dropping connection"
            ),
        }
    }

    async fn handle_stream(&mut self, key: usize) {
        let max = self.options.limits.max_request_tcp;

        let Some(connection) = self.connections.get_mut(key) else {
            return;
        };
        let peer = connection.peer;

        match read_available(connection) {
            ReadOutcome::Data => {}
            ReadOutcome::Nothing => return,
            ReadOutcome::Closed => {
                debug!(worker = self.id, %peer, len = connection.buf.len(), "Connection closed by peer");
                self.connections.remove(key);
                return;
            }
            ReadOutcome::Failed(error) => {
                warn!(worker = self.id, %peer, %error, "Failed to read from connection");
                self.connections.remove(key);
                return;
            }
        }

        if connection.buf.len() > max {
            warn!(worker = self.id, %peer, len = connection.buf.len(), max, "Request exceeds max request size");
            self.connections.remove(key);
            return;
        }

        let frame = framing::parse_frame(&connection.buf, self.options.enable_http);
        if frame == Frame::Incomplete {
            return;
        }

        let Some(mut connection) = self.connections.remove(key) else {
            return;
        };

        if let Some(reply) = self.stream_reply(frame, peer) {
            send_and_close(&mut connection.stream, &reply, self.options.limits.idle_timeout()).await;
        }
    }

    fn stream_reply(&self, frame: Frame, peer: SocketAddr) -> Option<Vec<u8>> {
        let info = RequestInfo::new(Some(peer), false);

        let (reply, http) = match frame {
            Frame::Incomplete => return None,
            Frame::Request { payload, http } => {
                trace!(worker = self.id, %peer, len = payload.len(), http, "Stream request received");

                match guarded(&info, || self.kdc.process(&payload, &info)) {
                    ProcessOutcome::Reply(bytes) => (bytes, http),
                    ProcessOutcome::NotFoundHere | ProcessOutcome::NoReply => return None,
                }
            }
            Frame::HttpNotFound(reason) => {
                info!(worker = self.id, %peer, reason, "Malformed HTTP request");
                return Some(framing::HTTP_NOT_FOUND.to_vec());
            }
            Frame::Unsupported { extension: true } => {
                info!(worker = self.id, %peer, "TCP extension not supported");
                (self.kdc.transport_error(ErrorCode::FIELD_TOOLONG, &info)?, false)
            }
            Frame::Unsupported { extension: false } => {
                info!(worker = self.id, %peer, "TCP data of strange type");
                return None;
            }
        };

        match framing::frame_reply(&reply, http) {
            Ok(framed) => Some(framed),
            Err(e) => {
                error!(worker = self.id, error = %e.report(), "Failed to frame stream reply");
                None
            }
        }
    }
}

fn read_available(connection: &mut Connection<TcpStream>) -> ReadOutcome {
    connection.buf.reserve(READ_CHUNK);

    match connection.stream.try_read_buf(&mut connection.buf) {
        Ok(0) => ReadOutcome::Closed,
        Ok(n) => {
            trace!(peer = %connection.peer, n, total = connection.buf.len(), "Read from connection");
            ReadOutcome::Data
        }
        Err(error) if is_transient(&error) => ReadOutcome::Nothing,
        Err(error) => ReadOutcome::Failed(error),
    }
}

async fn send_and_close(stream: &mut TcpStream, reply: &[u8], timeout: Duration) {
    match tokio::time::timeout(timeout, stream.write_all(reply)).await {
        Ok(Ok(())) => trace!(len = reply.len(), "Stream reply sent"),
        Ok(Err(error)) => warn!(%error, "Failed to send stream reply"),
        Err(_) => warn!(len = reply.len(), "Timed out sending stream reply"),
    }

    if let Err(error) = stream.shutdown().await {
        debug!(%error, "Failed to shut down connection");
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/// Runs one request, turning a panic into "no reply" so the worker keeps serving.
fn guarded(info: &RequestInfo, process: impl FnOnce() -> ProcessOutcome) -> ProcessOutcome {
    match std::panic::catch_unwind(AssertUnwindSafe(process)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            error!(
                peer = %info.peer_display(),
                panic = panic_message(payload.as_ref()),
                "Request processing panicked"
            );
            ProcessOutcome::NoReply
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_no_reply() {
        let info = RequestInfo::new(None, true);

        #[expect(clippy::panic, reason = "the panic is what is being tested")]
        let outcome = guarded(&info, || panic!("boom"));

        assert_eq!(outcome, ProcessOutcome::NoReply);
    }

    #[test]
    fn outcomes_pass_through() {
        let info = RequestInfo::new(None, false);
        let outcome = guarded(&info, || ProcessOutcome::Reply(vec![1, 2, 3]));
        assert_eq!(outcome, ProcessOutcome::Reply(vec![1, 2, 3]));
    }

    #[test]
    fn panic_messages() {
        let formatted: Box<dyn Any + Send> = Box::new(format!("index {} out of range", 7));
        let literal: Box<dyn Any + Send> = Box::new("literal");
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(formatted.as_ref()), "index 7 out of range");
        assert_eq!(panic_message(literal.as_ref()), "literal");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
