//! Stream framings: 4-byte length prefix, or a request wrapped in an HTTP `GET`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{ServerError, ServerErrorKind, ServerResult};

const HTTP_GET: &[u8] = b"GET ";
const HTTP_TERMINATOR: &[u8] = b"\r\n\r\n";

const HTTP_OK: &str = concat!(
    "HTTP/1.1 200 OK\r\n",
    "Server: IronKDC/",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Cache-Control: no-cache\r\n",
    "Pragma: no-cache\r\n",
    "Content-type: application/octet-stream\r\n",
    "Content-transfer-encoding: binary\r\n",
    "\r\n",
);

pub(crate) const HTTP_NOT_FOUND: &[u8] = concat!(
    "HTTP/1.1 404 Not found\r\n",
    "Server: IronKDC/",
    env!("CARGO_PKG_VERSION"),
    "\r\n",
    "Cache-Control: no-cache\r\n",
    "Pragma: no-cache\r\n",
    "Content-type: text/html\r\n",
    "Content-transfer-encoding: 8bit\r\n",
    "\r\n",
    "<TITLE>404 Not found</TITLE>\r\n",
    "<H1>404 Not found</H1>\r\n",
    "This is a Kerberos KDC. Send a base64 encoded KDC request as the request path.\r\n",
)
.as_bytes();

/// What the buffered bytes of a stream connection amount to so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep reading.
    Incomplete,
    /// A complete request, framing removed.
    Request { payload: Vec<u8>, http: bool },
    /// A malformed HTTP request; answer with a 404 page.
    HttpNotFound(&'static str),
    /// Not a framing this KDC speaks. A set high bit on the first byte marks a
    /// TCP extension request, which is answered with `KRB_ERR_FIELD_TOOLONG`.
    Unsupported { extension: bool },
}

/// Tries to extract one complete request from the bytes received on a connection.
pub fn parse_frame(buf: &[u8], enable_http: bool) -> Frame {
    if buf.len() > 4 && buf[0] == 0 {
        return parse_length_prefixed(buf);
    }

    if enable_http && looks_like_http(buf) {
        return match buf.strip_suffix(HTTP_TERMINATOR) {
            Some(head) if buf.len() >= HTTP_GET.len() => parse_http(head),
            _ => Frame::Incomplete,
        };
    }

    if buf.len() > 4 {
        debug!(first = buf[0], "TCP data of strange type");
        return Frame::Unsupported {
            extension: buf[0] & 0x80 != 0,
        };
    }

    Frame::Incomplete
}

fn looks_like_http(buf: &[u8]) -> bool {
    let n = buf.len().min(HTTP_GET.len());
    buf[..n] == HTTP_GET[..n]
}

fn parse_length_prefixed(buf: &[u8]) -> Frame {
    let (header, body) = buf.split_at(4);
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

    match usize::try_from(declared) {
        Ok(len) if body.len() >= len => Frame::Request {
            payload: body[..len].to_vec(),
            http: false,
        },
        _ => Frame::Incomplete,
    }
}

fn parse_http(head: &[u8]) -> Frame {
    let Ok(head) = core::str::from_utf8(head) else {
        return Frame::HttpNotFound("request is not text");
    };

    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split([' ', '\t']).filter(|part| !part.is_empty());

    if parts.next() != Some("GET") {
        return Frame::HttpNotFound("missing GET");
    }

    let Some(path) = parts.next() else {
        return Frame::HttpNotFound("missing HTTP operand (GET)");
    };

    let encoded = path.strip_prefix('/').unwrap_or(path);
    let Ok(payload) = STANDARD.decode(encoded) else {
        return Frame::HttpNotFound("failed to base64 decode request");
    };

    match parts.next() {
        Some(version) if version.starts_with("HTTP/1.") => Frame::Request { payload, http: true },
        Some(_) => Frame::HttpNotFound("unsupported HTTP version"),
        None => Frame::HttpNotFound("missing HTTP version"),
    }
}

/// Frames a reply for a stream connection: length prefix, behind the HTTP headers if the request came that way.
pub fn frame_reply(reply: &[u8], http: bool) -> ServerResult<Vec<u8>> {
    let len = u32::try_from(reply.len())
        .map_err(|_| ServerError::new("frame reply", ServerErrorKind::ReplyTooLarge(reply.len())))?;

    let mut framed = Vec::with_capacity(HTTP_OK.len() + 4 + reply.len());
    if http {
        framed.extend_from_slice(HTTP_OK.as_bytes());
    }
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(reply);

    Ok(framed)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn prefixed(body: &[u8]) -> Vec<u8> {
        frame_reply(body, false).unwrap()
    }

    #[test]
    fn length_prefix_is_stripped() {
        let frame = parse_frame(&prefixed(b"\x6a\x03abc"), true);

        assert_eq!(
            frame,
            Frame::Request {
                payload: b"\x6a\x03abc".to_vec(),
                http: false
            }
        );
    }

    #[test]
    fn trailing_bytes_after_the_declared_length_are_ignored() {
        let mut buf = prefixed(b"abcd");
        buf.extend_from_slice(b"garbage");

        assert_eq!(
            parse_frame(&buf, true),
            Frame::Request {
                payload: b"abcd".to_vec(),
                http: false
            }
        );
    }

    #[rstest]
    #[case(b"")]
    #[case(b"\x00\x00")]
    #[case(b"\x00\x00\x00\x05")]
    #[case(b"\x00\x00\x00\x05abcd")]
    #[case(b"GE")]
    #[case(b"GET /YWJj HTTP/1.1\r\n")]
    fn waits_for_more(#[case] buf: &[u8]) {
        assert_eq!(parse_frame(buf, true), Frame::Incomplete);
    }

    #[test]
    fn http_request_is_decoded() {
        let frame = parse_frame(b"GET /YWJjZA== HTTP/1.1\r\nHost: kdc\r\n\r\n", true);

        assert_eq!(
            frame,
            Frame::Request {
                payload: b"abcd".to_vec(),
                http: true
            }
        );
    }

    #[rstest]
    #[case(b"GET HTTP/1.1\r\n\r\n", "failed to base64 decode request")]
    #[case(b"GET /!!!! HTTP/1.1\r\n\r\n", "failed to base64 decode request")]
    #[case(b"GET /YWJjZA==\r\n\r\n", "missing HTTP version")]
    #[case(b"GET /YWJjZA== SPDY/3\r\n\r\n", "unsupported HTTP version")]
    #[case(b"GET \r\n\r\n", "missing HTTP operand (GET)")]
    fn bad_http_gets_not_found(#[case] buf: &[u8], #[case] reason: &'static str) {
        assert_eq!(parse_frame(buf, true), Frame::HttpNotFound(reason));
    }

    #[test]
    fn http_can_be_disabled() {
        assert_eq!(
            parse_frame(b"GET /YWJjZA== HTTP/1.1\r\n\r\n", false),
            Frame::Unsupported { extension: false }
        );
    }

    #[rstest]
    #[case(b"\x80\x00\x00\x00\x01", true)]
    #[case(b"\xff\xff\xff\xff\xff", true)]
    #[case(b"hello", false)]
    fn strange_data(#[case] buf: &[u8], #[case] extension: bool) {
        assert_eq!(parse_frame(buf, true), Frame::Unsupported { extension });
    }

    #[test]
    fn http_reply_carries_headers_then_the_prefixed_body() {
        let framed = frame_reply(b"xyz", true).unwrap();

        assert!(framed.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(framed.ends_with(b"\r\n\r\n\x00\x00\x00\x03xyz"));
    }

    proptest! {
        #[test]
        fn split_reads_yield_one_identical_request(
            body in proptest::collection::vec(any::<u8>(), 1..512),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let message = prefixed(&body);
            let mut cuts: Vec<usize> = cuts.iter().map(|cut| cut.index(message.len())).collect();
            cuts.push(message.len());
            cuts.sort_unstable();
            cuts.dedup();

            let mut buf = Vec::new();
            let mut start = 0;
            let mut requests = Vec::new();

            for cut in cuts {
                buf.extend_from_slice(&message[start..cut]);
                start = cut;

                match parse_frame(&buf, true) {
                    Frame::Incomplete => {}
                    frame => {
                        requests.push(frame);
                        break;
                    }
                }
            }

            prop_assert_eq!(requests, vec![parse_frame(&message, true)]);
            prop_assert_eq!(
                parse_frame(&message, true),
                Frame::Request { payload: body, http: false }
            );
        }
    }
}
