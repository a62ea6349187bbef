use base64::Engine as _;
use ironkdc_as::ProcessOutcome;
use ironkdc_pdu::ErrorCode;
use ironkdc_server::framing::{frame_reply, parse_frame, Frame};
use ironkdc_testsuite::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn length_prefixed(payload: &[u8]) -> Vec<u8> {
    let mut framed = u32::try_from(payload.len()).unwrap().to_be_bytes().to_vec();
    framed.extend_from_slice(payload);
    framed
}

fn http_get(payload: &[u8]) -> Vec<u8> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
    format!("GET /{encoded} HTTP/1.1\r\nHost: kdc.example.com\r\n\r\n").into_bytes()
}

#[track_caller]
fn request(frame: Frame) -> (Vec<u8>, bool) {
    match frame {
        Frame::Request { payload, http } => (payload, http),
        other => panic!("expected a request, got {other:?}"),
    }
}

#[test]
fn length_prefixed_request_reaches_the_kdc() {
    let raw = as_req(Vec::new(), body("alice"));

    let (payload, http) = request(parse_frame(&length_prefixed(&raw), false));
    assert!(!http);

    let error = krb_error(kdc().process(&payload, &info()));
    assert_eq!(error.error_code, ErrorCode::PREAUTH_REQUIRED);
}

#[test]
fn http_request_reaches_the_kdc() {
    let raw = as_req(vec![enc_timestamp(&alice_key(), NOW)], body("alice"));

    let (payload, http) = request(parse_frame(&http_get(&raw), true));
    assert!(http);
    assert_eq!(payload, raw);

    let ProcessOutcome::Reply(reply) = kdc().process(&payload, &info()) else {
        panic!("no reply");
    };

    let framed = frame_reply(&reply, true).unwrap();
    let text_end = framed.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert!(framed.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert_eq!(framed[text_end..], length_prefixed(&reply)[..]);
}

#[test]
fn http_is_refused_when_disabled() {
    let raw = as_req(Vec::new(), body("alice"));
    assert_eq!(
        parse_frame(&http_get(&raw), false),
        Frame::Unsupported { extension: false }
    );
}

proptest! {
    #[test]
    fn request_arrives_whole_whatever_the_split(split in 0_usize..1024, http in any::<bool>()) {
        let raw = as_req(Vec::new(), body("alice"));
        let framed = if http { http_get(&raw) } else { length_prefixed(&raw) };
        let split = split.min(framed.len() - 1);

        prop_assert_eq!(parse_frame(&framed[..split], http), Frame::Incomplete);
        prop_assert_eq!(parse_frame(&framed, http), Frame::Request { payload: raw, http });
    }
}
