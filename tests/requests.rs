mod common;

use common::*;
use h2d::ProtocolHandler;

#[test]
fn basic_get_round_trip() {
    let mut handler = ProtocolHandler::with_echo_handler();

    // preface + the literal empty SETTINGS frame from the wire
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert!(handler.process_data(&bytes));
    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].ty, SETTINGS);
    assert_eq!(frames[1].ty, SETTINGS);
    assert_eq!(frames[1].flags, FLAG_ACK);

    let mut encoder = hpack::Encoder::new();
    let mut decoder = hpack::Decoder::new();
    let block = encode_request(&mut encoder, "GET", "/", &[]);
    assert!(handler.process_data(&frame(
        HEADERS,
        FLAG_END_STREAM | FLAG_END_HEADERS,
        1,
        &block,
    )));

    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 2, "{:?}", frames);
    assert_eq!(frames[0].ty, HEADERS);
    assert_eq!(frames[0].stream, 1);
    assert_eq!(frames[0].flags, FLAG_END_HEADERS);
    let (status, headers) = decode_response(&mut decoder, &frames[0].payload);
    assert_eq!(status, "200");
    assert!(headers.contains(&("content-type".to_owned(), "text/plain".to_owned())));
    assert!(headers.contains(&("content-length".to_owned(), "1".to_owned())));

    assert_eq!(frames[1].ty, DATA);
    assert_eq!(frames[1].stream, 1);
    assert_eq!(frames[1].flags, FLAG_END_STREAM);
    assert_eq!(frames[1].payload, b"/");

    // stream fully drained and forgotten
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn request_survives_byte_by_byte_delivery() {
    let mut handler = ProtocolHandler::with_echo_handler();
    let mut encoder = hpack::Encoder::new();

    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(&[]));
    let block = encode_request(&mut encoder, "GET", "/trickle", &[]);
    bytes.extend_from_slice(&frame(HEADERS, FLAG_END_STREAM | FLAG_END_HEADERS, 1, &block));

    for byte in bytes {
        assert!(handler.process_data(&[byte]));
    }
    let frames = drain(&mut handler);
    // SETTINGS, ACK, HEADERS, DATA
    assert_eq!(frames.len(), 4, "{:?}", frames);
    assert_eq!(frames[3].payload, b"/trickle");
}

#[test]
fn post_with_body_answers_after_data() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();

    let block = encode_request(&mut encoder, "POST", "/submit", &[("content-length", "5")]);
    assert!(handler.process_data(&frame(HEADERS, FLAG_END_HEADERS, 1, &block)));
    // headers alone produce no response yet
    assert!(drain(&mut handler).is_empty());

    assert!(handler.process_data(&frame(DATA, FLAG_END_STREAM, 1, b"hello")));
    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].ty, HEADERS);
    assert_eq!(frames[1].ty, DATA);
    assert_eq!(frames[1].payload, b"/submit");

    // five body bytes were debited from the connection window, but the
    // 50% threshold is far away so no WINDOW_UPDATE was emitted
    assert_eq!(handler.connection().recv_window, 65_535 - 5);
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn concurrent_streams_answer_in_order() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();

    for stream in [1u32, 3, 5] {
        let path = format!("/s{}", stream);
        let block = encode_request(&mut encoder, "GET", &path, &[]);
        assert!(handler.process_data(&frame(
            HEADERS,
            FLAG_END_STREAM | FLAG_END_HEADERS,
            stream,
            &block,
        )));
    }

    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 6, "{:?}", frames);
    for (pair, stream) in frames.chunks(2).zip([1u32, 3, 5]) {
        assert_eq!(pair[0].ty, HEADERS);
        assert_eq!(pair[0].stream, stream);
        assert_eq!(pair[1].ty, DATA);
        assert_eq!(pair[1].stream, stream);
        assert_eq!(pair[1].payload, format!("/s{}", stream).as_bytes());
    }
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn trailers_are_accepted_and_discarded() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();

    let block = encode_request(&mut encoder, "POST", "/upload", &[]);
    assert!(handler.process_data(&frame(HEADERS, FLAG_END_HEADERS, 1, &block)));
    assert!(handler.process_data(&frame(DATA, 0, 1, b"chunk")));

    let trailers = encoder.encode(vec![(&b"x-checksum"[..], &b"abc123"[..])]);
    assert!(handler.process_data(&frame(
        HEADERS,
        FLAG_END_STREAM | FLAG_END_HEADERS,
        1,
        &trailers,
    )));

    let frames = drain(&mut handler);
    assert_eq!(frames.last().unwrap().payload, b"/upload");
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn ping_is_echoed_with_ack() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);

    let opaque = [1u8, 2, 3, 4, 5, 6, 7, 8];
    assert!(handler.process_data(&frame(PING, 0, 0, &opaque)));
    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ty, PING);
    assert_eq!(frames[0].flags, FLAG_ACK);
    assert_eq!(frames[0].payload, opaque);

    // a PING that is itself an ACK is ignored
    assert!(handler.process_data(&frame(PING, FLAG_ACK, 0, &opaque)));
    assert!(drain(&mut handler).is_empty());
}

#[test]
fn priority_frames_are_accepted_everywhere() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);

    // priority for a stream that does not exist yet
    let mut payload = 3u32.to_be_bytes().to_vec();
    payload.push(42);
    assert!(handler.process_data(&frame(PRIORITY, 0, 7, &payload)));
    assert!(drain(&mut handler).is_empty());
}
