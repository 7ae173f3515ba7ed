mod common;

use common::*;
use h2d::ProtocolHandler;

const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;

#[test]
fn response_parks_behind_a_small_window() {
    let mut handler = ProtocolHandler::with_echo_handler();
    // the client only grants 100 bytes of stream window
    handshake_with(&mut handler, &[(SETTINGS_INITIAL_WINDOW_SIZE, 100)]);
    let mut encoder = hpack::Encoder::new();

    // a path long enough that the echoed body exceeds the window
    let path = format!("/{}", "x".repeat(299));
    let block = encode_request(&mut encoder, "GET", &path, &[]);
    assert!(handler.process_data(&frame(
        HEADERS,
        FLAG_END_STREAM | FLAG_END_HEADERS,
        1,
        &block,
    )));

    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 2, "{:?}", frames);
    assert_eq!(frames[0].ty, HEADERS);
    assert_eq!(frames[1].ty, DATA);
    assert_eq!(frames[1].payload.len(), 100);
    assert_eq!(frames[1].flags & FLAG_END_STREAM, 0);
    // the residual is parked, the stream stays
    assert_eq!(handler.connection().stream_count(), 1);

    // fresh credit releases the rest in one frame with END_STREAM
    assert!(handler.process_data(&window_update(1, 1000)));
    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ty, DATA);
    assert_eq!(frames[0].payload.len(), 200);
    assert_eq!(frames[0].flags, FLAG_END_STREAM);
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn stream_window_updates_release_parked_streams() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake_with(&mut handler, &[(SETTINGS_INITIAL_WINDOW_SIZE, 10)]);
    let mut encoder = hpack::Encoder::new();

    for stream in [1u32, 3] {
        let path = format!("/{}{}", stream, "y".repeat(30));
        let block = encode_request(&mut encoder, "GET", &path, &[]);
        assert!(handler.process_data(&frame(
            HEADERS,
            FLAG_END_STREAM | FLAG_END_HEADERS,
            stream,
            &block,
        )));
    }
    // both streams sent 10 bytes and parked the rest
    let frames = drain(&mut handler);
    let data: Vec<_> = frames.iter().filter(|f| f.ty == DATA).collect();
    assert_eq!(data.len(), 2);
    assert!(data.iter().all(|f| f.payload.len() == 10));

    // stream-level credit for both, then they finish
    assert!(handler.process_data(&window_update(1, 100)));
    assert!(handler.process_data(&window_update(3, 100)));
    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].stream, 1);
    assert_eq!(frames[0].flags, FLAG_END_STREAM);
    assert_eq!(frames[1].stream, 3);
    assert_eq!(frames[1].flags, FLAG_END_STREAM);
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn connection_window_update_drains_parked_streams_in_id_order() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();

    // 7 responses of 12001 bytes each exhaust the 65535-byte connection
    // send window on the sixth; the sixth parks a tail and the seventh
    // parks whole
    let path = format!("/{}", "p".repeat(12_000));
    for stream in (1u32..=13).step_by(2) {
        let block = encode_request(&mut encoder, "GET", &path, &[]);
        assert!(handler.process_data(&frame(
            HEADERS,
            FLAG_END_STREAM | FLAG_END_HEADERS,
            stream,
            &block,
        )));
    }

    let frames = drain(&mut handler);
    let sent: usize = frames
        .iter()
        .filter(|f| f.ty == DATA)
        .map(|f| f.payload.len())
        .sum();
    assert_eq!(sent, 65_535);
    assert_eq!(handler.connection().stream_count(), 2);

    // one connection-level update releases both, ascending
    assert!(handler.process_data(&window_update(0, 100_000)));
    let frames = drain(&mut handler);
    let data: Vec<_> = frames.iter().filter(|f| f.ty == DATA).collect();
    assert_eq!(data.len(), 2, "{:?}", frames);
    assert_eq!(data[0].stream, 11);
    assert_eq!(data[1].stream, 13);
    assert!(data.iter().all(|f| f.flags & FLAG_END_STREAM != 0));
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn inbound_data_replenishes_windows_past_half() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();

    let block = encode_request(&mut encoder, "POST", "/big", &[]);
    assert!(handler.process_data(&frame(HEADERS, FLAG_END_HEADERS, 1, &block)));

    // three 16000-byte DATA frames take the windows to 17535, crossing
    // the 50% mark of 65535 on the third
    let chunk = vec![0u8; 16_000];
    assert!(handler.process_data(&frame(DATA, 0, 1, &chunk)));
    assert!(handler.process_data(&frame(DATA, 0, 1, &chunk)));
    assert!(drain(&mut handler).is_empty());
    assert!(handler.process_data(&frame(DATA, 0, 1, &chunk)));

    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 2, "{:?}", frames);
    assert_eq!(frames[0].ty, WINDOW_UPDATE);
    assert_eq!(frames[0].stream, 0);
    assert_eq!(frames[0].payload, (48_000u32).to_be_bytes());
    assert_eq!(frames[1].ty, WINDOW_UPDATE);
    assert_eq!(frames[1].stream, 1);
    assert_eq!(frames[1].payload, (48_000u32).to_be_bytes());
    assert_eq!(handler.connection().recv_window, 65_535);

    // finish the request
    assert!(handler.process_data(&frame(DATA, FLAG_END_STREAM, 1, b"")));
    let frames = drain(&mut handler);
    assert_eq!(frames[0].ty, HEADERS);
}

#[test]
fn stream_window_update_overflow_resets_the_stream() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();

    // an open request stream with the default 65535 send window
    let block = encode_request(&mut encoder, "POST", "/w", &[]);
    assert!(handler.process_data(&frame(HEADERS, FLAG_END_HEADERS, 1, &block)));

    // 65535 + 2^31-1 overshoots the window bound
    assert!(handler.process_data(&window_update(1, 0x7fff_ffff)));
    let frames = drain(&mut handler);
    assert_eq!(frames.len(), 1, "{:?}", frames);
    assert_eq!(frames[0].ty, RST_STREAM);
    assert_eq!(frames[0].stream, 1);
    assert_eq!(frames[0].payload, 0x3u32.to_be_bytes()); // FLOW_CONTROL_ERROR
    assert_eq!(handler.connection().stream_count(), 0);
}

#[test]
fn connection_window_update_overflow_is_fatal() {
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);

    assert!(!handler.process_data(&window_update(0, 0x7fff_ffff)));
    let frames = drain(&mut handler);
    assert_eq!(frames.last().unwrap().ty, GOAWAY);
    assert_eq!(
        frames.last().unwrap().payload[4..8],
        0x3u32.to_be_bytes() // FLOW_CONTROL_ERROR
    );
}

#[test]
fn zero_window_increment_is_a_protocol_error() {
    // connection scope
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    assert!(!handler.process_data(&window_update(0, 0)));
    let frames = drain(&mut handler);
    assert_eq!(frames.last().unwrap().ty, GOAWAY);
    assert_eq!(frames.last().unwrap().payload[4..8], 0x1u32.to_be_bytes());

    // stream scope answers with RST_STREAM and keeps the connection
    let mut handler = ProtocolHandler::with_echo_handler();
    handshake(&mut handler);
    let mut encoder = hpack::Encoder::new();
    let block = encode_request(&mut encoder, "POST", "/w", &[]);
    assert!(handler.process_data(&frame(HEADERS, FLAG_END_HEADERS, 1, &block)));
    assert!(handler.process_data(&window_update(1, 0)));
    let frames = drain(&mut handler);
    assert_eq!(frames.last().unwrap().ty, RST_STREAM);
    assert_eq!(frames.last().unwrap().payload, 0x1u32.to_be_bytes());
}
