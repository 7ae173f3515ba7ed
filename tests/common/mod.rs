//! Byte-level test client: builds wire frames by hand and reads the
//! handler's write vector back as frames. Header blocks go through the
//! `hpack` crate so the server is checked against an independent codec.

#![allow(dead_code)]

use h2d::ProtocolHandler;

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const PRIORITY: u8 = 0x2;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const PING: u8 = 0x6;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;
pub const CONTINUATION: u8 = 0x9;

pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;

#[derive(Debug, Clone)]
pub struct RawFrame {
    pub ty: u8,
    pub flags: u8,
    pub stream: u32,
    pub payload: Vec<u8>,
}

pub fn frame(ty: u8, flags: u8, stream: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(9 + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    bytes.push(ty);
    bytes.push(flags);
    bytes.extend_from_slice(&stream.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

pub fn settings_frame(params: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(params.len() * 6);
    for &(key, value) in params {
        payload.extend_from_slice(&key.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame(SETTINGS, 0, 0, &payload)
}

pub fn window_update(stream: u32, increment: u32) -> Vec<u8> {
    frame(WINDOW_UPDATE, 0, stream, &increment.to_be_bytes())
}

pub fn rst_stream(stream: u32, code: u32) -> Vec<u8> {
    frame(RST_STREAM, 0, stream, &code.to_be_bytes())
}

/// Splits the handler's queued output into frames, consuming it.
pub fn drain(handler: &mut ProtocolHandler) -> Vec<RawFrame> {
    let bytes = handler.get_write_data().to_vec();
    handler.consume_write_data(bytes.len());
    parse_frames(&bytes)
}

pub fn parse_frames(mut bytes: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        assert!(bytes.len() >= 9, "trailing partial frame header");
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
        assert!(bytes.len() >= 9 + length, "trailing partial frame payload");
        frames.push(RawFrame {
            ty: bytes[3],
            flags: bytes[4],
            stream: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff,
            payload: bytes[9..9 + length].to_vec(),
        });
        bytes = &bytes[9 + length..];
    }
    frames
}

/// Runs the connection bootstrap: preface plus a client SETTINGS frame,
/// asserting the server answers with its own SETTINGS and an ACK.
pub fn handshake_with(handler: &mut ProtocolHandler, params: &[(u16, u32)]) {
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&settings_frame(params));
    assert!(handler.process_data(&bytes));
    let frames = drain(handler);
    assert_eq!(frames.len(), 2, "expected SETTINGS + ACK, got {:?}", frames);
    assert_eq!(frames[0].ty, SETTINGS);
    assert_eq!(frames[0].flags & FLAG_ACK, 0);
    assert_eq!(frames[1].ty, SETTINGS);
    assert_eq!(frames[1].flags & FLAG_ACK, FLAG_ACK);
    assert!(frames[1].payload.is_empty());
}

pub fn handshake(handler: &mut ProtocolHandler) {
    handshake_with(handler, &[]);
}

/// Client-side header block via the reference encoder.
pub fn encode_request(
    encoder: &mut hpack::Encoder<'_>,
    method: &str,
    path: &str,
    extra: &[(&str, &str)],
) -> Vec<u8> {
    let mut headers: Vec<(&[u8], &[u8])> = vec![
        (b":method", method.as_bytes()),
        (b":scheme", b"http"),
        (b":path", path.as_bytes()),
        (b":authority", b"localhost"),
    ];
    for (name, value) in extra {
        headers.push((name.as_bytes(), value.as_bytes()));
    }
    encoder.encode(headers)
}

/// Decodes a response header block and returns (status, headers).
pub fn decode_response(
    decoder: &mut hpack::Decoder<'_>,
    block: &[u8],
) -> (String, Vec<(String, String)>) {
    let fields = decoder.decode(block).expect("response block decodes");
    let mut status = None;
    let mut headers = Vec::new();
    for (name, value) in fields {
        let name = String::from_utf8(name).unwrap();
        let value = String::from_utf8(value).unwrap();
        if name == ":status" {
            status = Some(value);
        } else {
            headers.push((name, value));
        }
    }
    (status.expect(":status present"), headers)
}
