use num_derive::{FromPrimitive, ToPrimitive};

pub type StreamId = u32;

/// Headers as an ordered list of (name, value) pairs. Order matters to
/// HPACK (pseudo-headers first) so this is not a map.
pub type Headers = Vec<(String, String)>;

/// The 24-byte client connection preface.
pub const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const FRAME_HEADER_LEN: usize = 9;

/// Initial flow-control window, per connection and per stream.
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Largest legal flow-control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = (1 << 31) - 1;

pub const MIN_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorType {
    /// Graceful shutdown; not a failure.
    NoError = 0x0,
    /// The peer violated the protocol and no more specific code applies.
    ProtocolError = 0x1,
    InternalError = 0x2,
    /// The peer ignored our flow-control windows.
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    /// A frame arrived for a stream that is already closed.
    StreamClosed = 0x5,
    /// A frame length violated a size constraint.
    FrameSizeError = 0x6,
    /// The stream was declined before any processing (e.g. over the
    /// concurrency cap); safe for the client to retry.
    RefusedStream = 0x7,
    Cancel = 0x8,
    /// HPACK state can no longer be maintained; always connection-fatal.
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromPrimitive,
    ToPrimitive,
    enum_map::Enum,
)]
#[repr(u16)]
pub enum SettingsParameter {
    /// Maximum size of the peer's HPACK dynamic table, in octets. Initial
    /// value 4,096.
    HeaderTableSize = 0x1,
    /// 0 or 1; any other value is a connection error of type
    /// PROTOCOL_ERROR. Initial value 1.
    EnablePush = 0x2,
    /// Maximum number of streams the sender permits the receiver to
    /// create. Initially unlimited.
    MaxConcurrentStreams = 0x3,
    /// Initial stream-level flow-control window. Values above 2^31-1 are
    /// a connection error of type FLOW_CONTROL_ERROR. Initial value
    /// 65,535.
    InitialWindowSize = 0x4,
    /// Largest frame payload the sender is willing to receive; must stay
    /// within [2^14, 2^24-1]. Initial value 16,384.
    MaxFrameSize = 0x5,
    /// Advisory cap on the uncompressed size of a header list, counting
    /// 32 octets of overhead per field. Initially unlimited.
    MaxHeaderListSize = 0x6,
}

/// Frame-level decode failures, before any stream state is consulted.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("payload is shorter than the frame header claims")]
    PayloadTooShort,
    #[error("payload length violates a fixed size constraint")]
    FrameSize,
    #[error("unexpected stream ID 0")]
    ZeroStreamId,
    #[error("unexpected non-zero stream ID")]
    NonZeroStreamId,
    #[error("unexpected 0 window increment")]
    ZeroWindowIncrement,
    #[error("padding length exceeds the payload")]
    BadPadding,
}

/// A protocol failure tagged with the scope of its wire-level reaction:
/// stream scope answers with RST_STREAM, connection scope with GOAWAY.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum H2Error {
    #[error("stream {0} error: {1:?}")]
    Stream(StreamId, ErrorType),
    #[error("connection error: {0:?}")]
    Connection(ErrorType),
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn frame_type_round_trips_through_wire_byte() {
        for ty in [
            FrameType::Data,
            FrameType::Headers,
            FrameType::Priority,
            FrameType::ResetStream,
            FrameType::Settings,
            FrameType::PushPromise,
            FrameType::Ping,
            FrameType::GoAway,
            FrameType::WindowUpdate,
            FrameType::Continuation,
        ] {
            let byte = ty.to_u8().unwrap();
            assert_eq!(FrameType::from_u8(byte), Some(ty));
        }
        assert_eq!(FrameType::from_u8(0xa), None);
    }

    #[test]
    fn error_codes_match_rfc_values() {
        assert_eq!(ErrorType::ProtocolError.to_u32(), Some(0x1));
        assert_eq!(ErrorType::FlowControlError.to_u32(), Some(0x3));
        assert_eq!(ErrorType::StreamClosed.to_u32(), Some(0x5));
        assert_eq!(ErrorType::FrameSizeError.to_u32(), Some(0x6));
        assert_eq!(ErrorType::RefusedStream.to_u32(), Some(0x7));
        assert_eq!(ErrorType::CompressionError.to_u32(), Some(0x9));
    }
}
