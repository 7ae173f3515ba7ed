use bitflags::bitflags;

bitflags! {
    /// https://httpwg.org/specs/rfc7540.html#DATA
    #[repr(transparent)]
    pub struct DataFlags: u8 {
        /// Last frame the sender will emit on this stream; moves the
        /// stream into a half-closed or closed state.
        const END_STREAM = 0x1;
        /// Pad Length field and trailing padding are present.
        const PADDED = 0x8;
    }

    /// https://httpwg.org/specs/rfc7540.html#HEADERS
    #[repr(transparent)]
    pub struct HeadersFlags: u8 {
        /// Signals the end of the stream. CONTINUATION frames may still
        /// follow; they are logically part of this HEADERS frame.
        const END_STREAM = 0x1;
        /// The frame carries a complete header block. Without this flag a
        /// CONTINUATION on the same stream MUST come next; any other
        /// frame is a connection error of type PROTOCOL_ERROR.
        const END_HEADERS = 0x4;
        /// Pad Length field and trailing padding are present.
        const PADDED = 0x8;
        /// Exclusive flag, stream dependency and weight precede the
        /// fragment (5 octets).
        const PRIORITY = 0x20;
    }

    /// https://httpwg.org/specs/rfc7540.html#SETTINGS
    #[repr(transparent)]
    pub struct SettingsFlags: u8 {
        /// Acknowledges the peer's SETTINGS. The payload MUST be empty;
        /// otherwise it is a connection error of type FRAME_SIZE_ERROR.
        const ACK = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#PING
    #[repr(transparent)]
    pub struct PingFlags: u8 {
        /// Marks a PING response. An endpoint MUST NOT respond to a PING
        /// carrying this flag.
        const ACK = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#CONTINUATION
    #[repr(transparent)]
    pub struct ContinuationFlags: u8 {
        /// This frame ends the header block.
        const END_HEADERS = 0x4;
    }
}

