use crate::{flags::*, types::*};
use bytes::{BufMut, Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};
use std::num::NonZeroU32;

/// The fixed 9-byte frame header.
///
/// `ty` is `None` for frame types this implementation does not know;
/// those frames are skipped, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub ty: Option<FrameType>,
    pub raw_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Returns `None` while fewer than 9 bytes are available.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        let raw_type = bytes[3];
        Some(Self {
            length,
            ty: FrameType::from_u8(raw_type),
            raw_type,
            flags: bytes[4],
            // the reserved high bit is ignored on reception
            stream_id: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]])
                & (u32::MAX >> 1),
        })
    }

    fn write_into(buf: &mut BytesMut, length: usize, ty: u8, flags: u8, stream_id: StreamId) {
        debug_assert!(length <= MAX_MAX_FRAME_SIZE as usize);
        buf.put_slice(&(length as u32).to_be_bytes()[1..]);
        buf.put_u8(ty);
        buf.put_u8(flags);
        // reserved bit cleared on emission
        buf.put_u32(stream_id & (u32::MAX >> 1));
    }
}

/// PRIORITY payload; also embedded in HEADERS when the PRIORITY flag is
/// set. Stored but never used for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: StreamId,
    pub weight: u8,
}

impl Priority {
    fn parse(bytes: &[u8]) -> Self {
        let dependency = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Self {
            exclusive: dependency & (1 << 31) != 0,
            dependency: dependency & (u32::MAX >> 1),
            weight: bytes[4],
        }
    }

    fn write_into(&self, buf: &mut BytesMut) {
        let mut dependency = self.dependency & (u32::MAX >> 1);
        if self.exclusive {
            dependency |= 1 << 31;
        }
        buf.put_u32(dependency);
        buf.put_u8(self.weight);
    }
}

/// One HTTP/2 frame, decoded. Padding is stripped on parse and is never
/// emitted, so `write` of a parsed padded frame yields the unpadded
/// equivalent; all other frames round-trip byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream: StreamId,
        flags: DataFlags,
        data: Bytes,
    },
    Headers {
        stream: StreamId,
        flags: HeadersFlags,
        priority: Option<Priority>,
        fragment: Bytes,
    },
    Priority {
        stream: StreamId,
        priority: Priority,
    },
    ResetStream {
        stream: StreamId,
        error: ErrorType,
    },
    Settings {
        flags: SettingsFlags,
        params: Vec<(SettingsParameter, u32)>,
    },
    PushPromise {
        stream: StreamId,
        promised: StreamId,
        fragment: Bytes,
    },
    Ping {
        flags: PingFlags,
        data: [u8; 8],
    },
    GoAway {
        last_stream: StreamId,
        error: ErrorType,
        debug: Bytes,
    },
    WindowUpdate {
        stream: StreamId,
        increment: NonZeroU32,
    },
    Continuation {
        stream: StreamId,
        flags: ContinuationFlags,
        fragment: Bytes,
    },
    /// A frame type outside RFC 7540; carried through so callers can skip
    /// it without special cases.
    Unknown {
        raw_type: u8,
        stream: StreamId,
    },
}

/// Strips the PADDED envelope: leading Pad Length octet plus that many
/// trailing octets. The whole padded region still counts for flow
/// control; only the codec view shrinks.
fn strip_padding(payload: &[u8]) -> Result<&[u8], FrameDecodeError> {
    let (&pad_length, rest) = payload
        .split_first()
        .ok_or(FrameDecodeError::BadPadding)?;
    if pad_length as usize > rest.len() {
        return Err(FrameDecodeError::BadPadding);
    }
    Ok(&rest[..rest.len() - pad_length as usize])
}

fn require_stream(header: &FrameHeader) -> Result<StreamId, FrameDecodeError> {
    if header.stream_id == 0 {
        Err(FrameDecodeError::ZeroStreamId)
    } else {
        Ok(header.stream_id)
    }
}

fn require_connection(header: &FrameHeader) -> Result<(), FrameDecodeError> {
    if header.stream_id == 0 {
        Ok(())
    } else {
        Err(FrameDecodeError::NonZeroStreamId)
    }
}

impl Frame {
    /// Decodes a complete payload against its header. The caller has
    /// already ensured `payload.len() == header.length`.
    pub fn parse(header: &FrameHeader, payload: &[u8]) -> Result<Self, FrameDecodeError> {
        if payload.len() != header.length as usize {
            return Err(FrameDecodeError::PayloadTooShort);
        }
        let Some(ty) = header.ty else {
            return Ok(Self::Unknown {
                raw_type: header.raw_type,
                stream: header.stream_id,
            });
        };
        match ty {
            FrameType::Data => {
                let stream = require_stream(header)?;
                let flags = DataFlags::from_bits_truncate(header.flags);
                let data = if flags.contains(DataFlags::PADDED) {
                    strip_padding(payload)?
                } else {
                    payload
                };
                Ok(Self::Data {
                    stream,
                    flags,
                    data: Bytes::copy_from_slice(data),
                })
            }
            FrameType::Headers => {
                let stream = require_stream(header)?;
                let flags = HeadersFlags::from_bits_truncate(header.flags);
                let mut rest = if flags.contains(HeadersFlags::PADDED) {
                    strip_padding(payload)?
                } else {
                    payload
                };
                let priority = if flags.contains(HeadersFlags::PRIORITY) {
                    if rest.len() < 5 {
                        return Err(FrameDecodeError::PayloadTooShort);
                    }
                    let priority = Priority::parse(rest);
                    rest = &rest[5..];
                    Some(priority)
                } else {
                    None
                };
                Ok(Self::Headers {
                    stream,
                    flags,
                    priority,
                    fragment: Bytes::copy_from_slice(rest),
                })
            }
            FrameType::Priority => {
                let stream = require_stream(header)?;
                if payload.len() != 5 {
                    return Err(FrameDecodeError::FrameSize);
                }
                Ok(Self::Priority {
                    stream,
                    priority: Priority::parse(payload),
                })
            }
            FrameType::ResetStream => {
                let stream = require_stream(header)?;
                if payload.len() != 4 {
                    return Err(FrameDecodeError::FrameSize);
                }
                let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Ok(Self::ResetStream {
                    stream,
                    // unknown codes may be treated as INTERNAL_ERROR
                    error: ErrorType::from_u32(code).unwrap_or(ErrorType::InternalError),
                })
            }
            FrameType::Settings => {
                require_connection(header)?;
                if payload.len() % 6 != 0 {
                    return Err(FrameDecodeError::FrameSize);
                }
                let flags = SettingsFlags::from_bits_truncate(header.flags);
                if flags.contains(SettingsFlags::ACK) && !payload.is_empty() {
                    return Err(FrameDecodeError::FrameSize);
                }
                let mut params = Vec::with_capacity(payload.len() / 6);
                for chunk in payload.chunks_exact(6) {
                    let key = u16::from_be_bytes([chunk[0], chunk[1]]);
                    let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                    // unknown identifiers are ignored
                    if let Some(param) = SettingsParameter::from_u16(key) {
                        params.push((param, value));
                    }
                }
                Ok(Self::Settings { flags, params })
            }
            FrameType::PushPromise => {
                let stream = require_stream(header)?;
                if payload.len() < 4 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let promised =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                        & (u32::MAX >> 1);
                Ok(Self::PushPromise {
                    stream,
                    promised,
                    fragment: Bytes::copy_from_slice(&payload[4..]),
                })
            }
            FrameType::Ping => {
                require_connection(header)?;
                if payload.len() != 8 {
                    return Err(FrameDecodeError::FrameSize);
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(payload);
                Ok(Self::Ping {
                    flags: PingFlags::from_bits_truncate(header.flags),
                    data,
                })
            }
            FrameType::GoAway => {
                require_connection(header)?;
                if payload.len() < 8 {
                    return Err(FrameDecodeError::FrameSize);
                }
                let last_stream =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                        & (u32::MAX >> 1);
                let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Self::GoAway {
                    last_stream,
                    error: ErrorType::from_u32(code).unwrap_or(ErrorType::InternalError),
                    debug: Bytes::copy_from_slice(&payload[8..]),
                })
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(FrameDecodeError::FrameSize);
                }
                let increment =
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                        & (u32::MAX >> 1);
                Ok(Self::WindowUpdate {
                    stream: header.stream_id,
                    increment: NonZeroU32::new(increment)
                        .ok_or(FrameDecodeError::ZeroWindowIncrement)?,
                })
            }
            FrameType::Continuation => {
                let stream = require_stream(header)?;
                Ok(Self::Continuation {
                    stream,
                    flags: ContinuationFlags::from_bits_truncate(header.flags),
                    fragment: Bytes::copy_from_slice(payload),
                })
            }
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Data { stream, .. }
            | Self::Headers { stream, .. }
            | Self::Priority { stream, .. }
            | Self::ResetStream { stream, .. }
            | Self::PushPromise { stream, .. }
            | Self::WindowUpdate { stream, .. }
            | Self::Continuation { stream, .. }
            | Self::Unknown { stream, .. } => *stream,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn write_into(&self, buf: &mut BytesMut) {
        match self {
            Self::Data {
                stream,
                flags,
                data,
            } => {
                let flags = *flags - DataFlags::PADDED;
                FrameHeader::write_into(
                    buf,
                    data.len(),
                    FrameType::Data.to_u8().unwrap(),
                    flags.bits(),
                    *stream,
                );
                buf.put_slice(data);
            }
            Self::Headers {
                stream,
                flags,
                priority,
                fragment,
            } => {
                let mut flags = *flags - HeadersFlags::PADDED;
                flags.set(HeadersFlags::PRIORITY, priority.is_some());
                let length = fragment.len() + if priority.is_some() { 5 } else { 0 };
                FrameHeader::write_into(
                    buf,
                    length,
                    FrameType::Headers.to_u8().unwrap(),
                    flags.bits(),
                    *stream,
                );
                if let Some(priority) = priority {
                    priority.write_into(buf);
                }
                buf.put_slice(fragment);
            }
            Self::Priority { stream, priority } => {
                FrameHeader::write_into(
                    buf,
                    5,
                    FrameType::Priority.to_u8().unwrap(),
                    0,
                    *stream,
                );
                priority.write_into(buf);
            }
            Self::ResetStream { stream, error } => {
                FrameHeader::write_into(
                    buf,
                    4,
                    FrameType::ResetStream.to_u8().unwrap(),
                    0,
                    *stream,
                );
                buf.put_u32(error.to_u32().unwrap());
            }
            Self::Settings { flags, params } => {
                FrameHeader::write_into(
                    buf,
                    params.len() * 6,
                    FrameType::Settings.to_u8().unwrap(),
                    flags.bits(),
                    0,
                );
                for (key, value) in params {
                    buf.put_u16(key.to_u16().unwrap());
                    buf.put_u32(*value);
                }
            }
            Self::PushPromise {
                stream,
                promised,
                fragment,
            } => {
                FrameHeader::write_into(
                    buf,
                    4 + fragment.len(),
                    FrameType::PushPromise.to_u8().unwrap(),
                    0,
                    *stream,
                );
                buf.put_u32(promised & (u32::MAX >> 1));
                buf.put_slice(fragment);
            }
            Self::Ping { flags, data } => {
                FrameHeader::write_into(
                    buf,
                    8,
                    FrameType::Ping.to_u8().unwrap(),
                    flags.bits(),
                    0,
                );
                buf.put_slice(data);
            }
            Self::GoAway {
                last_stream,
                error,
                debug,
            } => {
                FrameHeader::write_into(
                    buf,
                    8 + debug.len(),
                    FrameType::GoAway.to_u8().unwrap(),
                    0,
                    0,
                );
                buf.put_u32(last_stream & (u32::MAX >> 1));
                buf.put_u32(error.to_u32().unwrap());
                buf.put_slice(debug);
            }
            Self::WindowUpdate { stream, increment } => {
                FrameHeader::write_into(
                    buf,
                    4,
                    FrameType::WindowUpdate.to_u8().unwrap(),
                    0,
                    *stream,
                );
                buf.put_u32(increment.get() & (u32::MAX >> 1));
            }
            Self::Continuation {
                stream,
                flags,
                fragment,
            } => {
                FrameHeader::write_into(
                    buf,
                    fragment.len(),
                    FrameType::Continuation.to_u8().unwrap(),
                    flags.bits(),
                    *stream,
                );
                buf.put_slice(fragment);
            }
            Self::Unknown { raw_type, stream } => {
                FrameHeader::write_into(buf, 0, *raw_type, 0, *stream);
            }
        }
    }
}
