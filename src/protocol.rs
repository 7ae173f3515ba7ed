use crate::{
    connection::{Connection, ConnectionState, ContinuationState},
    flags::*,
    frame::{Frame, FrameHeader},
    hpack,
    request::Request,
    response::{RequestHandler, Response},
    types::*,
};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use std::num::NonZeroU32;

/// Compressed header blocks larger than this abort the connection
/// before decoding even starts.
const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Dispatched,
    NeedMore,
    /// The peer failed the preface or we emitted GOAWAY; the reactor
    /// should flush and close.
    Stop,
}

/// The protocol orchestrator: owns one [`Connection`] plus its HPACK
/// contexts, consumes raw bytes and produces raw bytes. It never touches
/// a socket; [`ProtocolHandler::get_write_data`] /
/// [`ProtocolHandler::consume_write_data`] are the I/O boundary the
/// reactor drives.
pub struct ProtocolHandler {
    conn: Connection,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Stream-scope verdict from HEADERS admission, parked until the
    /// block's END_HEADERS so the block still reaches the decoder.
    pending_block_error: Option<H2Error>,
    handler: Box<dyn RequestHandler>,
}

impl ProtocolHandler {
    #[must_use]
    pub fn new(handler: Box<dyn RequestHandler>) -> Self {
        let conn = Connection::new();
        let mut decoder = hpack::Decoder::with_size(
            conn.settings.local(SettingsParameter::HeaderTableSize) as usize,
        );
        decoder.set_max_header_list_size(
            conn.settings.local(SettingsParameter::MaxHeaderListSize) as usize,
        );
        Self {
            conn,
            encoder: hpack::Encoder::with_size(
                // until the peer's SETTINGS arrive, assume the RFC default
                4096,
            ),
            decoder,
            read_buf: BytesMut::with_capacity(16_384),
            write_buf: BytesMut::with_capacity(16_384),
            pending_block_error: None,
            handler,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn with_echo_handler() -> Self {
        Self::new(Box::new(crate::response::EchoHandler))
    }

    /// Feeds inbound bytes through the state machine. `false` means the
    /// connection is beyond saving: the reactor must flush whatever is
    /// in the write vector (a GOAWAY, unless the preface failed) and
    /// close the socket.
    pub fn process_data(&mut self, input: &[u8]) -> bool {
        self.read_buf.extend_from_slice(input);
        loop {
            match self.process_one() {
                Progress::Dispatched => {}
                Progress::NeedMore => return true,
                Progress::Stop => return false,
            }
        }
    }

    /// Bytes queued for the peer.
    #[must_use]
    pub fn get_write_data(&self) -> &[u8] {
        &self.write_buf
    }

    pub fn consume_write_data(&mut self, written: usize) {
        self.write_buf.advance(written);
    }

    #[must_use]
    pub fn has_write_data(&self) -> bool {
        !self.write_buf.is_empty()
    }

    fn write_frame(&mut self, frame: &Frame) {
        frame.write_into(&mut self.write_buf);
    }

    /// Consumes at most one protocol element from the ring buffer.
    fn process_one(&mut self) -> Progress {
        if self.conn.state() == ConnectionState::WaitingPreface {
            if self.read_buf.len() < PREFACE.len() {
                return Progress::NeedMore;
            }
            let preface = self.read_buf.split_to(PREFACE.len());
            if !self.conn.handle_preface(&preface) {
                // not HTTP/2; close without a GOAWAY
                return Progress::Stop;
            }
            let frame = self.conn.settings.initial_frame();
            self.write_frame(&frame);
            return Progress::Dispatched;
        }

        let Some(header) = FrameHeader::parse(&self.read_buf) else {
            return Progress::NeedMore;
        };

        // SETTINGS is exempt so a peer can always lower our limits
        if header.ty != Some(FrameType::Settings)
            && header.length > self.conn.settings.local(SettingsParameter::MaxFrameSize)
        {
            debug!(
                "frame of {} bytes exceeds our MAX_FRAME_SIZE",
                header.length
            );
            self.send_goaway(ErrorType::FrameSizeError);
            return Progress::Stop;
        }

        // while a header block is open, nothing but its CONTINUATIONs
        // may arrive
        if let Some(cont) = &self.conn.continuation {
            if header.ty != Some(FrameType::Continuation) || header.stream_id != cont.stream_id {
                debug!(
                    "expected CONTINUATION on stream {}, got {:?} on stream {}",
                    cont.stream_id, header.ty, header.stream_id
                );
                self.send_goaway(ErrorType::ProtocolError);
                return Progress::Stop;
            }
        }

        // the first frame after the preface must be the client SETTINGS
        if self.conn.state() == ConnectionState::WaitingSettings
            && header.ty != Some(FrameType::Settings)
        {
            self.send_goaway(ErrorType::ProtocolError);
            return Progress::Stop;
        }

        let total = FRAME_HEADER_LEN + header.length as usize;
        if self.read_buf.len() < total {
            return Progress::NeedMore;
        }

        let frame_bytes = self.read_buf.split_to(total);
        let result = match Frame::parse(&header, &frame_bytes[FRAME_HEADER_LEN..]) {
            Ok(frame) => self.handle_frame(&header, frame),
            Err(err) => Err(decode_error_scope(&header, err)),
        };

        match result {
            Ok(()) => Progress::Dispatched,
            Err(err) => self.handle_error(err),
        }
    }

    /// Stream-scope failures reset the stream and keep the connection
    /// alive; connection-scope failures emit GOAWAY and stop.
    fn handle_error(&mut self, err: H2Error) -> Progress {
        match err {
            H2Error::Stream(id, code) => {
                self.reset_stream(id, code);
                Progress::Dispatched
            }
            H2Error::Connection(code) => {
                self.send_goaway(code);
                Progress::Stop
            }
        }
    }

    fn handle_frame(&mut self, header: &FrameHeader, frame: Frame) -> Result<(), H2Error> {
        match frame {
            Frame::Settings { flags, params } => self.handle_settings(flags, &params),
            Frame::Headers {
                stream,
                flags,
                priority,
                fragment,
            } => self.handle_headers(stream, flags, priority, &fragment),
            Frame::Continuation {
                stream,
                flags,
                fragment,
            } => self.handle_continuation(stream, flags, &fragment),
            // flow control covers the whole payload, padding included
            Frame::Data {
                stream,
                flags,
                data,
            } => self.handle_data(stream, flags, data, header.length as usize),
            Frame::WindowUpdate { stream, increment } => {
                self.handle_window_update(stream, increment)
            }
            Frame::ResetStream { stream, error } => self.handle_reset(stream, error),
            Frame::Ping { flags, data } => {
                if !flags.contains(PingFlags::ACK) {
                    self.write_frame(&Frame::Ping {
                        flags: PingFlags::ACK,
                        data,
                    });
                }
                Ok(())
            }
            Frame::GoAway {
                last_stream, error, ..
            } => {
                debug!("peer GOAWAY: {:?}, last stream {}", error, last_stream);
                self.conn.recv_goaway(last_stream);
                Ok(())
            }
            Frame::Priority { stream, priority } => {
                if priority.dependency == stream {
                    return Err(H2Error::Stream(stream, ErrorType::ProtocolError));
                }
                if let Some(s) = self.conn.stream_mut(stream) {
                    s.recv_priority(priority)?;
                }
                Ok(())
            }
            Frame::PushPromise { .. } => {
                // clients do not push
                Err(H2Error::Connection(ErrorType::ProtocolError))
            }
            Frame::Unknown { raw_type, .. } => {
                trace!("ignoring unknown frame type {:#x}", raw_type);
                Ok(())
            }
        }
    }

    fn handle_settings(
        &mut self,
        flags: SettingsFlags,
        params: &[(SettingsParameter, u32)],
    ) -> Result<(), H2Error> {
        if flags.contains(SettingsFlags::ACK) {
            // confirms our own SETTINGS; nothing to apply
            trace!("SETTINGS ACK received");
            return Ok(());
        }
        self.conn.settings.apply_remote(params)?;
        for &(param, value) in params {
            if param == SettingsParameter::HeaderTableSize {
                // our encoder must respect the peer's table budget
                self.encoder.set_max_size(value as usize);
            }
        }
        self.write_frame(&crate::settings::Settings::ack_frame());
        self.conn.activate();
        Ok(())
    }

    fn handle_headers(
        &mut self,
        stream_id: StreamId,
        flags: HeadersFlags,
        priority: Option<crate::frame::Priority>,
        fragment: &[u8],
    ) -> Result<(), H2Error> {
        let end_stream = flags.contains(HeadersFlags::END_STREAM);
        let end_headers = flags.contains(HeadersFlags::END_HEADERS);

        // Admission can fail at stream scope (refused, closed), but the
        // header block still has to pass through the HPACK decoder to
        // keep the compression context coherent. The verdict is carried
        // until END_HEADERS.
        let verdict = self.admit_headers(stream_id, end_stream, priority);
        if let Err(err @ H2Error::Connection(_)) = verdict {
            return Err(err);
        }

        if end_headers {
            self.finish_header_block(stream_id, fragment, end_stream, verdict.err())
        } else {
            if fragment.len() > MAX_HEADER_BLOCK_SIZE {
                return Err(H2Error::Connection(ErrorType::CompressionError));
            }
            self.conn.continuation = Some(ContinuationState {
                stream_id,
                end_stream,
                fragment: BytesMut::from(fragment),
            });
            // remember the stream-scope verdict for END_HEADERS time
            self.pending_block_error = verdict.err();
            Ok(())
        }
    }

    fn admit_headers(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        priority: Option<crate::frame::Priority>,
    ) -> Result<(), H2Error> {
        if let Some(p) = priority {
            if p.dependency == stream_id {
                return Err(H2Error::Stream(stream_id, ErrorType::ProtocolError));
            }
        }
        let exists = self.conn.stream_mut(stream_id).is_some();
        let stream = if exists {
            self.conn.stream_mut(stream_id).expect("stream exists")
        } else {
            self.conn.create_stream(stream_id)?
        };
        if let Some(p) = priority {
            stream.recv_priority(p)?;
        }
        stream.recv_headers(end_stream)
    }

    fn handle_continuation(
        &mut self,
        stream_id: StreamId,
        flags: ContinuationFlags,
        fragment: &[u8],
    ) -> Result<(), H2Error> {
        let Some(cont) = &mut self.conn.continuation else {
            // CONTINUATION with no open header block
            return Err(H2Error::Connection(ErrorType::ProtocolError));
        };
        debug_assert_eq!(cont.stream_id, stream_id);
        if cont.fragment.len() + fragment.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(H2Error::Connection(ErrorType::CompressionError));
        }
        cont.fragment.extend_from_slice(fragment);
        if !flags.contains(ContinuationFlags::END_HEADERS) {
            return Ok(());
        }
        let cont = self.conn.continuation.take().unwrap();
        let deferred = self.pending_block_error.take();
        self.finish_header_block(stream_id, &cont.fragment, cont.end_stream, deferred)
    }

    /// A complete header block is in hand: decode it, then either
    /// surface the request, stash the headers until the body ends, or
    /// finally apply a deferred stream error.
    fn finish_header_block(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
        deferred: Option<H2Error>,
    ) -> Result<(), H2Error> {
        let fields = self.decoder.decode(block).map_err(|err| {
            warn!("HPACK failure on stream {}: {}", stream_id, err);
            H2Error::Connection(ErrorType::CompressionError)
        })?;

        if let Some(err) = deferred {
            return Err(err);
        }

        let stream = self
            .conn
            .stream_mut(stream_id)
            .ok_or(H2Error::Stream(stream_id, ErrorType::StreamClosed))?;

        if stream.recv_headers_complete {
            // trailers: state machine already enforced END_STREAM
            trace!("discarding {} trailer fields", fields.len());
        } else {
            stream.recv_headers_complete = true;
            stream.request_headers = Some(fields);
        }

        if end_stream || stream.recv_end_stream {
            self.complete_request(stream_id)
        } else {
            Ok(())
        }
    }

    /// END_STREAM arrived: run the application callback and queue the
    /// response.
    fn complete_request(&mut self, stream_id: StreamId) -> Result<(), H2Error> {
        let stream = self
            .conn
            .stream_mut(stream_id)
            .ok_or(H2Error::Stream(stream_id, ErrorType::StreamClosed))?;
        let fields = stream
            .request_headers
            .take()
            .ok_or(H2Error::Stream(stream_id, ErrorType::ProtocolError))?;
        let body = stream.recv_body.split().freeze();

        let request = Request::from_fields(stream_id, &fields, body)?;
        debug!(
            "stream {}: {} {} ({} body bytes)",
            stream_id,
            request.method,
            request.path,
            request.body.len()
        );
        let response = self.handler.handle(request);
        self.send_response(stream_id, response)
    }

    fn handle_data(
        &mut self,
        stream_id: StreamId,
        flags: DataFlags,
        data: Bytes,
        flow_len: usize,
    ) -> Result<(), H2Error> {
        let end_stream = flags.contains(DataFlags::END_STREAM);

        let Some(stream) = self.conn.stream_mut(stream_id) else {
            return Err(H2Error::Stream(stream_id, ErrorType::StreamClosed));
        };
        stream.recv_data(end_stream)?;

        if !self.conn.consume_recv_window(flow_len) {
            return Err(H2Error::Connection(ErrorType::FlowControlError));
        }
        let stream = self.conn.stream_mut(stream_id).unwrap();
        if !stream.consume_recv_window(flow_len) {
            return Err(H2Error::Stream(stream_id, ErrorType::FlowControlError));
        }
        stream.recv_body.extend_from_slice(&data);

        self.replenish_windows(stream_id);

        if end_stream {
            self.complete_request(stream_id)?;
        }
        Ok(())
    }

    /// Tops sender credit back up once a window falls below half of its
    /// initial size, instead of updating on every frame.
    fn replenish_windows(&mut self, stream_id: StreamId) {
        if self.conn.recv_window < DEFAULT_WINDOW_SIZE / 2 {
            let increment = (DEFAULT_WINDOW_SIZE - self.conn.recv_window) as u32;
            self.conn.recv_window = DEFAULT_WINDOW_SIZE;
            self.write_frame(&Frame::WindowUpdate {
                stream: 0,
                increment: NonZeroU32::new(increment).expect("positive increment"),
            });
        }
        let initial = i64::from(self.conn.settings.local(SettingsParameter::InitialWindowSize));
        if let Some(stream) = self.conn.stream_mut(stream_id) {
            if !stream.recv_end_stream && stream.recv_window < initial / 2 {
                let increment = (initial - stream.recv_window) as u32;
                stream.send_window_update(increment);
                self.write_frame(&Frame::WindowUpdate {
                    stream: stream_id,
                    increment: NonZeroU32::new(increment).expect("positive increment"),
                });
            }
        }
    }

    fn handle_window_update(
        &mut self,
        stream_id: StreamId,
        increment: NonZeroU32,
    ) -> Result<(), H2Error> {
        if stream_id == 0 {
            self.conn.recv_window_update(increment.get())?;
            // every parked stream may have become sendable
            let waiting: Vec<StreamId> = self
                .conn
                .streams_mut()
                .filter(|s| s.has_pending_send())
                .map(|s| s.id)
                .collect();
            for id in waiting {
                self.pump_stream_data(id)?;
            }
            return Ok(());
        }
        let Some(stream) = self.conn.stream_mut(stream_id) else {
            return if stream_id <= self.conn.last_stream_id() {
                // the update raced our stream removal; ignore
                Ok(())
            } else {
                Err(H2Error::Connection(ErrorType::ProtocolError))
            };
        };
        stream.recv_window_update(increment.get())?;
        self.pump_stream_data(stream_id)
    }

    fn handle_reset(&mut self, stream_id: StreamId, error: ErrorType) -> Result<(), H2Error> {
        debug!("peer RST_STREAM on {}: {:?}", stream_id, error);
        let last_stream_id = self.conn.last_stream_id();
        match self.conn.stream_mut(stream_id) {
            Some(stream) => {
                stream.recv_rst()?;
                self.conn.remove_stream(stream_id);
                Ok(())
            }
            None if stream_id <= last_stream_id => {
                // stream already gone; late reset
                Ok(())
            }
            // resetting an idle stream is a connection error
            None => Err(H2Error::Connection(ErrorType::ProtocolError)),
        }
    }

    /// Encodes and queues the response headers, then as much of the body
    /// as the windows allow; the rest parks on the stream until
    /// WINDOW_UPDATE credit arrives.
    fn send_response(&mut self, stream_id: StreamId, response: Response) -> Result<(), H2Error> {
        let mut fields = vec![hpack::Header::new(
            Bytes::from_static(b":status"),
            Bytes::from(response.status.to_string()),
        )];
        for (name, value) in response.headers {
            if name.starts_with(':') {
                warn!("application handler produced pseudo-header {:?}", name);
                continue;
            }
            fields.push(hpack::Header::new(
                Bytes::from(name.to_ascii_lowercase()),
                Bytes::from(value),
            ));
        }
        let block = self.encoder.encode_fields(fields);

        let end_stream = response.body.is_empty();
        {
            let stream = self
                .conn
                .stream_mut(stream_id)
                .ok_or(H2Error::Stream(stream_id, ErrorType::StreamClosed))?;
            stream.send_headers(end_stream)?;
            if !end_stream {
                stream.pending_send.extend_from_slice(&response.body);
                stream.pending_send_end_stream = true;
            }
        }
        self.queue_header_block(stream_id, &block);

        if end_stream {
            self.finish_stream(stream_id);
            Ok(())
        } else {
            self.pump_stream_data(stream_id)
        }
    }

    /// HEADERS plus CONTINUATIONs if the block exceeds the peer's frame
    /// size.
    fn queue_header_block(&mut self, stream_id: StreamId, block: &[u8]) {
        let max = self.conn.settings.remote(SettingsParameter::MaxFrameSize) as usize;
        let mut chunks = block.chunks(max.max(1)).peekable();
        let first = chunks.next().unwrap_or(&[]);
        let mut flags = HeadersFlags::empty();
        if chunks.peek().is_none() {
            flags |= HeadersFlags::END_HEADERS;
        }
        self.write_frame(&Frame::Headers {
            stream: stream_id,
            flags,
            priority: None,
            fragment: Bytes::copy_from_slice(first),
        });
        while let Some(chunk) = chunks.next() {
            let mut flags = ContinuationFlags::empty();
            if chunks.peek().is_none() {
                flags |= ContinuationFlags::END_HEADERS;
            }
            self.write_frame(&Frame::Continuation {
                stream: stream_id,
                flags,
                fragment: Bytes::copy_from_slice(chunk),
            });
        }
    }

    /// Drains a stream's parked response bytes as far as both windows
    /// and the peer's frame size allow.
    fn pump_stream_data(&mut self, stream_id: StreamId) -> Result<(), H2Error> {
        let max_frame = self.conn.settings.remote(SettingsParameter::MaxFrameSize) as usize;
        loop {
            let conn_window = self.conn.send_window;
            let Some(stream) = self.conn.stream_mut(stream_id) else {
                return Ok(());
            };
            if !stream.has_pending_send() {
                break;
            }
            let bound = stream
                .send_window
                .min(conn_window)
                .max(0)
                .min(max_frame as i64)
                .min(stream.pending_send.len() as i64) as usize;
            if bound == 0 && !stream.pending_send.is_empty() {
                trace!(
                    "stream {}: {} bytes parked behind flow control",
                    stream_id,
                    stream.pending_send.len()
                );
                return Ok(());
            }
            let chunk = stream.pending_send.split_to(bound).freeze();
            let end_stream = stream.pending_send.is_empty() && stream.pending_send_end_stream;
            if end_stream {
                stream.pending_send_end_stream = false;
            }
            stream.send_data(end_stream)?;
            stream.consume_send_window(chunk.len());
            self.conn.consume_send_window(chunk.len());
            let mut flags = DataFlags::empty();
            if end_stream {
                flags |= DataFlags::END_STREAM;
            }
            self.write_frame(&Frame::Data {
                stream: stream_id,
                flags,
                data: chunk,
            });
        }
        self.finish_stream(stream_id);
        Ok(())
    }

    /// Drops the table entry once a stream is closed and fully drained.
    fn finish_stream(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.conn.stream_mut(stream_id) {
            if stream.is_closed() && !stream.has_pending_send() {
                self.conn.remove_stream(stream_id);
            }
        }
    }

    fn reset_stream(&mut self, stream_id: StreamId, error: ErrorType) {
        debug!("resetting stream {}: {:?}", stream_id, error);
        self.write_frame(&Frame::ResetStream {
            stream: stream_id,
            error,
        });
        if let Some(stream) = self.conn.stream_mut(stream_id) {
            stream.send_rst();
        }
        self.conn.remove_stream(stream_id);
    }

    /// Queues GOAWAY and flips the connection into its terminal state.
    /// The bytes land in the write vector before the handler reports
    /// failure, so the reactor can flush them ahead of the close.
    fn send_goaway(&mut self, error: ErrorType) {
        if self.conn.goaway_sent {
            return;
        }
        debug!("sending GOAWAY: {:?}", error);
        self.write_frame(&Frame::GoAway {
            last_stream: self.conn.last_stream_id(),
            error,
            debug: Bytes::new(),
        });
        self.conn.mark_goaway_sent();
    }
}

/// Maps codec failures onto the scope the spec demands for them.
fn decode_error_scope(header: &FrameHeader, err: FrameDecodeError) -> H2Error {
    match err {
        FrameDecodeError::PayloadTooShort | FrameDecodeError::FrameSize => {
            H2Error::Connection(ErrorType::FrameSizeError)
        }
        FrameDecodeError::ZeroWindowIncrement if header.stream_id != 0 => {
            H2Error::Stream(header.stream_id, ErrorType::ProtocolError)
        }
        FrameDecodeError::ZeroWindowIncrement
        | FrameDecodeError::ZeroStreamId
        | FrameDecodeError::NonZeroStreamId
        | FrameDecodeError::BadPadding => H2Error::Connection(ErrorType::ProtocolError),
    }
}
