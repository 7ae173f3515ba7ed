use crate::{frame::Priority, hpack::Header, types::*};
use bytes::BytesMut;
use derivative::Derivative;
use log::trace;

/// https://httpwg.org/specs/rfc7540.html#StreamStates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// One HTTP/2 stream: state machine, both flow-control windows, the
/// request being assembled and any response bytes parked behind flow
/// control.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Stream {
    pub id: StreamId,
    state: StreamState,
    /// Credit we may spend sending DATA to the peer.
    pub send_window: i64,
    /// Credit we granted the peer for inbound DATA.
    pub recv_window: i64,
    /// Accepted and stored, never used for scheduling.
    priority: Option<Priority>,
    pub recv_end_stream: bool,
    pub sent_end_stream: bool,
    pub recv_headers_complete: bool,
    /// Decoded request headers, parked until END_STREAM delivers the
    /// body.
    pub request_headers: Option<Vec<Header>>,
    #[derivative(Debug = "ignore")]
    pub recv_body: BytesMut,
    /// Response bytes that did not fit into the current windows, plus
    /// whether END_STREAM still has to go out with them.
    #[derivative(Debug = "ignore")]
    pub pending_send: BytesMut,
    pub pending_send_end_stream: bool,
}

impl Stream {
    #[must_use]
    pub fn new(id: StreamId, send_window: i64, recv_window: i64) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window,
            recv_window,
            priority: None,
            recv_end_stream: false,
            sent_end_stream: false,
            recv_headers_complete: false,
            request_headers: None,
            recv_body: BytesMut::new(),
            pending_send: BytesMut::new(),
            pending_send_end_stream: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    #[must_use]
    pub fn has_pending_send(&self) -> bool {
        !self.pending_send.is_empty() || self.pending_send_end_stream
    }

    fn set_state(&mut self, state: StreamState) {
        if self.state != state {
            trace!("stream {} {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }

    fn stream_error(&self, error: ErrorType) -> H2Error {
        H2Error::Stream(self.id, error)
    }

    /// A HEADERS frame arrived (END_HEADERS already reassembled). A
    /// second header block on the same stream is only acceptable as
    /// trailers, which must end the stream.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        match self.state {
            StreamState::Idle => {
                self.set_state(if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                });
            }
            StreamState::Open | StreamState::HalfClosedLocal if self.recv_headers_complete => {
                if !end_stream {
                    return Err(self.stream_error(ErrorType::ProtocolError));
                }
                self.transition_recv_end();
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if end_stream {
                    self.transition_recv_end();
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(self.stream_error(ErrorType::StreamClosed));
            }
            StreamState::ReservedLocal | StreamState::ReservedRemote => {
                return Err(self.stream_error(ErrorType::ProtocolError));
            }
        }
        if end_stream {
            self.recv_end_stream = true;
        }
        Ok(())
    }

    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedRemote => {
                if end_stream {
                    self.sent_end_stream = true;
                    self.transition_send_end();
                }
                Ok(())
            }
            _ => Err(self.stream_error(ErrorType::StreamClosed)),
        }
    }

    /// State acceptance for an inbound DATA frame; window accounting is
    /// separate (`consume_recv_window`).
    pub fn recv_data(&mut self, end_stream: bool) -> Result<(), H2Error> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {
                if end_stream {
                    self.recv_end_stream = true;
                    self.transition_recv_end();
                }
                Ok(())
            }
            _ => Err(self.stream_error(ErrorType::StreamClosed)),
        }
    }

    pub fn send_data(&mut self, end_stream: bool) -> Result<(), H2Error> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedRemote => {
                if end_stream {
                    self.sent_end_stream = true;
                    self.transition_send_end();
                }
                Ok(())
            }
            _ => Err(self.stream_error(ErrorType::StreamClosed)),
        }
    }

    /// RST_STREAM in either direction closes immediately. On an idle
    /// stream it is a connection error.
    pub fn recv_rst(&mut self) -> Result<(), H2Error> {
        if self.state == StreamState::Idle {
            return Err(H2Error::Connection(ErrorType::ProtocolError));
        }
        self.set_state(StreamState::Closed);
        Ok(())
    }

    pub fn send_rst(&mut self) {
        self.set_state(StreamState::Closed);
    }

    /// Credits our send window. WINDOW_UPDATE is valid in any non-idle
    /// state, including Closed for a short while after closing.
    pub fn recv_window_update(&mut self, increment: u32) -> Result<(), H2Error> {
        if self.state == StreamState::Idle {
            return Err(H2Error::Connection(ErrorType::ProtocolError));
        }
        let next = self.send_window + i64::from(increment);
        if next > MAX_WINDOW_SIZE {
            return Err(self.stream_error(ErrorType::FlowControlError));
        }
        self.send_window = next;
        Ok(())
    }

    pub fn send_window_update(&mut self, increment: u32) {
        self.recv_window += i64::from(increment);
        debug_assert!(self.recv_window <= MAX_WINDOW_SIZE);
    }

    /// PRIORITY is acceptable in every state, Closed included; a stream
    /// depending on itself is a protocol error.
    pub fn recv_priority(&mut self, priority: Priority) -> Result<(), H2Error> {
        if priority.dependency == self.id {
            return Err(self.stream_error(ErrorType::ProtocolError));
        }
        self.priority = Some(priority);
        Ok(())
    }

    /// Debits the peer's credit for `len` inbound bytes; `false` means
    /// the peer overshot the window.
    #[must_use]
    pub fn consume_recv_window(&mut self, len: usize) -> bool {
        let len = len as i64;
        if len > self.recv_window {
            return false;
        }
        self.recv_window -= len;
        true
    }

    pub fn consume_send_window(&mut self, len: usize) {
        self.send_window -= len as i64;
        debug_assert!(self.send_window >= 0);
    }

    fn transition_recv_end(&mut self) {
        match self.state {
            StreamState::Open => self.set_state(StreamState::HalfClosedRemote),
            StreamState::HalfClosedLocal => self.set_state(StreamState::Closed),
            _ => {}
        }
    }

    fn transition_send_end(&mut self) {
        match self.state {
            StreamState::Open => self.set_state(StreamState::HalfClosedLocal),
            StreamState::HalfClosedRemote => self.set_state(StreamState::Closed),
            _ => {}
        }
    }
}
