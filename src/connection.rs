use crate::{settings::Settings, stream::Stream, types::*};
use bytes::BytesMut;
use log::{debug, trace};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing received yet; the next 24 bytes must be the preface.
    WaitingPreface,
    /// Preface seen; the first frame must be the client's SETTINGS.
    WaitingSettings,
    Active,
    /// GOAWAY sent or received; no new streams.
    GoingAway,
}

/// Header-block reassembly scratch while END_HEADERS is outstanding.
/// While this exists, only CONTINUATION frames on `stream_id` are legal.
#[derive(Debug)]
pub struct ContinuationState {
    pub stream_id: StreamId,
    /// END_STREAM from the HEADERS frame that opened the block.
    pub end_stream: bool,
    pub fragment: BytesMut,
}

/// Connection-wide protocol state: the stream table, both connection
/// windows, SETTINGS context and shutdown bookkeeping. Owned by the
/// protocol handler; performs no I/O.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    pub settings: Settings,
    /// Keyed ascending so connection-window drains are deterministic.
    streams: BTreeMap<StreamId, Stream>,
    /// Largest peer-initiated stream id seen; monotone.
    last_stream_id: StreamId,
    pub recv_window: i64,
    pub send_window: i64,
    pub continuation: Option<ContinuationState>,
    pub goaway_sent: bool,
    pub goaway_received: bool,
}

impl Connection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::WaitingPreface,
            settings: Settings::new(),
            streams: BTreeMap::new(),
            last_stream_id: 0,
            recv_window: DEFAULT_WINDOW_SIZE,
            send_window: DEFAULT_WINDOW_SIZE,
            continuation: None,
            goaway_sent: false,
            goaway_received: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    /// Checks the 24-byte client magic. `false` is unrecoverable: the
    /// peer is not speaking HTTP/2 and gets no GOAWAY.
    #[must_use]
    pub fn handle_preface(&mut self, bytes: &[u8]) -> bool {
        debug_assert_eq!(self.state, ConnectionState::WaitingPreface);
        if bytes == PREFACE {
            trace!("client preface ok");
            self.state = ConnectionState::WaitingSettings;
            true
        } else {
            debug!("invalid client preface");
            false
        }
    }

    /// First client SETTINGS arrived.
    pub fn activate(&mut self) {
        if self.state == ConnectionState::WaitingSettings {
            self.state = ConnectionState::Active;
        }
    }

    #[must_use]
    pub fn open_stream_count(&self) -> usize {
        self.streams.values().filter(|s| !s.is_closed()).count()
    }

    /// Admits a new peer-initiated stream: ids are odd, strictly
    /// increasing, capped by our MAX_CONCURRENT_STREAMS, and only while
    /// the connection is fully active.
    pub fn create_stream(&mut self, id: StreamId) -> Result<&mut Stream, H2Error> {
        if id % 2 == 0 || id <= self.last_stream_id {
            return Err(H2Error::Connection(ErrorType::ProtocolError));
        }
        if self.state != ConnectionState::Active {
            return Err(H2Error::Stream(id, ErrorType::RefusedStream));
        }
        let cap = self.settings.local(SettingsParameter::MaxConcurrentStreams) as usize;
        if self.open_stream_count() >= cap {
            debug!("refusing stream {}: {} streams already open", id, cap);
            return Err(H2Error::Stream(id, ErrorType::RefusedStream));
        }
        self.last_stream_id = id;
        let send_window = i64::from(self.settings.remote(SettingsParameter::InitialWindowSize));
        let recv_window = i64::from(self.settings.local(SettingsParameter::InitialWindowSize));
        Ok(self
            .streams
            .entry(id)
            .or_insert_with(|| Stream::new(id, send_window, recv_window)))
    }

    #[must_use]
    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Ascending over live streams; the deterministic order the
    /// connection-level drain relies on.
    pub fn streams_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }

    pub fn remove_stream(&mut self, id: StreamId) {
        if self.streams.remove(&id).is_some() {
            trace!("stream {} removed", id);
        }
    }

    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn mark_goaway_sent(&mut self) {
        self.goaway_sent = true;
        self.state = ConnectionState::GoingAway;
    }

    /// Peer told us to wind down: abandon every stream it will no
    /// longer process.
    pub fn recv_goaway(&mut self, peer_last_stream: StreamId) {
        self.goaway_received = true;
        self.state = ConnectionState::GoingAway;
        let dropped: Vec<StreamId> = self
            .streams
            .range(peer_last_stream + 1..)
            .map(|(id, _)| *id)
            .collect();
        for id in dropped {
            debug!("dropping stream {} after peer GOAWAY", id);
            self.streams.remove(&id);
        }
    }

    /// Credits the connection-level send window.
    pub fn recv_window_update(&mut self, increment: u32) -> Result<(), H2Error> {
        let next = self.send_window + i64::from(increment);
        if next > MAX_WINDOW_SIZE {
            return Err(H2Error::Connection(ErrorType::FlowControlError));
        }
        self.send_window = next;
        Ok(())
    }

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
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
