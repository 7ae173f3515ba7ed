use crate::{
    protocol::ProtocolHandler,
    response::RequestHandler,
    tls::{Handshake, TlsContext, TlsSession},
};
use anyhow::Context as _;
use log::{debug, info, trace, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

const LISTENER: Token = Token(0);
const READ_CHUNK: usize = 16 * 1024;
const LISTEN_BACKLOG: i32 = 128;

/// Factory invoked once per accepted connection.
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn RequestHandler>>;

/// Binds a nonblocking listener with `SO_REUSEADDR | SO_REUSEPORT`, so
/// every reactor process owns its own socket and the kernel spreads
/// incoming flows across them.
pub fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("creating listening socket")?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("binding {}", addr))?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

enum ConnPhase {
    /// TLS handshake still in flight; no protocol state yet.
    Handshaking,
    /// Bytes flow through the protocol handler.
    Ready(ProtocolHandler),
}

struct ConnCtx {
    sock: TcpStream,
    tls: Option<TlsSession>,
    phase: ConnPhase,
}

impl ConnCtx {
    fn wants_write(&self) -> bool {
        let tls_pending = self.tls.as_ref().map_or(false, TlsSession::wants_write);
        let handler_pending = match &self.phase {
            ConnPhase::Ready(handler) => handler.has_write_data(),
            ConnPhase::Handshaking => false,
        };
        tls_pending || handler_pending
    }
}

/// One per process: an epoll set over the shared-port listener plus all
/// accepted connections. Purely single-threaded; the only blocking call
/// is `poll` with a one-second tick so shutdown flags get noticed.
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<Token, ConnCtx>,
    next_token: usize,
    tls: Option<TlsContext>,
    max_connections: usize,
    make_handler: HandlerFactory,
}

impl Reactor {
    pub fn new(
        addr: SocketAddr,
        tls: Option<TlsContext>,
        max_connections: usize,
        make_handler: HandlerFactory,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            poll: Poll::new().context("creating epoll set")?,
            listener: bind_listener(addr)?,
            connections: HashMap::new(),
            next_token: 1,
            tls,
            max_connections,
            make_handler,
        })
    }

    /// Runs until `shutdown` flips. Registrations are edge-triggered,
    /// so every read path drains to WouldBlock before returning to
    /// `poll`.
    pub fn run(&mut self, shutdown: &AtomicBool) -> anyhow::Result<()> {
        self.poll
            .registry()
            .register(&mut self.listener, LISTENER, Interest::READABLE)?;
        info!("reactor up, pid {}", std::process::id());

        let mut events = Events::with_capacity(1024);
        while !shutdown.load(Ordering::Relaxed) {
            match self.poll.poll(&mut events, Some(Duration::from_secs(1))) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("epoll wait"),
            }
            for event in &events {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    token => self.connection_ready(token),
                }
            }
        }

        info!("reactor pid {} draining", std::process::id());
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close(token);
        }
        Ok(())
    }

    /// Accept every pending connection; the listener is edge-triggered.
    fn accept_ready(&mut self) {
        loop {
            let (mut sock, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!("accept failed: {}", err);
                    return;
                }
            };
            if self.connections.len() >= self.max_connections {
                warn!("connection limit reached, dropping {}", peer);
                continue;
            }

            let tls = match &self.tls {
                Some(ctx) => match ctx.new_session() {
                    Ok(session) => Some(session),
                    Err(err) => {
                        warn!("TLS session setup failed for {}: {}", peer, err);
                        continue;
                    }
                },
                None => None,
            };

            let token = Token(self.next_token);
            self.next_token = self.next_token.wrapping_add(1).max(1);
            if let Err(err) =
                self.poll
                    .registry()
                    .register(&mut sock, token, Interest::READABLE)
            {
                warn!("registering {} failed: {}", peer, err);
                continue;
            }

            trace!("accepted {} as {:?}", peer, token);
            let phase = if tls.is_some() {
                ConnPhase::Handshaking
            } else {
                ConnPhase::Ready(ProtocolHandler::new((self.make_handler)()))
            };
            self.connections.insert(token, ConnCtx { sock, tls, phase });
        }
    }

    fn connection_ready(&mut self, token: Token) {
        let Some(ctx) = self.connections.get_mut(&token) else {
            return;
        };

        if matches!(ctx.phase, ConnPhase::Handshaking) {
            let session = ctx.tls.as_mut().expect("handshake without TLS");
            match session.negotiate(&mut ctx.sock) {
                Handshake::Complete => {
                    trace!("{:?} TLS handshake complete", token);
                    ctx.phase = ConnPhase::Ready(ProtocolHandler::new((self.make_handler)()));
                    self.reregister(token, Interest::READABLE);
                    // fall through: the finished handshake often arrives
                    // together with the first protocol bytes
                }
                Handshake::WantRead => {
                    self.reregister(token, Interest::READABLE);
                    return;
                }
                Handshake::WantWrite => {
                    self.reregister(token, Interest::WRITABLE);
                    return;
                }
                Handshake::Failed => {
                    self.close(token);
                    return;
                }
            }
        }

        if !self.pump(token) {
            self.close(token);
            return;
        }

        let Some(ctx) = self.connections.get_mut(&token) else {
            return;
        };
        let interest = if ctx.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.reregister(token, interest);
    }

    /// Drains readable bytes into the handler, then the handler's write
    /// vector toward the socket. `false` asks the caller to close.
    fn pump(&mut self, token: Token) -> bool {
        let Some(ctx) = self.connections.get_mut(&token) else {
            return true;
        };
        let ConnPhase::Ready(handler) = &mut ctx.phase else {
            return true;
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut peer_closed = false;
        let mut protocol_failed = false;
        loop {
            let read = match &mut ctx.tls {
                Some(tls) => tls.recv(&mut ctx.sock, &mut buf),
                None => ctx.sock.read(&mut buf),
            };
            match read {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    if !handler.process_data(&buf[..n]) {
                        // the write vector still holds the GOAWAY; give
                        // the flush below one chance to ship it
                        debug!("{:?} protocol failure, closing", token);
                        protocol_failed = true;
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("{:?} read error: {}", token, err);
                    return false;
                }
            }
        }

        if !Self::flush(ctx) {
            return false;
        }
        !peer_closed && !protocol_failed
    }

    /// Best-effort write of everything the handler has queued. `false`
    /// on a hard I/O error.
    fn flush(ctx: &mut ConnCtx) -> bool {
        let ConnPhase::Ready(handler) = &mut ctx.phase else {
            return true;
        };
        while handler.has_write_data() {
            let written = match &mut ctx.tls {
                Some(tls) => tls.send(&mut ctx.sock, handler.get_write_data()),
                None => ctx.sock.write(handler.get_write_data()),
            };
            match written {
                Ok(0) => return false,
                Ok(n) => handler.consume_write_data(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("write error: {}", err);
                    return false;
                }
            }
        }
        if let Some(tls) = &mut ctx.tls {
            if tls.flush(&mut ctx.sock).is_err() {
                return false;
            }
        }
        true
    }

    fn reregister(&mut self, token: Token, interest: Interest) {
        if let Some(ctx) = self.connections.get_mut(&token) {
            if let Err(err) = self.poll.registry().reregister(&mut ctx.sock, token, interest) {
                warn!("reregister {:?} failed: {}", token, err);
            }
        }
    }

    /// Tears a connection down: epoll deregistration, TLS close_notify,
    /// socket drop. The connections map and the epoll set stay in
    /// lockstep.
    fn close(&mut self, token: Token) {
        if let Some(mut ctx) = self.connections.remove(&token) {
            trace!("closing {:?}", token);
            if let Err(err) = self.poll.registry().deregister(&mut ctx.sock) {
                debug!("deregister {:?} failed: {}", token, err);
            }
            if let Some(tls) = &mut ctx.tls {
                tls.shutdown(&mut ctx.sock);
            }
        }
    }
}
