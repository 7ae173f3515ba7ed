use anyhow::{anyhow, Context};
use log::{debug, trace, warn};
use rustls::{Certificate, PrivateKey, ServerConfig, ServerConnection};
use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
    sync::Arc,
};

/// Process-wide TLS configuration. Built once by the supervisor (before
/// forking, so children inherit the loaded certificates) and shared by
/// every session of a reactor.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    pub fn new(cert_path: &Path, key_path: &Path) -> anyhow::Result<Self> {
        let certs = load_certs(cert_path)
            .with_context(|| format!("loading certificates from {}", cert_path.display()))?;
        let key = load_private_key(key_path)
            .with_context(|| format!("loading private key from {}", key_path.display()))?;
        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("building TLS server config")?;
        // HTTP/2 over TLS is negotiated exclusively through ALPN
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn new_session(&self) -> anyhow::Result<TlsSession> {
        Ok(TlsSession {
            conn: ServerConnection::new(self.config.clone())?,
            saw_eof: false,
        })
    }
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<Certificate>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect();
    if certs.is_empty() {
        return Err(anyhow!("no certificates found"));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> anyhow::Result<PrivateKey> {
    let mut reader = BufReader::new(File::open(path)?);
    if let Some(key) = rustls_pemfile::pkcs8_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(key));
    }
    let mut reader = BufReader::new(File::open(path)?);
    if let Some(key) = rustls_pemfile::rsa_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(key));
    }
    Err(anyhow!("no private key found"))
}

/// Outcome of one `negotiate` call over a nonblocking socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Complete,
    WantRead,
    WantWrite,
    Failed,
}

/// One TLS session, exclusively owned by its connection context. All
/// methods take the socket explicitly; the session itself never blocks.
pub struct TlsSession {
    conn: ServerConnection,
    saw_eof: bool,
}

impl TlsSession {
    /// Drives the handshake as far as the socket allows.
    pub fn negotiate(&mut self, sock: &mut (impl Read + Write)) -> Handshake {
        loop {
            while self.conn.wants_write() {
                match self.conn.write_tls(sock) {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Handshake::WantWrite;
                    }
                    Err(err) => {
                        debug!("TLS handshake write failed: {}", err);
                        return Handshake::Failed;
                    }
                }
            }

            if !self.conn.is_handshaking() {
                // the peer must have agreed to speak h2
                return match self.conn.alpn_protocol() {
                    Some(b"h2") => Handshake::Complete,
                    other => {
                        warn!("ALPN mismatch: {:?}", other);
                        Handshake::Failed
                    }
                };
            }

            match self.conn.read_tls(sock) {
                Ok(0) => {
                    debug!("peer closed during TLS handshake");
                    return Handshake::Failed;
                }
                Ok(_) => {
                    if let Err(err) = self.conn.process_new_packets() {
                        debug!("TLS handshake failed: {}", err);
                        // flush the alert if the socket takes it
                        let _ = self.conn.write_tls(sock);
                        return Handshake::Failed;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Handshake::WantRead;
                }
                Err(err) => {
                    debug!("TLS handshake read failed: {}", err);
                    return Handshake::Failed;
                }
            }
        }
    }

    /// Pulls ciphertext off the socket and copies decrypted bytes into
    /// `buf`. `Ok(0)` means the peer is gone (clean close or EOF);
    /// `WouldBlock` means nothing to read right now.
    pub fn recv(
        &mut self,
        sock: &mut (impl Read + Write),
        buf: &mut [u8],
    ) -> io::Result<usize> {
        loop {
            match self.conn.read_tls(sock) {
                Ok(0) => {
                    self.saw_eof = true;
                    break;
                }
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        match self.conn.reader().read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if self.saw_eof {
                    Ok(0)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Queues plaintext and flushes as much ciphertext as the socket
    /// accepts. Unflushed ciphertext stays buffered in the session; the
    /// next wake-up retries.
    pub fn send(&mut self, sock: &mut (impl Read + Write), buf: &[u8]) -> io::Result<usize> {
        let written = self.conn.writer().write(buf)?;
        self.flush(sock)?;
        Ok(written)
    }

    /// Best-effort ciphertext flush.
    pub fn flush(&mut self, sock: &mut (impl Read + Write)) -> io::Result<()> {
        while self.conn.wants_write() {
            match self.conn.write_tls(sock) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Sends close_notify if the socket still takes bytes.
    pub fn shutdown(&mut self, sock: &mut (impl Read + Write)) {
        self.conn.send_close_notify();
        if self.flush(sock).is_err() {
            trace!("close_notify not flushed; peer already gone");
        }
    }
}
