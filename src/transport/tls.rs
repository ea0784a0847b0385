use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use super::{Transport, read_window};
use crate::cache::MappedFile;

enum State {
    Accepting {
        stream: TcpStream,
        acceptor: TlsAcceptor,
    },
    Established(Box<TlsStream<TcpStream>>),
    Closed,
}

/// TLS over TCP, server side.
///
/// Starts in the accepting state; [`Transport::handshake`] must succeed
/// before any other operation. File bodies are read from the cached
/// descriptor into a reusable chunk buffer and encrypted from there.
pub struct TlsTransport {
    state: State,
    peer: SocketAddr,
    chunk: Vec<u8>,
}

impl TlsTransport {
    /// Wraps an accepted stream; the handshake runs on [`Transport::handshake`].
    pub fn new(stream: TcpStream, peer: SocketAddr, acceptor: TlsAcceptor) -> Self {
        Self {
            state: State::Accepting { stream, acceptor },
            peer,
            chunk: Vec::new(),
        }
    }
}

impl State {
    fn established(&mut self) -> io::Result<&mut TlsStream<TcpStream>> {
        match self {
            State::Established(stream) => Ok(stream),
            State::Accepting { .. } => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS handshake has not completed",
            )),
            State::Closed => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS session is closed",
            )),
        }
    }
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Accepting { .. } => "accepting",
            State::Established(_) => "established",
            State::Closed => "closed",
        };
        f.debug_struct("TlsTransport")
            .field("peer", &self.peer)
            .field("state", &state)
            .finish()
    }
}

impl Transport for TlsTransport {
    fn scheme(&self) -> &'static str {
        "https"
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn has_handshake(&self) -> bool {
        true
    }

    async fn handshake(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Accepting { stream, acceptor } => {
                let stream = acceptor.accept(stream).await?;
                self.state = State::Established(Box::new(stream));
                Ok(())
            }
            other => {
                self.state = other;
                Err(io::Error::other("TLS handshake already attempted"))
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.state.established()?.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.state.established()?.write_all(buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.state.established()?.flush().await
    }

    async fn send_file(&mut self, file: &MappedFile, offset: u64, max: usize) -> io::Result<usize> {
        let window = read_window(file, offset, max, &mut self.chunk)?;
        if window.is_empty() {
            return Ok(0);
        }
        self.state.established()?.write_all(window).await?;
        Ok(window.len())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, State::Closed) {
            State::Established(mut stream) => stream.shutdown().await,
            _ => Ok(()),
        }
    }
}
