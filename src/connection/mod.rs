//! Per-connection protocol state machine.
//!
//! ```text
//! Created -> [Handshaking] -> Reading <-> Parsing -> Dispatching
//!         -> Writing | Sending -> [ShuttingDown] -> Closed
//! ```
//!
//! One [`Connection`] serves exactly one request. It is driven by a single
//! task that awaits each I/O step in turn, so at most one operation is in
//! flight and the buffer, parser and reply are mutated without locks. The
//! connection is dropped, and its socket closed, when that task finishes.
//!
//! Parse failures and missing files are answered with canned replies.
//! Transport failures abort the cycle; no reply is attempted after them.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheError, OpenMode};
use crate::http::{ParseStatus, Request, RequestError, RequestParser, Response, StatusCode};
use crate::send::SendOperation;
use crate::server::ServerState;
use crate::static_files;
use crate::transport::Transport;

/// Size of the per-connection read buffer.
pub const BUFFER_SIZE: usize = 8192;

/// Where a connection is in its single request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Handshaking,
    Reading,
    Parsing,
    Dispatching,
    Writing,
    Sending,
    ShuttingDown,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Failures that end a connection without (further) reply.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("peer closed the connection before sending a full request")]
    PeerClosed,

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("file transmission failed after {sent} bytes: {source}")]
    Send {
        sent: u64,
        #[source]
        source: io::Error,
    },

    #[error("static file lookup failed: {0}")]
    Cache(#[from] CacheError),

    #[error("static file lookup task failed: {0}")]
    Lookup(#[from] tokio::task::JoinError),
}

/// A single accepted client connection.
pub struct Connection<T> {
    transport: T,
    state: Arc<ServerState>,
    buffer: Box<[u8; BUFFER_SIZE]>,
    parser: RequestParser,
    phase: Phase,
}

impl<T: Transport> Connection<T> {
    /// Wraps an accepted transport; nothing happens until [`start`](Self::start).
    pub fn new(transport: T, state: Arc<ServerState>) -> Self {
        Self {
            transport,
            state,
            buffer: Box::new([0; BUFFER_SIZE]),
            parser: RequestParser::new(),
            phase: Phase::Created,
        }
    }

    /// Current phase of the request cycle.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs the connection to completion.
    ///
    /// Errors are logged, never returned; the transport is closed when this
    /// future completes.
    pub async fn start(mut self) {
        let scheme = self.transport.scheme();
        let peer = self
            .transport
            .peer_addr()
            .map_or_else(|| "-".to_owned(), |addr| addr.to_string());

        if self.transport.has_handshake() {
            self.enter(Phase::Handshaking);
            if let Err(e) = self.transport.handshake().await {
                let e = ConnectionError::Handshake(e);
                debug!(%peer, scheme, error = %e, "closing without reply");
                self.enter(Phase::Closed);
                return;
            }
        }

        if let Err(e) = self.serve().await {
            match e {
                ConnectionError::PeerClosed => debug!(%peer, scheme, "{e}"),
                _ => warn!(%peer, scheme, phase = %self.phase, error = %e, "connection aborted"),
            }
        }

        if self.transport.has_handshake() {
            self.enter(Phase::ShuttingDown);
            if let Err(e) = self.transport.shutdown().await {
                debug!(%peer, scheme, error = %e, "shutdown failed");
            }
        }
        self.enter(Phase::Closed);
    }

    fn enter(&mut self, phase: Phase) {
        trace!(from = %self.phase, to = %phase, "connection phase");
        self.phase = phase;
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        let started = Instant::now();

        let mut request = match self.read_request().await? {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "invalid request");
                return self.write_reply(Response::stock(StatusCode::BadRequest)).await;
            }
        };

        self.enter(Phase::Dispatching);
        let state = Arc::clone(&self.state);
        if let Some(route) = state.routes().find(request.method(), request.path()) {
            let response = route.handle(&mut request);
            log_request(&request, response.status().as_u16(), started);
            return self.write_reply(response).await;
        }

        self.serve_static(&request, started).await
    }

    /// Reads until the parser reports a complete or invalid request.
    async fn read_request(&mut self) -> Result<Result<Request, RequestError>, ConnectionError> {
        loop {
            self.enter(Phase::Reading);
            let read = self
                .transport
                .read(&mut self.buffer[..])
                .await
                .map_err(ConnectionError::Read)?;
            if read == 0 {
                return Err(ConnectionError::PeerClosed);
            }

            self.enter(Phase::Parsing);
            match self.parser.feed(&self.buffer[..read]) {
                ParseStatus::Complete(request) => return Ok(Ok(request)),
                ParseStatus::Invalid(e) => return Ok(Err(e)),
                ParseStatus::Incomplete => continue,
            }
        }
    }

    async fn serve_static(&mut self, request: &Request, started: Instant) -> Result<(), ConnectionError> {
        let Some(relative) = static_files::resolve(request.path()) else {
            log_request(request, StatusCode::BadRequest.as_u16(), started);
            return self.write_reply(Response::stock(StatusCode::BadRequest)).await;
        };
        let path = self.state.doc_root().join(relative);

        let state = Arc::clone(&self.state);
        let lookup = path.clone();
        let mapped =
            tokio::task::spawn_blocking(move || state.mappings().get(&lookup, OpenMode::ReadOnly))
                .await?;

        let file = match mapped {
            Ok(file) => file,
            Err(e) if e.is_not_found() => {
                debug!(error = %e, "static file unavailable");
                log_request(request, StatusCode::NotFound.as_u16(), started);
                return self.write_reply(Response::stock(StatusCode::NotFound)).await;
            }
            Err(e) => return Err(e.into()),
        };

        self.enter(Phase::Sending);
        let head = Response::file_head(static_files::mime_type(&path), file.len() as u64);
        self.transport
            .write_all(&head)
            .await
            .map_err(ConnectionError::Write)?;

        let mut send = SendOperation::new(file);
        if let Err(source) = send.run(&mut self.transport).await {
            return Err(ConnectionError::Send {
                sent: send.offset(),
                source,
            });
        }
        self.transport.flush().await.map_err(ConnectionError::Write)?;

        log_request(request, StatusCode::Ok.as_u16(), started);
        Ok(())
    }

    async fn write_reply(&mut self, response: Response) -> Result<(), ConnectionError> {
        self.enter(Phase::Writing);
        for buf in response.into_buffers() {
            self.transport
                .write_all(&buf)
                .await
                .map_err(ConnectionError::Write)?;
        }
        self.transport.flush().await.map_err(ConnectionError::Write)
    }
}

fn log_request(request: &Request, status: u16, started: Instant) {
    info!(
        method = %request.method(),
        path = %request.path(),
        status,
        elapsed = ?started.elapsed(),
        "request served"
    );
}
