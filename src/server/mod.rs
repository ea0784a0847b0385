//! Listener and accept loop.
//!
//! Accepts TCP connections and hands each one, wrapped in the configured
//! transport, to its own [`Connection`] task. The tokio worker pool the
//! server runs on provides the threads; every connection is a single task,
//! so its steps never run concurrently with each other while different
//! connections proceed in parallel.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::cache::{DescriptorCache, MappingCache};
use crate::config::{Config, ConfigError};
use crate::connection::Connection;
use crate::router::RouteTable;
use crate::transport::{PlainTransport, TlsTransport};

mod tls;

pub use tls::{acceptor_from_der, load_acceptor};

/// Errors produced while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {path}: {source}")]
    TlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no private key found in {path}")]
    NoPrivateKey { path: PathBuf },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// State shared by every connection: the route table, the file caches and
/// the document root.
///
/// The route table is immutable once the server starts; the caches do their
/// own locking.
pub struct ServerState {
    routes: RouteTable,
    mappings: MappingCache,
    doc_root: PathBuf,
}

impl ServerState {
    /// Creates shared state with empty caches.
    pub fn new(routes: RouteTable, doc_root: impl AsRef<Path>) -> Self {
        Self {
            routes,
            mappings: MappingCache::new(Arc::new(DescriptorCache::new())),
            doc_root: doc_root.as_ref().to_path_buf(),
        }
    }

    /// The route table consulted before static files.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The mapping cache static files are served from.
    pub fn mappings(&self) -> &MappingCache {
        &self.mappings
    }

    /// The descriptor cache beneath the mapping cache.
    pub fn descriptors(&self) -> &DescriptorCache {
        self.mappings.descriptors()
    }

    /// Directory static files are resolved against.
    pub fn doc_root(&self) -> &Path {
        &self.doc_root
    }
}

/// The HTTP(S) server.
///
/// # Examples
///
/// ```rust,no_run
/// use rtsf::{Config, Request, Response, RouteTable, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut routes = RouteTable::new();
///     routes.get("^/hi(/)?$", |_req: &Request| Response::new(StatusCode::Ok).body("hi"))?;
///
///     let config = Config::new("127.0.0.1", 8080, "./public");
///     let server = Server::bind(&config, routes).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    tls: Option<TlsAcceptor>,
}

impl Server {
    /// Validates `config`, loads TLS material if configured, and binds the
    /// listening socket.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] for an invalid configuration,
    /// [`ServerError::Bind`] if the address cannot be bound, or a TLS error.
    pub async fn bind(config: &Config, routes: RouteTable) -> Result<Self, ServerError> {
        config.validate()?;

        let tls = match &config.tls {
            Some(files) => Some(load_acceptor(&files.cert, &files.key)?),
            None => None,
        };

        let listener = TcpListener::bind((config.address.as_str(), config.port))
            .await
            .map_err(|e| ServerError::Bind {
                addr: format!("{}:{}", config.address, config.port),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(ServerState::new(routes, &config.doc_root)),
            tls,
        })
    }

    /// Serves TLS on this listener with `acceptor`, replacing any acceptor
    /// loaded from the configuration.
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `true` if connections are served over TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Shared state, e.g. for inspecting the file caches.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accepts connections until the process is terminated.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped; this currently never fails.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `signal` completes.
    ///
    /// Connections already accepted keep running to completion on the
    /// runtime.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped; this currently never fails.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let scheme = if self.is_tls() { "https" } else { "http" };
        info!(address = %self.local_addr, scheme, "listening");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                () = &mut signal => {
                    info!(address = %self.local_addr, "stopped accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "connection accepted");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        let state = Arc::clone(&self.state);
        match &self.tls {
            Some(acceptor) => {
                let transport = TlsTransport::new(stream, peer, acceptor.clone());
                tokio::spawn(Connection::new(transport, state).start());
            }
            None => {
                let transport = PlainTransport::new(stream, peer);
                tokio::spawn(Connection::new(transport, state).start());
            }
        }
    }
}
