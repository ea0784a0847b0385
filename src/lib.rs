//! # rtsf
//!
//! An embeddable async HTTP(S) server: static files are transmitted
//! zero-copy out of shared descriptor and mapping caches, and dynamic content
//! comes from regex routes registered at startup.
//!
//! Each connection serves a single request: read and parse it, dispatch it to
//! the first matching route (or fall back to the document root), write one
//! reply or one file, then close.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtsf::{Config, Request, Response, RouteTable, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut routes = RouteTable::new();
//!     routes.get("^/hi(/)?$", |_req: &Request| {
//!         Response::new(StatusCode::Ok).body("Hello, World!")
//!     })?;
//!
//!     let server = Server::bind(&Config::new("127.0.0.1", 8080, "."), routes).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod http;
pub mod router;
pub mod send;
pub mod server;
pub mod static_files;
pub mod transport;

pub use config::{Config, ConfigError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{RouteTable, RouterError};
pub use server::{Server, ServerError, ServerState};
