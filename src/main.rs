use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rtsf::{Config, Request, Response, RouteTable, Server, StatusCode};

/// Serve a document root over HTTP or HTTPS.
///
/// Examples: `rtsf 0.0.0.0 80 1 .` (IPv4) or `rtsf 0::0 80 1 .` (IPv6).
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to bind
    #[arg(required_unless_present = "config")]
    address: Option<String>,

    /// Port to bind
    #[arg(required_unless_present = "config")]
    port: Option<u16>,

    /// Worker threads
    #[arg(required_unless_present = "config")]
    threads: Option<usize>,

    /// Directory to serve files from
    #[arg(required_unless_present = "config")]
    doc_root: Option<PathBuf>,

    /// PEM certificate chain; enables HTTPS
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// JSON configuration file used instead of the positional arguments
    #[arg(long, conflicts_with_all = ["address", "port", "threads", "doc_root"])]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<Config, rtsf::ConfigError> {
        let mut config = match self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::new(
                self.address.unwrap_or_default(),
                self.port.unwrap_or_default(),
                self.doc_root.unwrap_or_default(),
            )
            .threads(self.threads.unwrap_or_default()),
        };
        if let (Some(cert), Some(key)) = (self.tls_cert, self.tls_key) {
            config = config.tls(cert, key);
        }
        Ok(config)
    }
}

fn routes() -> Result<RouteTable, rtsf::RouterError> {
    let mut routes = RouteTable::new();
    routes.get("^/hi(/)?$", |_req: &Request| {
        Response::new(StatusCode::Ok).body("hi")
    })?;
    Ok(routes)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config()?;
    config.validate()?;
    let routes = routes()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(&config, routes).await?;
        server
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            })
            .await?;
        info!("shut down");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
