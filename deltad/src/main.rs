use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use miette::IntoDiagnostic;
use tokio::net::UnixListener;
use tokio::signal;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deltadiff_api::deltadiff::delta_diff_service_server::DeltaDiffServiceServer;
use ocidelta::runtime::local::LocalRuntime;

use deltad::{DeltaService, DeltadConfig};

/// Command line arguments for the delta server
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Listen address: a /-prefixed path binds a unix socket, anything else
    /// a TCP listener
    listen_address: String,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = DeltadConfig::load().into_diagnostic()?;
    info!(?config, "loaded configuration");

    let runtime = Arc::new(LocalRuntime::new(&config.runtime_root).into_diagnostic()?);
    let service = DeltaService::new(runtime, config);
    let server = Server::builder().add_service(DeltaDiffServiceServer::new(service));

    info!("starting server on {}", args.listen_address);
    if args.listen_address.starts_with('/') {
        // Remove the socket file if it already exists
        if Path::new(&args.listen_address).exists() {
            std::fs::remove_file(&args.listen_address).into_diagnostic()?;
        }
        let listener = UnixListener::bind(&args.listen_address).into_diagnostic()?;
        server
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown_signal())
            .await
            .into_diagnostic()?;
    } else {
        let addr = args.listen_address.parse().into_diagnostic()?;
        server
            .serve_with_shutdown(addr, shutdown_signal())
            .await
            .into_diagnostic()?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("got signal, will now exit gracefully");
}
