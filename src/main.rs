use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tls_relay::cert::loader;
use tls_relay::proxy::tls_acceptor::{self, SecureListener};
use tls_relay::{Args, Config, LogFormat};

#[tokio::main]
async fn main() {
    let config = match Config::from_args(Args::parse()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    init_logging(config.log_format);
    info!(
        listen = %config.listen_addr,
        backend = %config.backend_addr,
        cert = %config.cert_path.display(),
        session_deadline_secs = config.session_deadline.as_secs(),
        "tls-relay starting"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "tls-relay exited with error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> tls_relay::Result<()> {
    // Certificate and socket problems are fatal before any client is served.
    let tls = loader::load_server_config(&config.cert_path, &config.key_path)?;
    let listener = SecureListener::bind(&config.listen_addr, tls).await?;

    tokio::select! {
        result = tls_acceptor::run(listener, Arc::new(config)) => result,
        _ = shutdown_signal() => {
            info!("shutdown signal received, exiting without draining sessions");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
