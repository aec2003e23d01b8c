use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::proxy::dialer;
use crate::proxy::relay::{self, Outcome, Summary};
use crate::proxy::tls_acceptor::Incoming;

/// Drive one accepted connection from handshake to teardown.
///
/// Failures end only this session. Both connections are closed by the time
/// this returns, whichever stage failed.
pub async fn handle(incoming: Incoming, config: &Config) {
    match serve(incoming, config).await {
        Ok(summary) => log_summary(&summary),
        Err(e) => log_failure(&e),
    }
}

async fn serve(incoming: Incoming, config: &Config) -> Result<Summary> {
    // Absolute: counted from accept and never extended by traffic.
    let deadline = incoming.accepted_at() + config.session_deadline;

    let client = incoming.handshake(deadline).await.map_err(Error::Handshake)?;
    let backend = dialer::dial(&config.backend_addr, config.connect_timeout).await?;

    Ok(relay::relay(client, backend, deadline).await)
}

fn log_failure(error: &Error) {
    match error {
        Error::Handshake(_) => info!(stage = "handshake", error = %error, "TLS handshake failed"),
        Error::Dial { .. } => {
            warn!(stage = "dial", error = %error, "backend unavailable, closing client")
        }
        _ => warn!(stage = "session", error = %error, "session aborted"),
    }
}

fn log_summary(summary: &Summary) {
    match &summary.outcome {
        Outcome::Failed { direction, error } => warn!(
            stage = "relay",
            direction = %direction,
            error = %error,
            client_to_backend = summary.client_to_backend,
            backend_to_client = summary.backend_to_client,
            "session ended with error"
        ),
        Outcome::Ended { direction } => debug!(
            direction = %direction,
            client_to_backend = summary.client_to_backend,
            backend_to_client = summary.backend_to_client,
            "session closed"
        ),
    }
}
