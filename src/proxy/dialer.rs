use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};

/// Open a plaintext connection to the backend, giving up after `connect_timeout`.
///
/// Name resolution counts against the same timeout.
pub async fn dial(backend_addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = match timeout(connect_timeout, TcpStream::connect(backend_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(Error::Dial {
                addr: backend_addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(Error::Dial {
                addr: backend_addr.to_string(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {connect_timeout:?}"),
                ),
            })
        }
    };

    // Interactive protocols behind the relay should not wait on Nagle.
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY on backend connection");
    }

    debug!(backend = %backend_addr, "backend connected");
    Ok(stream)
}
