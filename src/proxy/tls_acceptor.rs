use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, Instrument};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::proxy::session;

/// A bound TCP socket paired with the TLS identity every connection is
/// handshaken against.
pub struct SecureListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl SecureListener {
    pub async fn bind(addr: &str, tls: Arc<ServerConfig>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next TCP connection. The TLS handshake is left to the
    /// caller so a slow client never holds up the accept loop.
    pub async fn accept(&self) -> io::Result<Incoming> {
        let (stream, peer_addr) = self.listener.accept().await?;
        Ok(Incoming {
            stream,
            peer_addr,
            acceptor: self.acceptor.clone(),
            accepted_at: Instant::now(),
        })
    }
}

/// A connection that has been accepted but not yet handshaken.
pub struct Incoming {
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    accepted_at: Instant,
}

impl Incoming {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Run the TLS server handshake, failing if it is still in progress at
    /// `deadline`.
    pub async fn handshake(self, deadline: Instant) -> io::Result<TlsStream<TcpStream>> {
        match timeout_at(deadline, self.acceptor.accept(self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "TLS handshake did not complete before the session deadline",
            )),
        }
    }
}

/// Accept connections until the listener fails, spawning one session task
/// per connection.
///
/// Sessions are fire-and-forget: the loop never waits on one. With
/// `max_sessions` set, the loop waits for a free slot before accepting.
pub async fn run(listener: SecureListener, config: Arc<Config>) -> Result<()> {
    let limiter = config.max_sessions.map(|n| Arc::new(Semaphore::new(n)));

    info!(
        addr = %listener.local_addr()?,
        backend = %config.backend_addr,
        max_sessions = ?config.max_sessions,
        "TLS relay listening"
    );

    loop {
        let permit = match &limiter {
            Some(limiter) => Some(
                limiter
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Accept(io::Error::other(e)))?,
            ),
            None => None,
        };

        let incoming = match listener.accept().await {
            Ok(incoming) => incoming,
            Err(e) => {
                error!(error = %e, "failed to accept TCP connection, stopping listener");
                return Err(Error::Accept(e));
            }
        };

        let peer = incoming.peer_addr();
        debug!(peer = %peer, "accepted TCP connection");

        let config = config.clone();
        tokio::spawn(
            async move {
                session::handle(incoming, &config).await;
                drop(permit);
            }
            .instrument(tracing::info_span!("session", peer = %peer)),
        );
    }
}
