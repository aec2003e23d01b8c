use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::proxy::deadline::Deadline;

const COPY_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// How the first direction to finish ended. Whichever comes first decides the
/// session; the other direction is torn down without being consulted.
#[derive(Debug)]
pub enum Outcome {
    /// The source side reached end-of-stream.
    Ended { direction: Direction },
    /// A read or write failed, including a client deadline timeout.
    Failed { direction: Direction, error: io::Error },
}

impl Outcome {
    pub fn direction(&self) -> Direction {
        match self {
            Outcome::Ended { direction } | Outcome::Failed { direction, .. } => *direction,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug)]
pub struct Summary {
    pub outcome: Outcome,
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Shuttle bytes between `client` and `backend` until either direction ends.
///
/// Each direction runs as its own task. When the first one finishes, the other
/// is stopped and every connection half is dropped before this returns, which
/// closes both connections. Reads and writes on the client fail once
/// `deadline` has passed.
pub async fn relay<C, B>(client: C, backend: B, deadline: Instant) -> Summary
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = tokio::io::split(client);
    let (backend_rd, backend_wr) = tokio::io::split(backend);

    let upstream = Arc::new(AtomicU64::new(0));
    let downstream = Arc::new(AtomicU64::new(0));

    let mut pumps = JoinSet::new();
    let upstream_id = pumps
        .spawn(pump(
            Deadline::new(client_rd, deadline),
            backend_wr,
            Direction::ClientToBackend,
            upstream.clone(),
        ))
        .id();
    pumps.spawn(pump(
        backend_rd,
        Deadline::new(client_wr, deadline),
        Direction::BackendToClient,
        downstream.clone(),
    ));

    let outcome = match pumps.join_next_with_id().await {
        Some(Ok((_, outcome))) => outcome,
        Some(Err(e)) => {
            let direction = if e.id() == upstream_id {
                Direction::ClientToBackend
            } else {
                Direction::BackendToClient
            };
            Outcome::Failed {
                direction,
                error: io::Error::other(e),
            }
        }
        None => unreachable!("relay spawns two pumps"),
    };

    // Stop the direction still running and wait for its halves to drop.
    pumps.shutdown().await;

    Summary {
        outcome,
        client_to_backend: upstream.load(Ordering::Relaxed),
        backend_to_client: downstream.load(Ordering::Relaxed),
    }
}

/// Copy `reader` into `writer` until end-of-stream or the first I/O error.
/// On end-of-stream the writer is shut down before returning.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    copied: Arc<AtomicU64>,
) -> Outcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            // A TLS peer hanging up without close_notify is an ordinary close.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(error) => return Outcome::Failed { direction, error },
        };

        if n == 0 {
            // Pass the close on: a FIN to the backend, close_notify to the client.
            let _ = writer.shutdown().await;
            return Outcome::Ended { direction };
        }

        // Flush every chunk: TLS writers buffer records until flushed.
        let written = match writer.write_all(&buf[..n]).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(error) = written {
            return Outcome::Failed { direction, error };
        }

        copied.fetch_add(n as u64, Ordering::Relaxed);
    }
}
