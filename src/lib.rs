//! TLS-terminating TCP relay.
//!
//! Accepts TLS connections, terminates them with a fixed certificate, and
//! relays the plaintext bytes to a single backend address until either side
//! closes, an I/O error occurs, or the session deadline passes.

pub mod cert;
pub mod config;
pub mod error;
pub mod proxy;

pub use config::{Args, Config, LogFormat};
pub use error::{Error, Result};
pub use proxy::tls_acceptor::SecureListener;
