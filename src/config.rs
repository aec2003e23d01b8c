use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

/// Command-line flags. Every flag can also be supplied through its
/// environment variable.
#[derive(Debug, Parser)]
#[command(author, version, about = "TLS-terminating TCP relay", long_about = None)]
pub struct Args {
    /// Address to accept TLS connections on (host:port).
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    pub listen: String,

    /// Plaintext backend every session is relayed to (host:port).
    #[arg(long, env = "BACKEND_ADDR", default_value = "localhost:7251")]
    pub backend: String,

    /// PEM file holding the certificate chain.
    #[arg(long, env = "TLS_CERT", default_value = "./server.crt")]
    pub cert: PathBuf,

    /// PEM file holding the private key.
    #[arg(long, env = "TLS_KEY", default_value = "./server.key")]
    pub key: PathBuf,

    /// Backend connect timeout in milliseconds.
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Hard cap on a session's lifetime, counted from accept.
    #[arg(long, env = "SESSION_DEADLINE_SECS", default_value_t = 60)]
    pub session_deadline_secs: u64,

    /// Maximum number of concurrent sessions. Unbounded when unset.
    #[arg(long, env = "MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Immutable process-wide settings, built once before the listener starts.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub backend_addr: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub connect_timeout: Duration,
    pub session_deadline: Duration,
    pub max_sessions: Option<usize>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        validate_host_port("listen", &args.listen)?;
        validate_host_port("backend", &args.backend)?;

        if args.connect_timeout_ms == 0 {
            return Err(Error::Config("connect timeout must be greater than zero".into()));
        }
        if args.session_deadline_secs == 0 {
            return Err(Error::Config("session deadline must be greater than zero".into()));
        }
        if args.max_sessions == Some(0) {
            return Err(Error::Config("max sessions must be greater than zero when set".into()));
        }

        Ok(Config {
            listen_addr: args.listen,
            backend_addr: args.backend,
            cert_path: args.cert,
            key_path: args.key,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            session_deadline: Duration::from_secs(args.session_deadline_secs),
            max_sessions: args.max_sessions,
            log_format: args.log_format,
        })
    }
}

fn validate_host_port(flag: &str, value: &str) -> Result<()> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("invalid --{flag} '{value}': expected host:port")))?;

    port.parse::<u16>()
        .map_err(|e| Error::Config(format!("invalid --{flag} port '{port}': {e}")))?;

    // Bracketed IPv6 literals keep their colons inside the brackets.
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(Error::Config(format!(
            "invalid --{flag} '{value}': IPv6 hosts must be bracketed"
        )));
    }

    Ok(())
}
