//! Command-line flags and runtime configuration for both forwarders.
//!
//! The client and server binaries expose the same flag surface; only the
//! default listen address differs between the two roles.

use crate::frame;
use clap::error::ErrorKind;
use clap::Parser;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::lookup_host;

/// Default client listen address (UDP side).
pub const DEFAULT_CLIENT_SOURCE: &str = ":2203";

/// Default server listen address (TCP side).
pub const DEFAULT_SERVER_SOURCE: &str = ":3000";

/// Default maximum datagram transfer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 10240;

/// Configuration errors.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("target address is required")]
    TargetRequired,

    #[error("invalid address {0:?}: missing port")]
    MissingPort(String),

    #[error("buffer size must be greater than zero")]
    ZeroBuffer,

    #[error("buffer size {0} exceeds the frame payload limit of {max} bytes", max = frame::MAX_PAYLOAD_SIZE)]
    BufferTooLarge(usize),
}

/// Which forwarder a binary runs as. Decides the default listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn default_source(self) -> &'static str {
        match self {
            Role::Client => DEFAULT_CLIENT_SOURCE,
            Role::Server => DEFAULT_SERVER_SOURCE,
        }
    }
}

/// CLI argument parser, shared by both binaries.
#[derive(Parser, Debug, Default)]
#[command(about = "Tunnels UDP datagrams over a TCP connection")]
pub struct CliArgs {
    /// Address to listen on (e.g., :2203)
    #[arg(long)]
    pub source: Option<String>,

    /// Target address to forward to (e.g., 192.168.1.10:3000)
    #[arg(long)]
    pub target: Option<String>,

    /// Suppress info-level logging
    #[arg(long)]
    pub quiet: bool,

    /// Maximum datagram transfer size in bytes
    #[arg(long)]
    pub buffer: Option<usize>,
}

/// Validated runtime configuration for one forwarder.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Listen address (UDP for the client, TCP for the server).
    pub source: String,
    /// Forward-to address (TCP for the client, UDP for the server).
    pub target: String,
    pub quiet: bool,
    /// Maximum datagram transfer size in bytes.
    pub buffer: usize,
}

/// Resolves CLI arguments into a validated configuration for the given role.
pub fn load(args: CliArgs, role: Role) -> Result<Config, ConfigError> {
    let source = args
        .source
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| role.default_source().to_string());
    let source = normalize_listen_addr(&source);
    require_port(&source)?;

    let target = match args.target {
        Some(t) if !t.is_empty() => t,
        _ => return Err(ConfigError::TargetRequired),
    };
    require_port(&target)?;

    let buffer = args.buffer.unwrap_or(DEFAULT_BUFFER_SIZE);
    if buffer == 0 {
        return Err(ConfigError::ZeroBuffer);
    }
    // A datagram larger than this can never be framed, so reject the
    // configuration up front instead of failing sessions at runtime.
    if buffer > frame::MAX_PAYLOAD_SIZE {
        return Err(ConfigError::BufferTooLarge(buffer));
    }

    Ok(Config {
        source,
        target,
        quiet: args.quiet,
        buffer,
    })
}

/// Parses the command line, exiting 0 on a help/version request and 1 on a
/// flag-parse error.
pub fn parse_or_exit() -> CliArgs {
    match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(1),
            }
        }
    }
}

/// Resolves a target address, failing when it cannot be resolved.
///
/// Both forwarders resolve their target at startup; an unresolvable target
/// is a fatal startup error, not something to retry against.
pub async fn resolve_target(addr: &str) -> io::Result<SocketAddr> {
    lookup_host(addr).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("could not resolve target address {addr:?}"),
        )
    })
}

/// Normalizes a listen address by replacing an empty host with "0.0.0.0",
/// so Go-style ":2203" becomes "0.0.0.0:2203".
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

fn require_port(addr: &str) -> Result<(), ConfigError> {
    // Bracketed IPv6 hosts carry the port after the closing bracket.
    let rest = match addr.rfind(']') {
        Some(i) => &addr[i + 1..],
        None => addr,
    };
    if rest.contains(':') {
        Ok(())
    } else {
        Err(ConfigError::MissingPort(addr.to_string()))
    }
}
