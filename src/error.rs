//! Crate error types
//!
//! Only transport setup (socket bind, multicast join, port pair allocation)
//! is fallible. Malformed or unexpected network input is silently discarded
//! by the engine and never surfaces as an error.

use std::io;
use std::net::{IpAddr, SocketAddr};

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for reflector operations
#[derive(Debug)]
pub enum Error {
    /// Failed to bind a UDP socket to the given address
    Bind {
        /// Address the bind was attempted on
        addr: SocketAddr,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Failed to join a multicast group
    MulticastJoin {
        /// Multicast group address
        group: IpAddr,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Could not allocate an adjacent even/odd UDP port pair
    PortPairExhausted,
    /// Other I/O error
    Io(io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Error::MulticastJoin { group, source } => {
                write!(f, "Failed to join multicast group {}: {}", group, source)
            }
            Error::PortPairExhausted => write!(f, "No adjacent even/odd UDP port pair available"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind { source, .. } => Some(source),
            Error::MulticastJoin { source, .. } => Some(source),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
