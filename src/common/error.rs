//! Error handling for the relay
//!
//! This module defines the application-wide error type, the per-pair
//! [`RelayError`], and the process exit codes derived from them.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::common::types::Side;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for invalid or missing arguments and configuration
pub const EXIT_USAGE: i32 = 10;

/// Exit code when the listening socket cannot be bound
pub const EXIT_BIND: i32 = 20;

/// Exit code for unrecoverable overlay bootstrap failures
pub const EXIT_OVERLAY: i32 = 30;

/// Exit code for every other runtime failure
pub const EXIT_FAILURE: i32 = 1;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listening socket could not be created
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// TLS setup errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Overlay network bootstrap errors
    #[error("Overlay bootstrap error: {0}")]
    Overlay(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new overlay bootstrap error
    pub fn overlay(msg: impl Into<String>) -> Self {
        Error::Overlay(msg.into())
    }

    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Toml(_) | Error::Tls(_) => EXIT_USAGE,
            Error::Bind { .. } => EXIT_BIND,
            Error::Overlay(_) => EXIT_OVERLAY,
            Error::Io(_) => EXIT_FAILURE,
        }
    }
}

/// Failure scoped to a single relay pair.
///
/// None of these ever reach the listener; they end the owning pair and are
/// logged.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Backend dial failed (refused, unreachable, timeout, resolution)
    #[error("connect to {backend} failed: {source}")]
    Connect {
        backend: String,
        #[source]
        source: io::Error,
    },

    /// Read or write failure on an established socket
    #[error("{side} I/O error: {source}")]
    Io {
        side: Side,
        #[source]
        source: io::Error,
    },

    /// Handshake or record-layer failure
    #[error("{side} TLS error: {source}")]
    Tls {
        side: Side,
        #[source]
        source: io::Error,
    },

    /// No bytes moved in either direction
    #[error("idle for longer than {0:?}")]
    IdleTimeout(Duration),

    #[error("half-closed for longer than {0:?}")]
    HalfCloseTimeout(Duration),
}

impl RelayError {
    /// Classify an I/O failure on `side`.
    ///
    /// tokio-rustls reports record and handshake failures as `InvalidData`.
    pub fn from_io(side: Side, tls: bool, source: io::Error) -> Self {
        if tls && source.kind() == io::ErrorKind::InvalidData {
            RelayError::Tls { side, source }
        } else {
            RelayError::Io { side, source }
        }
    }

    /// Whether the pair failed before it ever reached the relaying state
    pub fn is_connect(&self) -> bool {
        matches!(self, RelayError::Connect { .. })
    }
}
