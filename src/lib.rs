//! tcp-relay - Transparent TCP relay
//!
//! Accepts client connections on a local port and relays each one to a fixed
//! backend, optionally wrapping either leg in TLS and optionally reaching the
//! backend through a ZeroTier overlay network.

pub mod cli;
pub mod common;
pub mod overlay;
pub mod relay;
pub mod security;
pub mod transport;

pub use common::{
    config::Config,
    error::{Error, RelayError, Result},
};
pub use relay::RelayServer;

/// tcp-relay library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// tcp-relay library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// tcp-relay library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
