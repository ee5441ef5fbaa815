//! Transport providers
//!
//! The relay never cares which fabric carries the backend leg: both the host
//! network stack and the overlay network sit behind [`Transport`].

mod local;
mod overlay;

pub use local::LocalTransport;
pub use overlay::OverlayTransport;

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::common::types::BackendTarget;

/// "Create a listening socket" and "create and connect a client socket" over
/// one fabric.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Bind a listening socket
    async fn listen(&self, addr: SocketAddr) -> io::Result<TcpListener>;

    /// Resolve `target` and connect to it
    async fn dial(&self, target: &BackendTarget) -> io::Result<TcpStream>;
}

/// Resolve `target`, keeping only addresses accepted by `filter`.
pub(crate) async fn resolve(
    target: &BackendTarget,
    filter: impl Fn(&SocketAddr) -> bool,
) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await?
        .filter(|addr| filter(addr))
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no usable address for {}", target),
        ));
    }

    Ok(addrs)
}
