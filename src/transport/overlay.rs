use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

use super::{resolve, Transport};
use crate::common::types::BackendTarget;
use crate::overlay::OverlayAddress;

/// Backend leg carried over the joined overlay network.
///
/// Only constructible from a completed bootstrap, so a dial can never be
/// issued before the node is online and an address is assigned.
#[derive(Debug, Clone)]
pub struct OverlayTransport {
    address: OverlayAddress,
}

impl OverlayTransport {
    pub fn new(address: OverlayAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &OverlayAddress {
        &self.address
    }

    fn socket_for(&self, local: IpAddr) -> io::Result<TcpSocket> {
        let socket = match local {
            IpAddr::V4(_) => TcpSocket::new_v4()?,
            IpAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.bind(SocketAddr::new(local, 0))?;
        Ok(socket)
    }
}

#[async_trait]
impl Transport for OverlayTransport {
    fn name(&self) -> &'static str {
        "overlay"
    }

    async fn listen(&self, addr: SocketAddr) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    async fn dial(&self, target: &BackendTarget) -> io::Result<TcpStream> {
        let local = self.address.ip;
        let family = self.address.family();
        let mut last_error = None;

        for addr in resolve(target, |addr| family.matches(&addr.ip())).await? {
            let socket = self.socket_for(local)?;
            match socket.connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(%addr, %local, error = %e, "Overlay dial attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::NetworkId;

    fn loopback_overlay() -> OverlayTransport {
        OverlayTransport::new(OverlayAddress {
            network: NetworkId(0x8304_8a06_32f3_031e),
            node_id: "89e92ceee5".to_string(),
            ip: "127.0.0.1".parse().unwrap(),
        })
    }

    #[tokio::test]
    async fn test_dial_binds_overlay_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = loopback_overlay();
        let target = BackendTarget::new("127.0.0.1", port);
        let (dialed, accepted) = tokio::join!(
            transport.dial(&target),
            listener.accept()
        );

        let dialed = dialed.unwrap();
        let (_, peer) = accepted.unwrap();
        assert_eq!(dialed.local_addr().unwrap().ip(), transport.address().ip);
        assert_eq!(peer.ip(), transport.address().ip);
    }

    #[tokio::test]
    async fn test_dial_skips_other_family() {
        let transport = loopback_overlay();
        let result = transport.dial(&BackendTarget::new("::1", 80)).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
