//! Socket handles owned by relay pairs

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::common::types::{PairId, Side};

/// Any connected byte stream the relay can pump: plain TCP, either TLS
/// flavour, or an in-memory stream in tests.
pub trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayIo for T {}

/// One endpoint of a relay pair
pub struct SocketHandle {
    pair: PairId,
    side: Side,
    tls: bool,
    peer: Option<SocketAddr>,
    io: Box<dyn RelayIo>,
}

impl SocketHandle {
    pub fn new(pair: PairId, side: Side, io: impl RelayIo + 'static) -> Self {
        Self {
            pair,
            side,
            tls: false,
            peer: None,
            io: Box::new(io),
        }
    }

    /// Mark the stream as TLS-wrapped
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub(crate) fn into_io(self) -> Box<dyn RelayIo> {
        self.io
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("pair", &self.pair)
            .field("side", &self.side)
            .field("tls", &self.tls)
            .field("peer", &self.peer)
            .finish()
    }
}
