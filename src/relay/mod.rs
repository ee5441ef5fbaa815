//! Relay core
//!
//! accept → dial → pair → pump → teardown. The listener accepts clients,
//! the manager turns each one into a [`RelayPair`], and each pair pumps
//! bytes in both directions until both sides are done.

mod listener;
mod manager;
mod pair;
mod pump;
mod stream;

pub use listener::RelayListener;
pub use manager::{PairRegistry, RelayManager, RelayStats, StatsSnapshot};
pub use pair::{PairSummary, RelayPair};
pub use pump::{PairCounters, Pump, PumpError};
pub use stream::{RelayIo, SocketHandle};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::common::config::Config;
use crate::common::error::Result;
use crate::transport::Transport;

/// A bound relay: listener plus manager
pub struct RelayServer {
    listener: RelayListener,
    manager: Arc<RelayManager>,
}

impl RelayServer {
    /// Build TLS contexts and bind the listening socket
    pub async fn bind(config: Arc<Config>, transport: Arc<dyn Transport>) -> Result<Self> {
        let manager = Arc::new(RelayManager::new(&config, Arc::clone(&transport))?);
        let listener =
            RelayListener::bind(config.listen_addr()?, transport.as_ref(), config.relay.max_pairs).await?;

        Ok(Self { listener, manager })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> PairRegistry {
        self.manager.registry().clone()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.manager.stats()
    }

    /// Relay until `shutdown` resolves
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.listener.serve(self.manager, shutdown).await
    }
}
