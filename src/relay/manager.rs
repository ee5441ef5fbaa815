//! Relay manager
//!
//! Owns everything shared between pairs: the backend transport, both TLS
//! contexts, the registry of live pairs and the relay-wide counters. The
//! listener hands every accepted socket to [`RelayManager::on_accept`],
//! which creates the pair and spawns its lifecycle as one task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustls::ServerName;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, instrument, warn, Instrument};

use super::pair::{PairSummary, RelayPair};
use super::pump::PairCounters;
use super::stream::SocketHandle;
use crate::common::config::{Config, RelaySettings};
use crate::common::error::{RelayError, Result};
use crate::common::types::{BackendTarget, PairId, PairInfo, RelayState, Side};
use crate::security::{server_name, TlsClientConfig, TlsServerConfig};
use crate::transport::Transport;

struct PairEntry {
    client_addr: SocketAddr,
    backend: String,
    state: RelayState,
    counters: Arc<PairCounters>,
    accepted_at: DateTime<Utc>,
}

/// Live relay pairs, keyed by id
#[derive(Clone, Default)]
pub struct PairRegistry {
    pairs: Arc<DashMap<PairId, PairEntry>>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        id: PairId,
        client_addr: SocketAddr,
        backend: &BackendTarget,
        counters: Arc<PairCounters>,
    ) {
        self.pairs.insert(
            id,
            PairEntry {
                client_addr,
                backend: backend.to_string(),
                state: RelayState::Accepted,
                counters,
                accepted_at: Utc::now(),
            },
        );
    }

    pub(crate) fn set_state(&self, id: PairId, state: RelayState) {
        if let Some(mut entry) = self.pairs.get_mut(&id) {
            entry.state = state;
        }
    }

    pub(crate) fn remove(&self, id: PairId) {
        self.pairs.remove(&id);
    }

    /// Number of live pairs
    pub fn active(&self) -> usize {
        self.pairs.len()
    }

    pub fn get(&self, id: PairId) -> Option<PairInfo> {
        self.pairs.get(&id).map(|entry| to_info(*entry.key(), entry.value()))
    }

    /// Point-in-time view of every live pair
    pub fn snapshot(&self) -> Vec<PairInfo> {
        let mut pairs: Vec<PairInfo> = self
            .pairs
            .iter()
            .map(|entry| to_info(*entry.key(), entry.value()))
            .collect();
        pairs.sort_by_key(|p| p.accepted_at);
        pairs
    }
}

fn to_info(id: PairId, entry: &PairEntry) -> PairInfo {
    PairInfo {
        id,
        client_addr: entry.client_addr,
        backend: entry.backend.clone(),
        state: entry.state,
        bytes_to_upstream: entry.counters.to_upstream.load(Ordering::Relaxed),
        bytes_to_client: entry.counters.to_client.load(Ordering::Relaxed),
        accepted_at: entry.accepted_at,
    }
}

/// Relay-wide counters
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Connections handed to the manager
    pub accepted: AtomicU64,
    /// Connections closed at accept time because of the pair limit
    pub rejected: AtomicU64,
    /// Pairs whose backend dial (or backend handshake) failed
    pub dial_failures: AtomicU64,
    /// Pairs that reached the relaying state
    pub relayed: AtomicU64,
    pub closed_clean: AtomicU64,
    pub closed_error: AtomicU64,
    pub bytes_to_upstream: AtomicU64,
    pub bytes_to_client: AtomicU64,
}

/// Serializable copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub dial_failures: u64,
    pub relayed: u64,
    pub closed_clean: u64,
    pub closed_error: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            closed_clean: self.closed_clean.load(Ordering::Relaxed),
            closed_error: self.closed_error.load(Ordering::Relaxed),
            bytes_to_upstream: self.bytes_to_upstream.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
        }
    }

    fn add_bytes(&self, counters: &PairCounters) {
        self.bytes_to_upstream
            .fetch_add(counters.to_upstream.load(Ordering::Relaxed), Ordering::Relaxed);
        self.bytes_to_client
            .fetch_add(counters.to_client.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

/// Creates, drives and tears down relay pairs
pub struct RelayManager {
    settings: RelaySettings,
    backend: BackendTarget,
    transport: Arc<dyn Transport>,
    client_tls: Option<TlsAcceptor>,
    backend_tls: Option<(TlsConnector, ServerName)>,
    registry: PairRegistry,
    stats: Arc<RelayStats>,
}

impl RelayManager {
    /// Build the manager and both TLS contexts from `config`
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let backend = config.backend_target();

        let client_tls = match &config.listener.tls {
            Some(tls) => Some(TlsServerConfig::new(tls)?.acceptor()),
            None => None,
        };

        let backend_tls = if config.backend_tls_enabled() {
            let connector = TlsClientConfig::new(&config.backend.tls_options)?.connector();
            Some((connector, server_name(&backend.host)?))
        } else {
            None
        };

        info!(
            backend = %backend,
            transport = transport.name(),
            client_tls = client_tls.is_some(),
            backend_tls = backend_tls.is_some(),
            "Relay manager ready"
        );

        Ok(Self {
            settings: config.relay.clone(),
            backend,
            transport,
            client_tls,
            backend_tls,
            registry: PairRegistry::new(),
            stats: Arc::new(RelayStats::default()),
        })
    }

    pub fn registry(&self) -> &PairRegistry {
        &self.registry
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Count a connection refused because of the pair limit
    pub(crate) fn on_reject(&self, peer: SocketAddr) {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(%peer, "Connection rejected: pair limit reached");
    }

    /// Create a pair for a freshly accepted client and spawn its lifecycle.
    ///
    /// The pair is registered before this returns; `permit` is released
    /// when the pair is gone.
    pub fn on_accept(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) -> PairId {
        let _ = stream.set_nodelay(true);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let pair = RelayPair::accepted(
            stream,
            peer,
            &self.backend,
            self.settings.clone(),
            self.registry.clone(),
        );
        let id = pair.id();
        debug!(pair = %id, %peer, "Client accepted");

        let manager = Arc::clone(self);
        tokio::spawn(
            async move {
                let counters = pair.counters();
                let result = manager.run_pair(pair).await;
                manager.stats.add_bytes(&counters);
                manager.finish(id, result);
                drop(permit);
            }
            .instrument(tracing::info_span!("pair", %id, %peer)),
        );

        id
    }

    async fn run_pair(&self, mut pair: RelayPair) -> std::result::Result<PairSummary, RelayError> {
        if let Some(acceptor) = &self.client_tls {
            pair.accept_tls(acceptor, self.settings.connect_timeout()).await?;
        }

        pair.dial_started();
        let upstream = match self.dial(pair.id()).await {
            Ok(upstream) => upstream,
            Err(e) => {
                self.stats.dial_failures.fetch_add(1, Ordering::Relaxed);
                pair.dial_failed();
                return Err(e);
            }
        };

        self.stats.relayed.fetch_add(1, Ordering::Relaxed);
        pair.relay(upstream).await
    }

    /// Connect to the backend, wrapping the socket in TLS when configured
    #[instrument(skip(self), fields(backend = %self.backend))]
    async fn dial(&self, id: PairId) -> std::result::Result<SocketHandle, RelayError> {
        let connect_timeout = self.settings.connect_timeout();

        let stream = match tokio::time::timeout(connect_timeout, self.transport.dial(&self.backend)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(RelayError::Connect {
                    backend: self.backend.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(RelayError::Connect {
                    backend: self.backend.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no answer within {:?}", connect_timeout),
                    ),
                })
            }
        };

        let peer = stream.peer_addr().ok();
        let handle = match &self.backend_tls {
            Some((connector, name)) => {
                let tls = tokio::time::timeout(connect_timeout, connector.connect(name.clone(), stream))
                    .await
                    .map_err(|_| RelayError::Tls {
                        side: Side::Upstream,
                        source: std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out"),
                    })?
                    .map_err(|source| RelayError::Tls {
                        side: Side::Upstream,
                        source,
                    })?;
                SocketHandle::new(id, Side::Upstream, tls).with_tls(true)
            }
            None => SocketHandle::new(id, Side::Upstream, stream),
        };

        debug!(peer = ?peer, tls = handle.is_tls(), "Backend connected");
        Ok(match peer {
            Some(peer) => handle.with_peer(peer),
            None => handle,
        })
    }

    fn finish(&self, id: PairId, result: std::result::Result<PairSummary, RelayError>) {
        match result {
            Ok(summary) => {
                self.stats.closed_clean.fetch_add(1, Ordering::Relaxed);
                info!(
                    pair = %id,
                    to_upstream = summary.to_upstream,
                    to_client = summary.to_client,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Relay pair closed"
                );
            }
            Err(e) if e.is_connect() => {
                self.stats.closed_error.fetch_add(1, Ordering::Relaxed);
                warn!(pair = %id, error = %e, "Backend dial failed");
            }
            Err(e) => {
                self.stats.closed_error.fetch_add(1, Ordering::Relaxed);
                info!(pair = %id, error = %e, "Relay pair closed with error");
            }
        }
    }
}
