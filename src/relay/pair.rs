//! Relay pair
//!
//! A pair owns the client socket from the moment it is accepted and, once
//! the dial succeeds, the upstream socket too. Both are closed exactly once,
//! when the pair is dropped. State changes go through
//! [`RelayState::on_event`] and are mirrored into the registry.

use std::future::pending;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};

use super::manager::PairRegistry;
use super::pump::{PairCounters, Pump, PumpError};
use super::stream::{RelayIo, SocketHandle};
use crate::common::config::RelaySettings;
use crate::common::error::RelayError;
use crate::common::types::{BackendTarget, PairEvent, PairId, RelayState, Side};

/// What a cleanly finished pair moved
#[derive(Debug, Clone, Copy)]
pub struct PairSummary {
    pub to_upstream: u64,
    pub to_client: u64,
    pub elapsed: Duration,
}

pub struct RelayPair {
    id: PairId,
    client: Option<SocketHandle>,
    state: RelayState,
    settings: RelaySettings,
    registry: PairRegistry,
    counters: Arc<PairCounters>,
    started: Instant,
}

impl RelayPair {
    /// Register a pair for a client that was just accepted
    pub fn accepted(
        stream: TcpStream,
        peer: SocketAddr,
        backend: &BackendTarget,
        settings: RelaySettings,
        registry: PairRegistry,
    ) -> Self {
        Self::from_io(stream, peer, backend, settings, registry)
    }

    pub(crate) fn from_io(
        io: impl RelayIo + 'static,
        peer: SocketAddr,
        backend: &BackendTarget,
        settings: RelaySettings,
        registry: PairRegistry,
    ) -> Self {
        let id = PairId::new();
        let counters = Arc::new(PairCounters::default());
        registry.register(id, peer, backend, counters.clone());

        Self {
            id,
            client: Some(SocketHandle::new(id, Side::Client, io).with_peer(peer)),
            state: RelayState::Accepted,
            settings,
            registry,
            counters,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn counters(&self) -> Arc<PairCounters> {
        Arc::clone(&self.counters)
    }

    fn transition(&mut self, event: PairEvent) {
        let next = self.state.on_event(event);
        if next != self.state {
            debug!(pair = %self.id, from = %self.state, to = %next, ?event, "State change");
            self.state = next;
            self.registry.set_state(self.id, next);
        }
    }

    fn take_client(&mut self) -> Result<SocketHandle, RelayError> {
        self.client.take().ok_or_else(|| RelayError::Io {
            side: Side::Client,
            source: std::io::Error::new(std::io::ErrorKind::NotConnected, "client socket released"),
        })
    }

    /// Terminate TLS on the client socket
    pub async fn accept_tls(&mut self, acceptor: &TlsAcceptor, timeout: Duration) -> Result<(), RelayError> {
        let client = self.take_client()?;
        let peer = client.peer();

        let result = tokio::time::timeout(timeout, acceptor.accept(client.into_io())).await;
        let tls = match result {
            Ok(Ok(tls)) => tls,
            Ok(Err(source)) => {
                self.transition(PairEvent::Failed);
                return Err(RelayError::Tls {
                    side: Side::Client,
                    source,
                });
            }
            Err(_) => {
                self.transition(PairEvent::Failed);
                return Err(RelayError::Tls {
                    side: Side::Client,
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out"),
                });
            }
        };

        let mut handle = SocketHandle::new(self.id, Side::Client, tls).with_tls(true);
        if let Some(peer) = peer {
            handle = handle.with_peer(peer);
        }
        self.client = Some(handle);
        Ok(())
    }

    pub fn dial_started(&mut self) {
        self.transition(PairEvent::DialStarted);
    }

    /// Give up on the pair; the client socket is closed on drop
    pub fn dial_failed(mut self) {
        self.transition(PairEvent::DialFailed);
    }

    /// Pump both directions until both have reached end-of-stream, or until
    /// the first error or timeout.
    #[instrument(skip_all, fields(pair = %self.id))]
    pub async fn relay(mut self, upstream: SocketHandle) -> Result<PairSummary, RelayError> {
        let client = self.take_client()?;
        self.transition(PairEvent::DialSucceeded);

        debug!(?client, ?upstream, "Relaying");

        let client_tls = client.is_tls();
        let upstream_tls = upstream.is_tls();
        let tls_of = move |side: Side| match side {
            Side::Client => client_tls,
            Side::Upstream => upstream_tls,
        };

        let chunk = self.settings.buffer_size;
        let (client_read, client_write) = tokio::io::split(client.into_io());
        let (upstream_read, upstream_write) = tokio::io::split(upstream.into_io());

        let to_upstream = Pump::new(Side::Client, client_read, upstream_write, chunk)
            .with_counters(self.counters.clone())
            .run();
        let to_client = Pump::new(Side::Upstream, upstream_read, client_write, chunk)
            .with_counters(self.counters.clone())
            .run();
        tokio::pin!(to_upstream, to_client);

        let mut client_done = false;
        let mut upstream_done = false;
        let mut half_close_deadline: Option<Instant> = None;

        let idle_timeout = self.settings.idle_timeout();
        let mut idle_check = idle_timeout.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut last_total = self.counters.total();

        while !(client_done && upstream_done) {
            tokio::select! {
                result = &mut to_upstream, if !client_done => {
                    client_done = true;
                    self.end_of_stream(Side::Client, result, tls_of)?;
                }
                result = &mut to_client, if !upstream_done => {
                    upstream_done = true;
                    self.end_of_stream(Side::Upstream, result, tls_of)?;
                }
                _ = wait_until(half_close_deadline) => {
                    self.transition(PairEvent::Failed);
                    return Err(RelayError::HalfCloseTimeout(
                        self.settings.half_close_timeout().unwrap_or_default(),
                    ));
                }
                _ = next_tick(&mut idle_check) => {
                    let total = self.counters.total();
                    if total == last_total {
                        self.transition(PairEvent::Failed);
                        return Err(RelayError::IdleTimeout(idle_timeout.unwrap_or_default()));
                    }
                    last_total = total;
                }
            }

            if half_close_deadline.is_none() && self.state.is_half_closed() {
                half_close_deadline = self
                    .settings
                    .half_close_timeout()
                    .map(|timeout| Instant::now() + timeout);
            }
        }

        Ok(PairSummary {
            to_upstream: self.counters.to_upstream.load(std::sync::atomic::Ordering::Relaxed),
            to_client: self.counters.to_client.load(std::sync::atomic::Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        })
    }

    fn end_of_stream(
        &mut self,
        from: Side,
        result: Result<u64, PumpError>,
        tls_of: impl Fn(Side) -> bool,
    ) -> Result<(), RelayError> {
        match result {
            Ok(bytes) => {
                debug!(pair = %self.id, %from, bytes, "Direction drained");
                self.transition(PairEvent::EndOfStream(from));
                Ok(())
            }
            Err(e) => {
                self.transition(PairEvent::Failed);
                Err(match e {
                    PumpError::Read(source) => RelayError::from_io(from, tls_of(from), source),
                    PumpError::Write(source) => {
                        let to = from.opposite();
                        RelayError::from_io(to, tls_of(to), source)
                    }
                })
            }
        }
    }
}

impl Drop for RelayPair {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        debug!(pair = %self.id, state = %self.state, "Pair released");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
