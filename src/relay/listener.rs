//! Listening socket and accept loop

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::manager::RelayManager;
use crate::common::error::{Error, Result};
use crate::transport::Transport;

/// Back-off after a failed accept, so a persistent error (EMFILE) does not
/// spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct RelayListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    limit: Option<Arc<Semaphore>>,
}

impl RelayListener {
    /// Bind the listening socket through `transport`
    pub async fn bind(addr: SocketAddr, transport: &dyn Transport, max_pairs: Option<usize>) -> Result<Self> {
        let listener = transport
            .listen(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;

        info!(%local_addr, max_pairs = ?max_pairs, "Listener bound");

        Ok(Self {
            listener,
            local_addr,
            limit: max_pairs.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Accept failures are logged and never end the loop.
    pub async fn serve(self, manager: Arc<RelayManager>, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        info!(local_addr = %self.local_addr, "Accepting connections");

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let permit = match &self.limit {
                        Some(limit) => match Arc::clone(limit).try_acquire_owned() {
                            Ok(permit) => Some(permit),
                            Err(_) => {
                                manager.on_reject(peer);
                                drop(stream);
                                continue;
                            }
                        },
                        None => None,
                    };
                    manager.on_accept(stream, peer, permit);
                }
                Err(e) => {
                    log_accept_error(&e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        info!(
            local_addr = %self.local_addr,
            active_pairs = manager.registry().active(),
            "Listener stopped"
        );
        Ok(())
    }
}

fn log_accept_error(e: &io::Error) {
    error!(error = %e, kind = ?e.kind(), "Accept failed");
}
