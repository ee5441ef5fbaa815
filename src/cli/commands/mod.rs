//! CLI command implementations
//!
//! `start` and `up` only differ in where the configuration comes from; both
//! end up in [`run_relay`].

pub mod config;
pub mod start;
pub mod up;
pub mod version;

use std::sync::Arc;

use tracing::info;

use crate::common::config::Config;
use crate::common::error::{Error, Result};
use crate::common::types::{AddressFamily, TransportKind};
use crate::overlay::{OverlayBootstrap, ZeroTierService};
use crate::relay::RelayServer;
use crate::transport::{LocalTransport, OverlayTransport, Transport};

/// Common result type for all command operations
pub type CommandResult = Result<()>;

/// Bring up the backend transport, bind, and relay until a stop signal
pub async fn run_relay(config: Config) -> CommandResult {
    config.validate()?;
    let config = Arc::new(config);

    let transport = select_transport(&config).await?;
    let server = RelayServer::bind(Arc::clone(&config), transport).await?;

    info!(
        listen = %server.local_addr(),
        backend = %config.backend_target(),
        "Relay started"
    );

    let stats = server.stats();
    server.serve(shutdown_signal()).await?;

    let stats = stats.snapshot();
    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        dial_failures = stats.dial_failures,
        closed_clean = stats.closed_clean,
        closed_error = stats.closed_error,
        bytes_to_upstream = stats.bytes_to_upstream,
        bytes_to_client = stats.bytes_to_client,
        "Relay stopped"
    );
    Ok(())
}

// オーバーレイ使用時はここで準備完了まで待つ (待ち受け開始前)
async fn select_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    match config.backend.transport {
        TransportKind::Local => Ok(Arc::new(LocalTransport)),
        TransportKind::Overlay => {
            let overlay = config
                .overlay
                .as_ref()
                .ok_or_else(|| Error::config("Overlay transport selected without overlay settings"))?;

            let service = ZeroTierService::from_storage(&overlay.storage_path, &overlay.api_url)?;
            let family = AddressFamily::of_host(&config.backend.host);
            let address = OverlayBootstrap::from_config(overlay)
                .run(&service, overlay.network_id, family)
                .await?;

            Ok(Arc::new(OverlayTransport::new(address)))
        }
    }
}

/// Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
