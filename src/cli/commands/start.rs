// startコマンドの実装
//
// 引数から設定を組み立てて中継を開始

use tracing::info;

use crate::cli::commands::{run_relay, CommandResult};
use crate::cli::StartArgs;
use crate::common::config::{Config, OverlayConfig};
use crate::common::error::{Error, Result};
use crate::common::types::TransportKind;
use crate::security::TlsConfig;

pub async fn execute(args: StartArgs) -> CommandResult {
    let config = build_config(args)?;

    info!(
        port = config.listener.port,
        backend = %config.backend_target(),
        transport = %config.backend.transport,
        "Starting relay"
    );

    run_relay(config).await
}

/// Translate command-line arguments into a relay configuration
pub fn build_config(args: StartArgs) -> Result<Config> {
    let mut config = Config::new(args.proxy_port, args.backend);
    config.listener.host = args.bind;

    if args.listen_tls {
        let (cert, key) = args
            .cert
            .zip(args.key)
            .ok_or_else(|| Error::config("--listen-tls requires --cert and --key"))?;
        config.listener.tls = Some(TlsConfig::with_identity(cert, key));
    }

    if args.backend_tls {
        config.backend.tls = Some(true);
    } else if args.no_backend_tls {
        config.backend.tls = Some(false);
    }
    config.backend.tls_options.verify_server_cert = !args.insecure;
    config.backend.tls_options.ca_cert_file = args.ca_cert;

    if let Some(network_id) = args.network_id {
        let storage_path = args
            .storage_path
            .ok_or_else(|| Error::config("NETWORK_ID requires STORAGE_PATH"))?;
        let mut overlay = OverlayConfig::new(network_id, storage_path);
        if let Some(api) = args.zt_api {
            overlay.api_url = api;
        }
        config.backend.transport = TransportKind::Overlay;
        config.overlay = Some(overlay);
    }

    if let Some(size) = args.buffer_size {
        config.relay.buffer_size = size;
    }
    if let Some(secs) = args.connect_timeout {
        config.relay.connect_timeout_secs = secs;
    }
    config.relay.idle_timeout_secs = args.idle_timeout;
    config.relay.half_close_timeout_secs = args.half_close_timeout;
    config.relay.max_pairs = args.max_pairs;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{CliArgs, Commands};
    use clap::Parser;

    fn start_args(argv: &[&str]) -> StartArgs {
        let mut full = vec!["tcp-relay", "start"];
        full.extend_from_slice(argv);
        match CliArgs::try_parse_from(full).unwrap().command {
            Commands::Start(args) => args,
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_port_443_backend_defaults_to_tls() {
        let config = build_config(start_args(&["1080", "www.example.com:443"])).unwrap();
        assert!(config.backend_tls_enabled());
        assert!(!config.listener_tls_enabled());

        let config = build_config(start_args(&["1080", "www.example.com:443", "--no-backend-tls"])).unwrap();
        assert!(!config.backend_tls_enabled());

        let config = build_config(start_args(&["1080", "10.0.0.1:3003", "--backend-tls"])).unwrap();
        assert!(config.backend_tls_enabled());
    }

    #[test]
    fn test_missing_port_means_80() {
        let config = build_config(start_args(&["1080", "backend.internal"])).unwrap();
        assert_eq!(config.backend.port, 80);
        assert_eq!(config.backend.transport, TransportKind::Local);
    }

    #[test]
    fn test_overlay_selected_by_network_id() {
        let config = build_config(start_args(&[
            "1080",
            "172.29.117.46:3003",
            "83048a0632f3031e",
            "./.zt",
            "--zt-api",
            "http://127.0.0.1:19993",
        ]))
        .unwrap();
        assert_eq!(config.backend.transport, TransportKind::Overlay);
        let overlay = config.overlay.unwrap();
        assert_eq!(overlay.network_id.to_string(), "83048a0632f3031e");
        assert_eq!(overlay.api_url, "http://127.0.0.1:19993");
    }

    #[test]
    fn test_relay_policies() {
        let config = build_config(start_args(&[
            "1080",
            "127.0.0.1:3003",
            "--idle-timeout",
            "300",
            "--max-pairs",
            "64",
            "--insecure",
        ]))
        .unwrap();
        assert_eq!(config.relay.idle_timeout_secs, Some(300));
        assert_eq!(config.relay.half_close_timeout_secs, None);
        assert_eq!(config.relay.max_pairs, Some(64));
        assert!(!config.backend.tls_options.verify_server_cert);
    }

    #[test]
    fn test_invalid_bind_rejected() {
        let err = build_config(start_args(&["1080", "127.0.0.1:3003", "--bind", "nowhere"])).unwrap_err();
        assert_eq!(err.exit_code(), crate::common::error::EXIT_USAGE);
    }
}
