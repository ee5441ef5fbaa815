// tcp-relayのCLIモジュール
//
// コマンドライン引数の解析とコマンド実行機能を提供

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::common::types::{BackendTarget, NetworkId};

pub mod commands;

#[derive(Parser)]
#[command(
    name = "tcp-relay",
    about = "Transparent TCP relay with optional TLS and overlay network backends",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "tcp-relay accepts client connections on a local port and relays each one to a fixed backend. Either leg can be wrapped in TLS, and the backend can be reached through a ZeroTier overlay network."
)]
pub struct CliArgs {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Relay a local port to a backend
    Start(StartArgs),

    /// Start the relay described by a configuration file
    Up(UpArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Show version information
    Version,
}

#[derive(Parser)]
pub struct StartArgs {
    /// Port to accept clients on
    #[arg(value_name = "PROXY_PORT")]
    pub proxy_port: u16,

    /// Backend address (host, host:port or [v6]:port; port defaults to 80)
    #[arg(value_name = "BACKEND")]
    pub backend: BackendTarget,

    /// ZeroTier network to reach the backend through
    #[arg(value_name = "NETWORK_ID", requires = "storage_path")]
    pub network_id: Option<NetworkId>,

    /// ZeroTier home directory (identity.public, authtoken.secret)
    #[arg(value_name = "STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    pub bind: String,

    /// Terminate TLS on the client side
    #[arg(long, requires_all = ["cert", "key"])]
    pub listen_tls: bool,

    /// Certificate chain for the client side (PEM)
    #[arg(long, value_name = "PATH")]
    pub cert: Option<String>,

    /// Private key for the client side (PEM)
    #[arg(long, value_name = "PATH")]
    pub key: Option<String>,

    /// Force TLS towards the backend
    #[arg(long, conflicts_with = "no_backend_tls")]
    pub backend_tls: bool,

    /// Force plain TCP towards the backend
    #[arg(long)]
    pub no_backend_tls: bool,

    /// Skip backend certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// CA certificate used to verify the backend (PEM)
    #[arg(long, value_name = "PATH")]
    pub ca_cert: Option<String>,

    /// Maximum bytes per read
    #[arg(long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// Backend dial timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Close pairs with no traffic for this many seconds
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Close half-closed pairs after this many seconds
    #[arg(long, value_name = "SECS")]
    pub half_close_timeout: Option<u64>,

    /// Maximum number of concurrent pairs
    #[arg(long, value_name = "N")]
    pub max_pairs: Option<usize>,

    /// zerotier-one local API URL
    #[arg(long, value_name = "URL")]
    pub zt_api: Option<String>,
}

#[derive(Parser)]
pub struct UpArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "relay.toml")]
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show a configuration file
    Show {
        /// Configuration file path
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output file path
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
