// Relay設定管理
//
// 起動時に一度だけ構築され、以後は Arc<Config> として共有される。
// ソース：CLI引数 (start) または設定ファイル (up)

use crate::common::error::{Error, Result};
use crate::common::types::{BackendTarget, NetworkId, TransportKind, DEFAULT_BACKEND_PORT};
use crate::security::TlsConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

// メイン設定構造体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listener: ListenerConfig,
    pub backend: BackendConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayConfig>,
    #[serde(default)]
    pub relay: RelaySettings,
}

// 待ち受け側設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    pub port: u16,
    // 指定された場合はクライアント側をTLSで終端
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

// バックエンド設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: TransportKind,
    // 未指定の場合はポート番号から推定 (xx443 => TLS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    #[serde(default)]
    pub tls_options: TlsConfig,
}

// オーバーレイネットワーク設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub network_id: NetworkId,
    // ZeroTier Oneのホームディレクトリ (identity.public, authtoken.secret)
    pub storage_path: PathBuf,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

// 中継動作の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    // 1回の読み込みで扱う最大バイト数
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    // 以下は未指定で無効
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_close_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pairs: Option<usize>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: None,
            half_close_timeout_secs: None,
            max_pairs: None,
        }
    }
}

impl RelaySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn half_close_timeout(&self) -> Option<Duration> {
        self.half_close_timeout_secs.map(Duration::from_secs)
    }
}

impl OverlayConfig {
    pub fn new(network_id: NetworkId, storage_path: PathBuf) -> Self {
        Self {
            network_id,
            storage_path,
            api_url: default_api_url(),
            poll_interval_ms: default_poll_interval_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl Config {
    // 最小構成の設定を作成
    pub fn new(listen_port: u16, backend: BackendTarget) -> Self {
        Config {
            listener: ListenerConfig {
                host: default_listen_host(),
                port: listen_port,
                tls: None,
            },
            backend: BackendConfig {
                host: backend.host,
                port: backend.port,
                transport: TransportKind::Local,
                tls: None,
                tls_options: TlsConfig::default(),
            },
            overlay: None,
            relay: RelaySettings::default(),
        }
    }

    // ファイルから設定を読み込み
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    // 設定をファイルに保存
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    // サンプル設定を生成
    pub fn sample() -> Self {
        let mut config = Config::new(1080, BackendTarget::new("172.29.117.46", 3003));
        config.backend.transport = TransportKind::Overlay;
        config.overlay = Some(OverlayConfig::new(
            NetworkId(0x8304_8a06_32f3_031e),
            PathBuf::from("./.zt"),
        ));
        config
    }

    // 設定の妥当性を検証
    pub fn validate(&self) -> Result<()> {
        self.listener
            .host
            .parse::<IpAddr>()
            .map_err(|_| Error::config(format!("Invalid listen address: {}", self.listener.host)))?;

        if let Some(tls) = &self.listener.tls {
            if tls.cert_file.is_none() || tls.key_file.is_none() {
                return Err(Error::config(
                    "Listener TLS requires both cert_file and key_file",
                ));
            }
        }

        if self.backend.host.is_empty() {
            return Err(Error::config("Backend host cannot be empty"));
        }

        if self.backend.transport == TransportKind::Overlay && self.overlay.is_none() {
            return Err(Error::config(
                "Overlay transport selected but no [overlay] section configured",
            ));
        }

        if let Some(overlay) = &self.overlay {
            if overlay.poll_interval_ms == 0 {
                return Err(Error::config("Overlay poll interval cannot be 0"));
            }
        }

        if self.relay.buffer_size == 0 {
            return Err(Error::config("Relay buffer size cannot be 0"));
        }

        if self.relay.max_pairs == Some(0) {
            return Err(Error::config("max_pairs cannot be 0"));
        }

        Ok(())
    }

    // 待ち受けアドレスを取得
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listener
            .host
            .parse()
            .map_err(|_| Error::config(format!("Invalid listen address: {}", self.listener.host)))?;
        Ok(SocketAddr::new(ip, self.listener.port))
    }

    // ポート0は既定の80として扱う
    pub fn backend_target(&self) -> BackendTarget {
        BackendTarget::new(self.backend.host.clone(), self.backend.port)
    }

    // 明示的な指定がなければポート番号から判断
    pub fn backend_tls_enabled(&self) -> bool {
        self.backend
            .tls
            .unwrap_or_else(|| self.backend_target().implies_tls())
    }

    pub fn listener_tls_enabled(&self) -> bool {
        self.listener.tls.is_some()
    }
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backend_port() -> u16 {
    DEFAULT_BACKEND_PORT
}

fn default_api_url() -> String {
    "http://127.0.0.1:9993".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_buffer_size() -> usize {
    8192
}

fn default_connect_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_validation() {
        let config = Config::new(1080, BackendTarget::new("127.0.0.1", 80));
        assert!(config.validate().is_ok());

        let config = Config::sample();
        assert!(config.validate().is_ok());

        let mut config = Config::sample();
        config.overlay = None;
        assert!(config.validate().is_err());

        let mut config = Config::new(1080, BackendTarget::new("127.0.0.1", 80));
        config.listener.host = "not-an-ip".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::new(1080, BackendTarget::new("127.0.0.1", 80));
        config.listener.tls = Some(TlsConfig::default());
        assert!(config.validate().is_err());

        let mut config = Config::new(1080, BackendTarget::new("127.0.0.1", 80));
        config.relay.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_tls_inference() {
        let config = Config::new(1080, BackendTarget::new("www.example.com", 443));
        assert!(config.backend_tls_enabled());

        let config = Config::new(1080, BackendTarget::new("127.0.0.1", 8443));
        assert!(config.backend_tls_enabled());

        let mut config = Config::new(1080, BackendTarget::new("127.0.0.1", 8443));
        config.backend.tls = Some(false);
        assert!(!config.backend_tls_enabled());

        let mut config = Config::new(1080, BackendTarget::new("127.0.0.1", 3003));
        assert!(!config.backend_tls_enabled());
        config.backend.tls = Some(true);
        assert!(config.backend_tls_enabled());
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let toml_str = r#"
            [listener]
            port = 1080

            [backend]
            host = "127.0.0.1"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.backend.port, DEFAULT_BACKEND_PORT);
        assert_eq!(config.backend.transport, TransportKind::Local);
        assert_eq!(config.relay.buffer_size, 8192);
        assert!(config.relay.idle_timeout().is_none());
        assert!(config.relay.half_close_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_backend_port_means_default() {
        let toml_str = r#"
            [listener]
            port = 1080

            [backend]
            host = "127.0.0.1"
            port = 0
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend_target(), BackendTarget::new("127.0.0.1", 80));
        assert_eq!(config.backend_target().port, DEFAULT_BACKEND_PORT);
    }

    #[test]
    fn test_unparsable_file_is_usage_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("relay.toml");
        std::fs::write(&config_path, "[listener\nport = ").unwrap();

        let err = Config::from_file(&config_path).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
        assert_eq!(err.exit_code(), crate::common::error::EXIT_USAGE);
    }

    #[test]
    fn test_file_operations() {
        let config = Config::sample();
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("relay.toml");

        config.to_file(&config_path).unwrap();
        let loaded = Config::from_file(&config_path).unwrap();

        assert_eq!(loaded.backend.host, config.backend.host);
        assert_eq!(loaded.backend.transport, TransportKind::Overlay);
        let overlay = loaded.overlay.unwrap();
        assert_eq!(overlay.network_id, NetworkId(0x8304_8a06_32f3_031e));
        assert_eq!(overlay.storage_path, PathBuf::from("./.zt"));
    }
}
