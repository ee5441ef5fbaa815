// TLS設定と管理
//
// rustlsを使用したクライアント側（待ち受け）・バックエンド側のTLS設定を提供します。
// 両方向は独立して有効化でき、接続済みソケットを透過的に暗号化します。

use std::io::Cursor;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{
    Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName,
    SupportedCipherSuite, SupportedProtocolVersion,
};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// TLS関連のエラー
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS configuration error: {message}")]
    Configuration { message: String },

    #[error("Certificate error: {message}")]
    Certificate { message: String },

    #[error("Private key error: {message}")]
    PrivateKey { message: String },

    #[error("Invalid server name: {message}")]
    ServerName { message: String },

    #[error("File I/O error: {message}")]
    FileOperation { message: String },
}

impl From<TlsError> for crate::common::error::Error {
    fn from(err: TlsError) -> Self {
        crate::common::error::Error::Tls(err.to_string())
    }
}

/// TLSの結果型
pub type TlsResult<T> = Result<T, TlsError>;

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// TLS設定
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TlsConfig {
    /// 証明書チェーンファイルパス (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,

    /// 秘密鍵ファイルパス (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    /// CA証明書ファイルパス。未指定ならwebpkiのルート証明書を使用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<String>,

    /// バックエンドのサーバー証明書を検証するか
    #[serde(default = "default_verify_server_cert")]
    pub verify_server_cert: bool,

    /// 最小TLSバージョン ("1.2" または "1.3")
    #[serde(default = "default_min_tls_version")]
    pub min_tls_version: String,

    /// 許可する暗号スイート。空ならrustlsの既定値
    #[serde(default)]
    pub cipher_suites: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_file: None,
            key_file: None,
            ca_cert_file: None,
            verify_server_cert: default_verify_server_cert(),
            min_tls_version: default_min_tls_version(),
            cipher_suites: Vec::new(),
        }
    }
}

impl TlsConfig {
    /// 証明書と秘密鍵を指定した待ち受け側設定
    pub fn with_identity(cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        Self {
            cert_file: Some(cert_file.into()),
            key_file: Some(key_file.into()),
            ..Default::default()
        }
    }
}

/// バックエンド接続用TLSクライアント設定
#[derive(Clone)]
pub struct TlsClientConfig {
    config: Arc<ClientConfig>,
}

impl TlsClientConfig {
    /// 新しいTLSクライアント設定を作成
    pub fn new(tls_config: &TlsConfig) -> TlsResult<Self> {
        let mut root_store = RootCertStore::empty();

        if let Some(ca_cert_file) = &tls_config.ca_cert_file {
            let ca_certs = load_certificates(ca_cert_file)?;
            for cert in ca_certs {
                root_store.add(&cert).map_err(|e| TlsError::Certificate {
                    message: format!("Failed to add CA certificate: {}", e),
                })?;
            }
        } else {
            root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
        }

        let mut config = ClientConfig::builder()
            .with_cipher_suites(&get_cipher_suites(&tls_config.cipher_suites)?)
            .with_safe_default_kx_groups()
            .with_protocol_versions(protocol_versions(&tls_config.min_tls_version)?)
            .map_err(|e| TlsError::Configuration {
                message: format!("Failed to create TLS client config: {}", e),
            })?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if !tls_config.verify_server_cert {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyServerCert));
        }

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// TLSコネクターを取得
    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.config.clone())
    }
}

/// クライアント側 (待ち受け) TLSサーバー設定
#[derive(Clone)]
pub struct TlsServerConfig {
    config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// 新しいTLSサーバー設定を作成
    pub fn new(tls_config: &TlsConfig) -> TlsResult<Self> {
        let cert_file = tls_config
            .cert_file
            .as_ref()
            .ok_or_else(|| TlsError::Configuration {
                message: "Server certificate file is required".to_string(),
            })?;

        let key_file = tls_config
            .key_file
            .as_ref()
            .ok_or_else(|| TlsError::Configuration {
                message: "Server private key file is required".to_string(),
            })?;

        let certs = load_certificates(cert_file)?;
        let key = load_private_key(key_file)?;

        let config = ServerConfig::builder()
            .with_cipher_suites(&get_cipher_suites(&tls_config.cipher_suites)?)
            .with_safe_default_kx_groups()
            .with_protocol_versions(protocol_versions(&tls_config.min_tls_version)?)
            .map_err(|e| TlsError::Configuration {
                message: format!("Failed to create TLS server config: {}", e),
            })?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::Configuration {
                message: format!("Failed to configure server certificate: {}", e),
            })?;

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// TLSアクセプターを取得
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

/// SNIに使うサーバー名。DNS名とIPリテラルの両方を受け付ける
pub fn server_name(host: &str) -> TlsResult<ServerName> {
    ServerName::try_from(host).map_err(|e| TlsError::ServerName {
        message: format!("{}: {}", host, e),
    })
}

/// 証明書を検証しないverifier (verify_server_cert = false)
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// 証明書ファイルを読み込み
fn load_certificates(cert_file: &str) -> TlsResult<Vec<Certificate>> {
    let cert_data = std::fs::read(cert_file).map_err(|e| TlsError::FileOperation {
        message: format!("Failed to read certificate file '{}': {}", cert_file, e),
    })?;

    let mut cursor = Cursor::new(cert_data);
    let certs = certs(&mut cursor).map_err(|e| TlsError::Certificate {
        message: format!("Failed to parse certificates: {}", e),
    })?;

    if certs.is_empty() {
        return Err(TlsError::Certificate {
            message: "No certificates found in file".to_string(),
        });
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

/// 秘密鍵ファイルを読み込み
fn load_private_key(key_file: &str) -> TlsResult<PrivateKey> {
    let key_data = std::fs::read(key_file).map_err(|e| TlsError::FileOperation {
        message: format!("Failed to read private key file '{}': {}", key_file, e),
    })?;

    // PKCS8 → RSA → SEC1 の順に試行
    let parsers: [fn(&mut dyn std::io::BufRead) -> std::io::Result<Vec<Vec<u8>>>; 3] =
        [pkcs8_private_keys, rsa_private_keys, ec_private_keys];

    for parse in parsers {
        let mut cursor = Cursor::new(key_data.as_slice());
        if let Ok(mut keys) = parse(&mut cursor) {
            if !keys.is_empty() {
                return Ok(PrivateKey(keys.remove(0)));
            }
        }
    }

    Err(TlsError::PrivateKey {
        message: "No valid private key found in file".to_string(),
    })
}

fn protocol_versions(min_version: &str) -> TlsResult<&'static [&'static SupportedProtocolVersion]> {
    match min_version {
        "1.2" => Ok(rustls::ALL_VERSIONS),
        "1.3" => Ok(TLS13_ONLY),
        other => Err(TlsError::Configuration {
            message: format!("Unsupported TLS version: {}", other),
        }),
    }
}

/// 暗号スイートを取得
fn get_cipher_suites(suite_names: &[String]) -> TlsResult<Vec<SupportedCipherSuite>> {
    use rustls::cipher_suite::*;

    if suite_names.is_empty() {
        return Ok(rustls::DEFAULT_CIPHER_SUITES.to_vec());
    }

    suite_names
        .iter()
        .map(|name| match name.as_str() {
            "TLS13_AES_256_GCM_SHA384" => Ok(TLS13_AES_256_GCM_SHA384),
            "TLS13_AES_128_GCM_SHA256" => Ok(TLS13_AES_128_GCM_SHA256),
            "TLS13_CHACHA20_POLY1305_SHA256" => Ok(TLS13_CHACHA20_POLY1305_SHA256),
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384" => Ok(TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384),
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256" => Ok(TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256),
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256" => {
                Ok(TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256)
            }
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384" => Ok(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384),
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256" => Ok(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256),
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256" => {
                Ok(TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256)
            }
            _ => Err(TlsError::Configuration {
                message: format!("Unsupported cipher suite: {}", name),
            }),
        })
        .collect()
}

fn default_verify_server_cert() -> bool {
    true
}

fn default_min_tls_version() -> String {
    "1.2".to_string()
}
