//! セキュリティモジュール
//!
//! リレーの両側 (クライアント側・バックエンド側) に独立して適用できる
//! TLSラッパーを提供します。

pub mod tls;

pub use tls::{server_name, TlsClientConfig, TlsConfig, TlsError, TlsResult, TlsServerConfig};
