// ZeroTier One サービス制御
//
// ローカルで動作する zerotier-one のJSON API (既定 127.0.0.1:9993) を介して
// ノード状態の確認、ネットワーク参加、アドレス割り当ての確認を行う。
// 認証トークンとノードIDはストレージディレクトリから読み込む。

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{NetworkState, NetworkStatus, NodeStatus, OverlayController, OverlayError};
use crate::common::types::NetworkId;

const AUTH_HEADER: &str = "X-ZT1-Auth";
const AUTH_TOKEN_FILE: &str = "authtoken.secret";
const IDENTITY_FILE: &str = "identity.public";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct StatusResponse {
    address: String,
    online: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkResponse {
    status: String,
    #[serde(default)]
    assigned_addresses: Vec<String>,
}

/// Client for a local zerotier-one service
pub struct ZeroTierService {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl ZeroTierService {
    /// ストレージディレクトリからノードIDと認証トークンを読み込み
    pub fn from_storage(storage_path: &Path, api_url: &str) -> Result<Self, OverlayError> {
        let identity = storage_path.join(IDENTITY_FILE);
        if !identity.is_file() {
            return Err(OverlayError::Identity {
                message: format!("{} not found", identity.display()),
            });
        }

        let token_path = storage_path.join(AUTH_TOKEN_FILE);
        let auth_token = std::fs::read_to_string(&token_path)
            .map_err(|e| OverlayError::Identity {
                message: format!("Failed to read {}: {}", token_path.display(), e),
            })?
            .trim()
            .to_string();

        if auth_token.is_empty() {
            return Err(OverlayError::Identity {
                message: format!("{} is empty", token_path.display()),
            });
        }

        Self::new(api_url, auth_token)
    }

    pub fn new(api_url: &str, auth_token: impl Into<String>) -> Result<Self, OverlayError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OverlayError::Api {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, OverlayError> {
        let response = request
            .header(AUTH_HEADER, &self.auth_token)
            .send()
            .await
            .map_err(|e| OverlayError::Api {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OverlayError::Api {
                message: format!("service returned {}", status),
            });
        }

        response.json::<T>().await.map_err(|e| OverlayError::Api {
            message: format!("Invalid response: {}", e),
        })
    }
}

#[async_trait]
impl OverlayController for ZeroTierService {
    async fn node_status(&self) -> Result<NodeStatus, OverlayError> {
        let status: StatusResponse = self
            .send(self.client.get(format!("{}/status", self.base_url)))
            .await?;

        Ok(NodeStatus {
            node_id: status.address,
            online: status.online,
        })
    }

    #[instrument(skip(self))]
    async fn join(&self, network: NetworkId) -> Result<(), OverlayError> {
        let _: serde_json::Value = self
            .send(
                self.client
                    .post(format!("{}/network/{}", self.base_url, network))
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(())
    }

    async fn network_status(&self, network: NetworkId) -> Result<NetworkStatus, OverlayError> {
        let response: NetworkResponse = self
            .send(self.client.get(format!("{}/network/{}", self.base_url, network)))
            .await?;

        debug!(%network, status = %response.status, "Network status");

        Ok(NetworkStatus {
            state: NetworkState::parse(&response.status),
            assigned: parse_assigned(&response.assigned_addresses),
        })
    }
}

/// "10.147.17.5/24" → 10.147.17.5
fn parse_assigned(addresses: &[String]) -> Vec<IpAddr> {
    addresses
        .iter()
        .filter_map(|cidr| cidr.split('/').next()?.parse().ok())
        .collect()
}
