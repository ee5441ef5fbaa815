//! Overlay network bootstrap
//!
//! Before any backend dial may use the overlay fabric the local node has to be
//! online, joined to the network, and hold an assigned address of the right
//! family. [`OverlayBootstrap`] is the one-time blocking gate that waits for
//! all three, driven by any [`OverlayController`].

pub mod zerotier;

pub use zerotier::ZeroTierService;

use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::common::config::OverlayConfig;
use crate::common::error::Error;
use crate::common::types::{AddressFamily, NetworkId};

/// Overlay bootstrap failures. Always fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("node identity unavailable: {message}")]
    Identity { message: String },

    #[error("overlay service request failed: {message}")]
    Api { message: String },

    #[error("network {network} unusable: {state}")]
    Rejected { network: NetworkId, state: String },

    #[error("timed out after {timeout:?} waiting for {stage}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
}

impl From<OverlayError> for Error {
    fn from(err: OverlayError) -> Self {
        Error::Overlay(err.to_string())
    }
}

/// Node-level status reported by the overlay service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: String,
    pub online: bool,
}

/// Join progress of one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkState {
    RequestingConfiguration,
    Ok,
    /// Not yet authorized on the network controller
    AccessDenied,
    NotFound,
    PortError,
    ClientTooOld,
    Unknown(String),
}

impl NetworkState {
    pub fn parse(s: &str) -> Self {
        match s {
            "REQUESTING_CONFIGURATION" => NetworkState::RequestingConfiguration,
            "OK" => NetworkState::Ok,
            "ACCESS_DENIED" => NetworkState::AccessDenied,
            "NOT_FOUND" => NetworkState::NotFound,
            "PORT_ERROR" => NetworkState::PortError,
            "CLIENT_TOO_OLD" => NetworkState::ClientTooOld,
            other => NetworkState::Unknown(other.to_string()),
        }
    }

    /// States the node cannot recover from by waiting
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetworkState::NotFound | NetworkState::PortError | NetworkState::ClientTooOld
        )
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::RequestingConfiguration => write!(f, "REQUESTING_CONFIGURATION"),
            NetworkState::Ok => write!(f, "OK"),
            NetworkState::AccessDenied => write!(f, "ACCESS_DENIED"),
            NetworkState::NotFound => write!(f, "NOT_FOUND"),
            NetworkState::PortError => write!(f, "PORT_ERROR"),
            NetworkState::ClientTooOld => write!(f, "CLIENT_TOO_OLD"),
            NetworkState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    pub state: NetworkState,
    pub assigned: Vec<IpAddr>,
}

/// The address this node holds on a joined network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayAddress {
    pub network: NetworkId,
    pub node_id: String,
    pub ip: IpAddr,
}

impl OverlayAddress {
    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Control surface of an overlay node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OverlayController: Send + Sync {
    async fn node_status(&self) -> Result<NodeStatus, OverlayError>;

    async fn join(&self, network: NetworkId) -> Result<(), OverlayError>;

    async fn network_status(&self, network: NetworkId) -> Result<NetworkStatus, OverlayError>;
}

/// Bounded polling gate run once at startup
#[derive(Debug, Clone)]
pub struct OverlayBootstrap {
    poll_interval: Duration,
    stage_timeout: Duration,
}

impl OverlayBootstrap {
    pub fn new(poll_interval: Duration, stage_timeout: Duration) -> Self {
        Self {
            poll_interval,
            stage_timeout,
        }
    }

    pub fn from_config(config: &OverlayConfig) -> Self {
        Self::new(config.poll_interval(), config.stage_timeout())
    }

    /// Node online → join → transport ready → address assigned.
    pub async fn run(
        &self,
        controller: &dyn OverlayController,
        network: NetworkId,
        family: AddressFamily,
    ) -> Result<OverlayAddress, OverlayError> {
        info!("Waiting for node to come online");
        let node = self
            .wait_for("node to come online", || async move {
                let status = controller.node_status().await?;
                Ok::<_, OverlayError>(status.online.then_some(status))
            })
            .await?;
        info!(node_id = %node.node_id, "Node online");

        info!(%network, "Joining network");
        controller.join(network).await?;

        info!("Waiting for join to complete");
        let denied_logged = AtomicBool::new(false);
        let denied_logged = &denied_logged;
        let node_id = node.node_id.as_str();
        self.wait_for("network transport", || async move {
            let status = controller.network_status(network).await?;
            match status.state {
                NetworkState::Ok => Ok::<_, OverlayError>(Some(())),
                NetworkState::AccessDenied => {
                    if !denied_logged.swap(true, Ordering::Relaxed) {
                        warn!(
                            %network,
                            node_id,
                            "Node not authorized yet; authorize it on the network controller"
                        );
                    }
                    Ok(None)
                }
                state if state.is_fatal() => Err(OverlayError::Rejected {
                    network,
                    state: state.to_string(),
                }),
                state => {
                    debug!(%network, %state, "Network not ready");
                    Ok(None)
                }
            }
        })
        .await?;

        info!("Waiting for address assignment from network");
        let ip = self
            .wait_for("address assignment", || async move {
                let status = controller.network_status(network).await?;
                Ok::<_, OverlayError>(status.assigned.into_iter().find(|ip| family.matches(ip)))
            })
            .await?;

        info!(%network, %ip, "Overlay address assigned");

        Ok(OverlayAddress {
            network,
            node_id: node.node_id.clone(),
            ip,
        })
    }

    async fn wait_for<T, F, Fut>(&self, stage: &'static str, mut check: F) -> Result<T, OverlayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, OverlayError>>,
    {
        let deadline = Instant::now() + self.stage_timeout;

        loop {
            if let Some(value) = check().await? {
                return Ok(value);
            }

            if Instant::now() >= deadline {
                return Err(OverlayError::Timeout {
                    stage,
                    timeout: self.stage_timeout,
                });
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Comes online after a few polls and walks through the join states
    struct ScriptedNode {
        offline_polls: AtomicUsize,
        joined: AtomicBool,
        states: Mutex<Vec<NetworkStatus>>,
    }

    impl ScriptedNode {
        fn new(offline_polls: usize, mut states: Vec<NetworkStatus>) -> Self {
            states.reverse();
            Self {
                offline_polls: AtomicUsize::new(offline_polls),
                joined: AtomicBool::new(false),
                states: Mutex::new(states),
            }
        }
    }

    #[async_trait]
    impl OverlayController for ScriptedNode {
        async fn node_status(&self) -> Result<NodeStatus, OverlayError> {
            let remaining = self.offline_polls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.offline_polls.store(remaining - 1, Ordering::SeqCst);
            }
            Ok(NodeStatus {
                node_id: "89e92ceee5".to_string(),
                online: remaining == 0,
            })
        }

        async fn join(&self, _network: NetworkId) -> Result<(), OverlayError> {
            self.joined.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn network_status(&self, _network: NetworkId) -> Result<NetworkStatus, OverlayError> {
            assert!(self.joined.load(Ordering::SeqCst), "status polled before join");
            let mut states = self.states.lock().unwrap();
            // 最後の状態を保持し続ける
            let status = if states.len() > 1 {
                states.pop().unwrap()
            } else {
                states[0].clone()
            };
            Ok(status)
        }
    }

    fn status(state: NetworkState, assigned: &[&str]) -> NetworkStatus {
        NetworkStatus {
            state,
            assigned: assigned.iter().map(|ip| ip.parse().unwrap()).collect(),
        }
    }

    fn fast_gate() -> OverlayBootstrap {
        OverlayBootstrap::new(Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_bootstrap_walks_all_stages() {
        let node = ScriptedNode::new(
            3,
            vec![
                status(NetworkState::RequestingConfiguration, &[]),
                status(NetworkState::AccessDenied, &[]),
                status(NetworkState::AccessDenied, &[]),
                status(NetworkState::Ok, &[]),
                status(NetworkState::Ok, &["fd80:56c2:e21c::1"]),
                status(NetworkState::Ok, &["fd80:56c2:e21c::1", "10.147.17.5"]),
            ],
        );
        let network = NetworkId(0x8304_8a06_32f3_031e);

        let address = fast_gate()
            .run(&node, network, AddressFamily::V4)
            .await
            .unwrap();

        assert_eq!(address.network, network);
        assert_eq!(address.node_id, "89e92ceee5");
        assert_eq!(address.ip, "10.147.17.5".parse::<IpAddr>().unwrap());
        assert_eq!(address.family(), AddressFamily::V4);
    }

    #[tokio::test]
    async fn test_bootstrap_picks_requested_family() {
        let node = ScriptedNode::new(
            0,
            vec![status(NetworkState::Ok, &["10.147.17.5", "fd80:56c2:e21c::1"])],
        );

        let address = fast_gate()
            .run(&node, NetworkId(1), AddressFamily::V6)
            .await
            .unwrap();
        assert_eq!(address.family(), AddressFamily::V6);
    }

    #[tokio::test]
    async fn test_fatal_network_state_aborts() {
        let mut controller = MockOverlayController::new();
        controller.expect_node_status().returning(|| {
            Ok(NodeStatus {
                node_id: "89e92ceee5".to_string(),
                online: true,
            })
        });
        controller.expect_join().times(1).returning(|_| Ok(()));
        controller
            .expect_network_status()
            .returning(|_| Ok(status(NetworkState::NotFound, &[])));

        let err = fast_gate()
            .run(&controller, NetworkId(7), AddressFamily::V4)
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::Rejected { .. }));
        assert!(matches!(Error::from(err), Error::Overlay(_)));
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let mut controller = MockOverlayController::new();
        controller.expect_node_status().returning(|| {
            Ok(NodeStatus {
                node_id: "89e92ceee5".to_string(),
                online: false,
            })
        });

        let gate = OverlayBootstrap::new(Duration::from_millis(5), Duration::from_millis(30));
        let err = gate
            .run(&controller, NetworkId(7), AddressFamily::V4)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Timeout {
                stage: "node to come online",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_join_failure_propagates() {
        let mut controller = MockOverlayController::new();
        controller.expect_node_status().returning(|| {
            Ok(NodeStatus {
                node_id: "89e92ceee5".to_string(),
                online: true,
            })
        });
        controller.expect_join().returning(|_| {
            Err(OverlayError::Api {
                message: "401 Unauthorized".to_string(),
            })
        });

        let err = fast_gate()
            .run(&controller, NetworkId(7), AddressFamily::V4)
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::Api { .. }));
    }

    #[test]
    fn test_network_state_parsing() {
        assert_eq!(NetworkState::parse("OK"), NetworkState::Ok);
        assert!(NetworkState::parse("NOT_FOUND").is_fatal());
        assert!(!NetworkState::parse("ACCESS_DENIED").is_fatal());
        assert_eq!(
            NetworkState::parse("SOMETHING_NEW"),
            NetworkState::Unknown("SOMETHING_NEW".to_string())
        );
    }
}
