//! Common types used throughout the application

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// Port used when the backend address does not carry one
pub const DEFAULT_BACKEND_PORT: u16 = 80;

/// Relay pair identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId(pub Uuid);

impl PairId {
    /// Create a new pair ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which leg of a relay pair a socket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Faces the inbound client connection
    Client,
    /// Faces the backend
    Upstream,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Upstream => write!(f, "upstream"),
        }
    }
}

/// Lifecycle state of a relay pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    /// Client accepted, no dial issued yet
    Accepted,
    /// Backend dial in flight
    Dialing,
    /// Both directions pumping
    Relaying,
    /// The client finished sending; backend-to-client still draining
    HalfClosedClient,
    /// The backend finished sending; client-to-backend still draining
    HalfClosedUpstream,
    /// Both sockets closed
    Closed,
}

/// Something that happened to a relay pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairEvent {
    DialStarted,
    DialSucceeded,
    DialFailed,
    /// The given side signalled end-of-stream and its direction was drained
    EndOfStream(Side),
    /// Read/write/TLS error or timeout on either socket
    Failed,
}

impl RelayState {
    /// Apply `event` and return the next state.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn on_event(self, event: PairEvent) -> RelayState {
        use RelayState::*;

        match (self, event) {
            (Closed, _) => Closed,
            (_, PairEvent::Failed) => Closed,
            (Accepted, PairEvent::DialStarted) => Dialing,
            (Dialing, PairEvent::DialSucceeded) => Relaying,
            (Dialing, PairEvent::DialFailed) => Closed,
            (Relaying, PairEvent::EndOfStream(Side::Client)) => HalfClosedClient,
            (Relaying, PairEvent::EndOfStream(Side::Upstream)) => HalfClosedUpstream,
            (HalfClosedClient, PairEvent::EndOfStream(Side::Upstream)) => Closed,
            (HalfClosedUpstream, PairEvent::EndOfStream(Side::Client)) => Closed,
            (state, _) => state,
        }
    }

    pub fn is_half_closed(self) -> bool {
        matches!(self, RelayState::HalfClosedClient | RelayState::HalfClosedUpstream)
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayState::Accepted => write!(f, "ACCEPTED"),
            RelayState::Dialing => write!(f, "DIALING"),
            RelayState::Relaying => write!(f, "RELAYING"),
            RelayState::HalfClosedClient => write!(f, "HALF_CLOSED_CLIENT"),
            RelayState::HalfClosedUpstream => write!(f, "HALF_CLOSED_UPSTREAM"),
            RelayState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Fabric used to reach the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Host network stack
    #[default]
    Local,
    /// ZeroTier overlay network
    Overlay,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::Overlay => write!(f, "overlay"),
        }
    }
}

/// 64-bit overlay network identifier, written as hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub u64);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for NetworkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.is_empty() || digits.len() > 16 {
            return Err(format!("Invalid network id: {}", s));
        }
        u64::from_str_radix(digits, 16)
            .map(NetworkId)
            .map_err(|_| format!("Invalid network id: {}", s))
    }
}

impl Serialize for NetworkId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// IP family an overlay address must belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of a host string; names resolve as IPv4
    pub fn of_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => AddressFamily::V6,
            _ => AddressFamily::V4,
        }
    }

    pub fn matches(self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (AddressFamily::V4, IpAddr::V4(_)) | (AddressFamily::V6, IpAddr::V6(_))
        )
    }
}

/// Backend host and port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
}

impl BackendTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: if port == 0 { DEFAULT_BACKEND_PORT } else { port },
        }
    }

    /// Ports ending in 443 (443, 8443, ...) speak TLS by convention
    pub fn implies_tls(&self) -> bool {
        self.port % 1000 == 443
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for BackendTarget {
    type Err = String;

    /// Accepts `host`, `host:port` and `[v6]:port`; a missing or zero port
    /// falls back to 80.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| format!("Invalid backend address: {}", s))?;
            let tail = &rest[end + 1..];
            let port = if tail.is_empty() {
                ""
            } else {
                tail.strip_prefix(':')
                    .ok_or_else(|| format!("Invalid backend address: {}", s))?
            };
            (&rest[..end], port)
        } else if s.parse::<IpAddr>().is_ok() {
            // 括弧なしのIPv6リテラル
            (s, "")
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) => (host, port),
                None => (s, ""),
            }
        };

        if host.is_empty() {
            return Err(format!("Invalid backend address: {}", s));
        }

        let port = if port.is_empty() {
            0
        } else {
            port.parse::<u16>()
                .map_err(|_| format!("Invalid backend port: {}", port))?
        };

        Ok(BackendTarget::new(host, port))
    }
}

/// Snapshot of one live relay pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairInfo {
    pub id: PairId,
    pub client_addr: SocketAddr,
    pub backend: String,
    pub state: RelayState,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
    pub accepted_at: chrono::DateTime<chrono::Utc>,
}
