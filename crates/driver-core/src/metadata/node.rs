//! # Node Descriptor
//!
//! One long-lived record per cluster node, shared as `Arc<NodeDescriptor>`.
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!  any thread ──────►│ state()  distance()  rack()  │  lock-free loads
//!                    │ tokens() snapshot() ...      │  (atomics, ArcSwap)
//!                    ├──────────────────────────────┤
//!  driver-admin ────►│ store_* (crate-private)      │  via &NodeWriter only
//!                    └──────────────────────────────┘
//! ```
//!
//! The connect address is the identity: it never changes and is the only
//! input to `PartialEq`, `Hash` and `Display`. Each field is published on its
//! own; a reader may see a new rack next to an old datacenter.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::metrics::NodeMetricUpdater;

/// Liveness as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum NodeState {
    Unknown = 0,
    Up = 1,
    Down = 2,
    /// Marked down by the driver itself; ignores up notifications.
    ForcedDown = 3,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::ForcedDown,
            _ => Self::Unknown,
        }
    }
}

/// How the load balancing policy classifies a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum NodeDistance {
    Local = 0,
    Remote = 1,
    /// Never used for queries; no pool is kept.
    Ignored = 2,
}

impl NodeDistance {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Local,
            1 => Self::Remote,
            _ => Self::Ignored,
        }
    }
}

/// Server release, e.g. `3.11.4` or `4.0.0-beta2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre_release: Option<String>,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }
}

impl FromStr for ServerVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (numbers, pre_release) = match s.split_once('-') {
            Some((numbers, pre)) if !pre.is_empty() => (numbers, Some(pre.to_string())),
            Some(_) => return Err(ParseError::EmptyPreRelease(s.to_string())),
            None => (s, None),
        };

        let parts = numbers
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseError::InvalidVersion(s.to_string()))?;

        let (major, minor, patch) = match parts.as_slice() {
            [major, minor] => (*major, *minor, 0),
            [major, minor, patch] => (*major, *minor, *patch),
            _ => return Err(ParseError::InvalidVersion(s.to_string())),
        };

        Ok(Self {
            major,
            minor,
            patch,
            pre_release,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// One topology row: the fields refreshed together when the cluster reports
/// a node. `None` clears a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub broadcast_address: Option<IpAddr>,
    pub listen_address: Option<IpAddr>,
    pub datacenter: Option<String>,
    pub rack: Option<String>,
    pub version: Option<ServerVersion>,
    pub host_id: Option<Uuid>,
    pub schema_version: Option<Uuid>,
    pub tokens: BTreeSet<String>,
    pub extras: HashMap<String, serde_json::Value>,
}

/// Point-in-time copy of every field, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub connect_address: SocketAddr,
    pub state: NodeState,
    pub distance: NodeDistance,
    pub broadcast_address: Option<IpAddr>,
    pub listen_address: Option<IpAddr>,
    pub datacenter: Option<String>,
    pub rack: Option<String>,
    pub version: Option<ServerVersion>,
    pub host_id: Option<Uuid>,
    pub schema_version: Option<Uuid>,
    pub tokens: BTreeSet<String>,
    pub extras: HashMap<String, serde_json::Value>,
    pub open_connections: usize,
    pub reconnecting: bool,
}

/// Shared, single-writer record of one cluster node.
pub struct NodeDescriptor {
    connect_address: SocketAddr,
    metric_updater: Arc<dyn NodeMetricUpdater>,

    state: AtomicU8,
    distance: AtomicU8,
    open_connections: AtomicUsize,
    reconnections: AtomicUsize,

    broadcast_address: ArcSwapOption<IpAddr>,
    listen_address: ArcSwapOption<IpAddr>,
    datacenter: ArcSwapOption<String>,
    rack: ArcSwapOption<String>,
    version: ArcSwapOption<ServerVersion>,
    host_id: ArcSwapOption<Uuid>,
    schema_version: ArcSwapOption<Uuid>,
    raw_tokens: ArcSwap<BTreeSet<String>>,
    extras: ArcSwap<HashMap<String, serde_json::Value>>,
}

impl NodeDescriptor {
    pub(crate) fn new(
        connect_address: SocketAddr,
        metric_updater: Arc<dyn NodeMetricUpdater>,
    ) -> Self {
        Self {
            connect_address,
            metric_updater,
            state: AtomicU8::new(NodeState::Unknown as u8),
            distance: AtomicU8::new(NodeDistance::Ignored as u8),
            open_connections: AtomicUsize::new(0),
            reconnections: AtomicUsize::new(0),
            broadcast_address: ArcSwapOption::empty(),
            listen_address: ArcSwapOption::empty(),
            datacenter: ArcSwapOption::empty(),
            rack: ArcSwapOption::empty(),
            version: ArcSwapOption::empty(),
            host_id: ArcSwapOption::empty(),
            schema_version: ArcSwapOption::empty(),
            raw_tokens: ArcSwap::from_pointee(BTreeSet::new()),
            extras: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Readers (any thread)
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn connect_address(&self) -> SocketAddr {
        self.connect_address
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn distance(&self) -> NodeDistance {
        NodeDistance::from_u8(self.distance.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    /// Whether at least one reconnection attempt is in flight.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnections.load(Ordering::Acquire) > 0
    }

    #[must_use]
    pub fn broadcast_address(&self) -> Option<IpAddr> {
        self.broadcast_address.load().as_deref().copied()
    }

    #[must_use]
    pub fn listen_address(&self) -> Option<IpAddr> {
        self.listen_address.load().as_deref().copied()
    }

    #[must_use]
    pub fn datacenter(&self) -> Option<String> {
        self.datacenter.load().as_deref().cloned()
    }

    #[must_use]
    pub fn rack(&self) -> Option<String> {
        self.rack.load().as_deref().cloned()
    }

    #[must_use]
    pub fn version(&self) -> Option<ServerVersion> {
        self.version.load().as_deref().cloned()
    }

    #[must_use]
    pub fn host_id(&self) -> Option<Uuid> {
        self.host_id.load().as_deref().copied()
    }

    #[must_use]
    pub fn schema_version(&self) -> Option<Uuid> {
        self.schema_version.load().as_deref().copied()
    }

    /// Raw token strings as reported by the cluster.
    #[must_use]
    pub fn raw_tokens(&self) -> Arc<BTreeSet<String>> {
        self.raw_tokens.load_full()
    }

    #[must_use]
    pub fn extras(&self) -> Arc<HashMap<String, serde_json::Value>> {
        self.extras.load_full()
    }

    #[must_use]
    pub fn metric_updater(&self) -> &Arc<dyn NodeMetricUpdater> {
        &self.metric_updater
    }

    #[must_use]
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            connect_address: self.connect_address,
            state: self.state(),
            distance: self.distance(),
            broadcast_address: self.broadcast_address(),
            listen_address: self.listen_address(),
            datacenter: self.datacenter(),
            rack: self.rack(),
            version: self.version(),
            host_id: self.host_id(),
            schema_version: self.schema_version(),
            tokens: self.raw_tokens().as_ref().clone(),
            extras: self.extras().as_ref().clone(),
            open_connections: self.open_connections(),
            reconnecting: self.is_reconnecting(),
        }
    }

    // -------------------------------------------------------------------------
    // Writers (coordination thread, through NodeWriter)
    // -------------------------------------------------------------------------

    pub(crate) fn store_state(&self, state: NodeState) -> NodeState {
        NodeState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    pub(crate) fn store_distance(&self, distance: NodeDistance) -> NodeDistance {
        NodeDistance::from_u8(self.distance.swap(distance as u8, Ordering::AcqRel))
    }

    /// Publish a topology row; returns whether the token set changed.
    pub(crate) fn store_info(&self, info: NodeInfo) -> bool {
        self.broadcast_address.store(info.broadcast_address.map(Arc::new));
        self.listen_address.store(info.listen_address.map(Arc::new));
        self.datacenter.store(info.datacenter.map(Arc::new));
        self.rack.store(info.rack.map(Arc::new));
        self.version.store(info.version.map(Arc::new));
        self.host_id.store(info.host_id.map(Arc::new));
        self.schema_version.store(info.schema_version.map(Arc::new));
        self.extras.store(Arc::new(info.extras));

        let tokens_changed = **self.raw_tokens.load() != info.tokens;
        if tokens_changed {
            self.raw_tokens.store(Arc::new(info.tokens));
        }
        tokens_changed
    }

    pub(crate) fn store_open_connections(&self, count: usize) {
        self.open_connections.store(count, Ordering::Release);
    }

    pub(crate) fn store_reconnections(&self, count: usize) {
        self.reconnections.store(count, Ordering::Release);
    }

    pub(crate) fn reconnections(&self) -> usize {
        self.reconnections.load(Ordering::Acquire)
    }
}

impl PartialEq for NodeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.connect_address == other.connect_address
    }
}

impl Eq for NodeDescriptor {}

impl Hash for NodeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.connect_address.hash(state);
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.connect_address)
    }
}

impl fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("connect_address", &self.connect_address)
            .field("state", &self.state())
            .field("distance", &self.distance())
            .finish_non_exhaustive()
    }
}
