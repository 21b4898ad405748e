//! # Pluggable Policies
//!
//! Strategy traits the context builds from configuration identifiers, and the
//! built-in implementations registered under the default identifiers:
//!
//! | Trait | Built-in id | Type |
//! |---|---|---|
//! | [`LoadBalancingPolicy`] | `default` | [`DefaultLoadBalancingPolicy`] |
//! | [`ReconnectionPolicy`] | `constant` | [`ConstantReconnectionPolicy`] |
//! | [`AddressTranslator`] | `pass-through` | [`PassThroughAddressTranslator`] |
//! | [`AuthProvider`] | `plain-text` | [`PlainTextAuthProvider`] |
//! | [`SslEngineFactory`] | none | deployment supplied |
//!
//! The built-ins are deliberately plain. Real routing, backoff and TLS live in
//! strategies a deployment registers.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DriverConfig, DriverOption};
use crate::error::ContextError;
use crate::metadata::{NodeDescriptor, NodeDistance, NodeState};

/// Decides which nodes to use and in which order.
pub trait LoadBalancingPolicy: Send + Sync {
    /// Distance assigned to a node when it joins or its info changes.
    fn distance(&self, node: &NodeDescriptor) -> NodeDistance;

    /// Nodes to try for one request, first choice first.
    fn new_query_plan(&self, nodes: &[Arc<NodeDescriptor>]) -> Vec<Arc<NodeDescriptor>>;
}

/// Delay between attempts to re-open a lost connection.
pub trait ReconnectionPolicy: Send + Sync {
    /// Delay before attempt number `attempt` (starting at 0).
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Maps addresses advertised by the cluster to addresses the driver can reach.
pub trait AddressTranslator: Send + Sync {
    fn translate(&self, address: SocketAddr) -> SocketAddr;
}

/// Supplies credentials during connection startup.
pub trait AuthProvider: Send + Sync {
    /// SASL mechanism name.
    fn mechanism(&self) -> &str;

    /// First token sent to `node`.
    fn initial_response(&self, node: SocketAddr) -> Vec<u8>;
}

/// Source of TLS session parameters.
pub trait SslEngineFactory: Send + Sync {
    /// Name to present through SNI when connecting to `peer`.
    fn server_name(&self, peer: SocketAddr) -> Option<String>;

    fn hostname_validation(&self) -> bool {
        true
    }
}

// =============================================================================
// LOAD BALANCING
// =============================================================================

/// Treats every node as local and keeps the membership order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLoadBalancingPolicy;

impl LoadBalancingPolicy for DefaultLoadBalancingPolicy {
    fn distance(&self, _node: &NodeDescriptor) -> NodeDistance {
        NodeDistance::Local
    }

    fn new_query_plan(&self, nodes: &[Arc<NodeDescriptor>]) -> Vec<Arc<NodeDescriptor>> {
        nodes
            .iter()
            .filter(|node| node.distance() != NodeDistance::Ignored)
            .filter(|node| matches!(node.state(), NodeState::Up | NodeState::Unknown))
            .cloned()
            .collect()
    }
}

// =============================================================================
// RECONNECTION
// =============================================================================

/// Waits the same base delay before every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
}

impl ConstantReconnectionPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Reads `connection.reconnection-policy.base-delay`.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ContextError> {
        config
            .get_duration(DriverOption::ReconnectionBaseDelay)
            .map(Self::new)
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

// =============================================================================
// ADDRESS TRANSLATION
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughAddressTranslator;

impl AddressTranslator for PassThroughAddressTranslator {
    fn translate(&self, address: SocketAddr) -> SocketAddr {
        address
    }
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// SASL `PLAIN` credentials from configuration.
#[derive(Clone)]
pub struct PlainTextAuthProvider {
    username: String,
    password: String,
}

impl PlainTextAuthProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reads `protocol.auth-provider.username` and `.password`; both required.
    pub fn from_config(config: &DriverConfig) -> Result<Self, ContextError> {
        let username = config.get_string(DriverOption::AuthProviderUsername)?;
        let password = config.get_string(DriverOption::AuthProviderPassword)?;
        Ok(Self::new(username, password))
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for PlainTextAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTextAuthProvider")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AuthProvider for PlainTextAuthProvider {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn initial_response(&self, _node: SocketAddr) -> Vec<u8> {
        let mut token = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        token.push(0);
        token.extend_from_slice(self.username.as_bytes());
        token.push(0);
        token.extend_from_slice(self.password.as_bytes());
        token
    }
}
