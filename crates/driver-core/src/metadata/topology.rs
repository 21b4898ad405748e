//! # Topology
//!
//! [`TopologyMonitor`] turns what the cluster reports (peer rows, status
//! events) into coordination jobs. [`LoadBalancingPolicyWrapper`] binds the
//! configured policy to the live membership.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::ControlConnection;
use crate::error::ContextError;
use crate::metadata::manager::MetadataManager;
use crate::metadata::node::{NodeDescriptor, NodeDistance, NodeInfo, NodeState};
use crate::metadata::writer::NodeWriter;
use crate::policies::{AddressTranslator, LoadBalancingPolicy};

/// The configured policy applied to the current membership.
pub struct LoadBalancingPolicyWrapper {
    policy: Arc<dyn LoadBalancingPolicy>,
    metadata_manager: Arc<MetadataManager>,
}

impl LoadBalancingPolicyWrapper {
    pub fn new(
        policy: Arc<dyn LoadBalancingPolicy>,
        metadata_manager: Arc<MetadataManager>,
    ) -> Self {
        Self {
            policy,
            metadata_manager,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<dyn LoadBalancingPolicy> {
        &self.policy
    }

    #[must_use]
    pub fn distance(&self, node: &NodeDescriptor) -> NodeDistance {
        self.policy.distance(node)
    }

    /// Assign every current member its distance; waits for the job.
    pub fn init(&self) -> Result<(), ContextError> {
        let policy = Arc::clone(&self.policy);
        self.metadata_manager.coordinator().execute(move |writer| {
            for node in writer.nodes().values() {
                writer.set_distance(node, policy.distance(node));
            }
        })
    }

    /// Query plan over the members, in address order before the policy
    /// reorders them.
    #[must_use]
    pub fn new_query_plan(&self) -> Vec<Arc<NodeDescriptor>> {
        self.policy
            .new_query_plan(&self.metadata_manager.sorted_nodes())
    }
}

/// One node as reported by the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRow {
    /// Address the node advertises for clients, before translation.
    pub rpc_address: SocketAddr,
    pub info: NodeInfo,
}

/// Membership changes applied by a full refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub added: Vec<SocketAddr>,
    pub removed: Vec<SocketAddr>,
}

/// Applies cluster reports to node metadata through the coordination task.
pub struct TopologyMonitor {
    control_connection: Arc<ControlConnection>,
    address_translator: Arc<dyn AddressTranslator>,
    metadata_manager: Arc<MetadataManager>,
    load_balancing: Arc<LoadBalancingPolicyWrapper>,
}

impl TopologyMonitor {
    pub fn new(
        control_connection: Arc<ControlConnection>,
        address_translator: Arc<dyn AddressTranslator>,
        metadata_manager: Arc<MetadataManager>,
        load_balancing: Arc<LoadBalancingPolicyWrapper>,
    ) -> Self {
        Self {
            control_connection,
            address_translator,
            metadata_manager,
            load_balancing,
        }
    }

    #[must_use]
    pub fn control_connection(&self) -> &Arc<ControlConnection> {
        &self.control_connection
    }

    /// Add or update a single node; waits for the job to finish.
    pub fn refresh_node(&self, row: PeerRow) -> Result<Arc<NodeDescriptor>, ContextError> {
        let address = self.address_translator.translate(row.rpc_address);
        let load_balancing = Arc::clone(&self.load_balancing);

        self.metadata_manager.coordinator().execute(move |writer| {
            apply_row(writer, &load_balancing, address, row.info)
        })
    }

    /// Replace the membership with `rows`; waits for the job to finish.
    pub fn refresh_all(&self, rows: Vec<PeerRow>) -> Result<TopologyDiff, ContextError> {
        let rows: Vec<(SocketAddr, NodeInfo)> = rows
            .into_iter()
            .map(|row| (self.address_translator.translate(row.rpc_address), row.info))
            .collect();
        let load_balancing = Arc::clone(&self.load_balancing);

        let diff = self.metadata_manager.coordinator().execute(move |writer| {
            let members = writer.nodes();
            let mut diff = TopologyDiff::default();
            let mut seen = HashSet::with_capacity(rows.len());

            for (address, info) in rows {
                if seen.insert(address) && !members.contains_key(&address) {
                    diff.added.push(address);
                }
                apply_row(writer, &load_balancing, address, info);
            }

            for address in members.keys().filter(|address| !seen.contains(*address)) {
                if writer.remove_node(*address).is_some() {
                    diff.removed.push(*address);
                }
            }
            diff.removed.sort();
            diff
        })?;

        info!(
            "[Topology] Refreshed: {} added, {} removed",
            diff.added.len(),
            diff.removed.len()
        );
        Ok(diff)
    }

    /// Record a status event. Queued; does not wait.
    ///
    /// A node the driver forced down ignores cluster reports, up or down, until
    /// [`force_up`](Self::force_up).
    pub fn on_status_event(&self, address: SocketAddr, state: NodeState) -> Result<(), ContextError> {
        let address = self.address_translator.translate(address);
        self.metadata_manager.coordinator().submit(move |writer| {
            let Some(node) = writer.node(address) else {
                debug!("[Topology] Status event for unknown node {}", address);
                return;
            };
            if node.state() == NodeState::ForcedDown {
                debug!("[Topology] Ignoring {:?} event for forced-down node {}", state, node);
                return;
            }
            writer.set_state(&node, state);
        })
    }

    /// Mark a node down regardless of cluster reports. Queued.
    pub fn force_down(&self, address: SocketAddr) -> Result<(), ContextError> {
        self.metadata_manager.coordinator().submit(move |writer| {
            if let Some(node) = writer.node(address) {
                writer.set_state(&node, NodeState::ForcedDown);
            }
        })
    }

    /// Lift a forced-down mark. Queued.
    pub fn force_up(&self, address: SocketAddr) -> Result<(), ContextError> {
        self.metadata_manager.coordinator().submit(move |writer| {
            if let Some(node) = writer.node(address) {
                if node.state() == NodeState::ForcedDown {
                    writer.set_state(&node, NodeState::Up);
                }
            }
        })
    }
}

fn apply_row(
    writer: &NodeWriter,
    load_balancing: &LoadBalancingPolicyWrapper,
    address: SocketAddr,
    info: NodeInfo,
) -> Arc<NodeDescriptor> {
    let node = writer.add_node(address);
    writer.update_info(&node, info);
    writer.set_distance(&node, load_balancing.distance(&node));
    node
}
