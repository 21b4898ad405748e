//! # Node Writer
//!
//! The only way to mutate node descriptors or the membership map.
//!
//! A `NodeWriter` is created once by the metadata manager and moved onto the
//! `driver-admin` thread. Jobs borrow it as `&NodeWriter`. It is neither
//! `Clone` nor `Sync`, so a borrowed writer cannot be stashed in a shared
//! structure or used from another thread: mutation off the coordination
//! thread does not compile.
//!
//! ```compile_fail
//! fn require_sync<T: Sync>() {}
//! require_sync::<driver_core::NodeWriter>();
//! ```

use std::cell::Cell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use crate::events::{DriverEvent, EventBus};
use crate::metadata::node::{NodeDescriptor, NodeDistance, NodeInfo, NodeState};
use crate::metrics::{MetricsFactory, NodeMetric};

/// Membership map keyed by connect address.
pub type NodeMap = HashMap<SocketAddr, Arc<NodeDescriptor>>;

/// Write capability for node metadata.
pub struct NodeWriter {
    nodes: Arc<ArcSwap<NodeMap>>,
    metrics_factory: Arc<dyn MetricsFactory>,
    event_bus: Arc<EventBus>,
    _not_sync: PhantomData<Cell<()>>,
}

impl NodeWriter {
    pub(crate) fn new(
        nodes: Arc<ArcSwap<NodeMap>>,
        metrics_factory: Arc<dyn MetricsFactory>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            nodes,
            metrics_factory,
            event_bus,
            _not_sync: PhantomData,
        }
    }

    #[must_use]
    pub fn node(&self, address: SocketAddr) -> Option<Arc<NodeDescriptor>> {
        self.nodes.load().get(&address).cloned()
    }

    /// Membership as of the running job.
    #[must_use]
    pub fn nodes(&self) -> Arc<NodeMap> {
        self.nodes.load_full()
    }

    /// Register a node, or return the existing descriptor for `address`.
    pub fn add_node(&self, address: SocketAddr) -> Arc<NodeDescriptor> {
        if let Some(existing) = self.node(address) {
            return existing;
        }

        let updater = self.metrics_factory.new_node_updater(address);
        let node = Arc::new(NodeDescriptor::new(address, updater));

        let mut nodes = NodeMap::clone(&self.nodes.load());
        nodes.insert(address, Arc::clone(&node));
        self.nodes.store(Arc::new(nodes));

        info!("[Metadata] Added node {}", address);
        self.event_bus.publish(DriverEvent::NodeAdded { address });
        node
    }

    /// Drop a node from the membership map. Holders of the descriptor keep a
    /// valid (now stale) record.
    pub fn remove_node(&self, address: SocketAddr) -> Option<Arc<NodeDescriptor>> {
        let current = self.nodes.load_full();
        if !current.contains_key(&address) {
            return None;
        }

        let mut nodes = NodeMap::clone(&current);
        let removed = nodes.remove(&address);
        self.nodes.store(Arc::new(nodes));

        info!("[Metadata] Removed node {}", address);
        self.event_bus.publish(DriverEvent::NodeRemoved { address });
        removed
    }

    /// Returns the previous state.
    pub fn set_state(&self, node: &NodeDescriptor, state: NodeState) -> NodeState {
        let old = node.store_state(state);
        if old != state {
            info!("[Metadata] {} is now {:?} (was {:?})", node, state, old);
            self.event_bus.publish(DriverEvent::NodeStateChanged {
                address: node.connect_address(),
                old,
                new: state,
            });
        }
        old
    }

    /// Returns the previous distance.
    pub fn set_distance(&self, node: &NodeDescriptor, distance: NodeDistance) -> NodeDistance {
        let old = node.store_distance(distance);
        if old != distance {
            debug!("[Metadata] {} distance {:?} -> {:?}", node, old, distance);
            self.event_bus.publish(DriverEvent::DistanceChanged {
                address: node.connect_address(),
                old,
                new: distance,
            });
        }
        old
    }

    /// Apply a topology row. Returns whether the node's tokens changed.
    pub fn update_info(&self, node: &NodeDescriptor, info: NodeInfo) -> bool {
        let tokens_changed = node.store_info(info);
        if tokens_changed {
            debug!("[Metadata] Token set of {} changed", node);
        }
        tokens_changed
    }

    /// Returns the new open-connection count.
    pub fn connection_opened(&self, node: &NodeDescriptor) -> usize {
        let count = node.open_connections() + 1;
        node.store_open_connections(count);
        record(node, NodeMetric::OpenConnections, count);
        count
    }

    /// Returns the new open-connection count; never goes below zero.
    pub fn connection_closed(&self, node: &NodeDescriptor) -> usize {
        let count = node.open_connections().saturating_sub(1);
        node.store_open_connections(count);
        record(node, NodeMetric::OpenConnections, count);
        count
    }

    pub fn reconnection_started(&self, node: &NodeDescriptor) {
        let count = node.reconnections() + 1;
        node.store_reconnections(count);
        record(node, NodeMetric::PendingReconnections, count);
    }

    pub fn reconnection_stopped(&self, node: &NodeDescriptor) {
        let count = node.reconnections().saturating_sub(1);
        node.store_reconnections(count);
        record(node, NodeMetric::PendingReconnections, count);
    }
}

fn record(node: &NodeDescriptor, metric: NodeMetric, value: usize) {
    let updater = node.metric_updater();
    if updater.is_enabled(metric) {
        updater.record(metric, value as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetricsFactory;

    fn writer() -> (NodeWriter, Arc<ArcSwap<NodeMap>>, Arc<EventBus>) {
        let nodes = Arc::new(ArcSwap::from_pointee(NodeMap::new()));
        let bus = Arc::new(EventBus::default());
        let writer = NodeWriter::new(
            Arc::clone(&nodes),
            Arc::new(NoopMetricsFactory::default()),
            Arc::clone(&bus),
        );
        (writer, nodes, bus)
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let (writer, nodes, _) = writer();
        let address = "10.0.0.1:9042".parse().unwrap();

        let first = writer.add_node(address);
        let second = writer.add_node(address);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(nodes.load().len(), 1);
    }

    #[test]
    fn test_counters_never_underflow() {
        let (writer, _, _) = writer();
        let node = writer.add_node("10.0.0.1:9042".parse().unwrap());

        assert_eq!(writer.connection_closed(&node), 0);
        assert_eq!(writer.connection_opened(&node), 1);
        assert_eq!(writer.connection_opened(&node), 2);
        assert_eq!(writer.connection_closed(&node), 1);

        writer.reconnection_started(&node);
        assert!(node.is_reconnecting());
        writer.reconnection_stopped(&node);
        writer.reconnection_stopped(&node);
        assert!(!node.is_reconnecting());
    }

    #[test]
    fn test_state_change_publishes_once() {
        let (writer, _, bus) = writer();
        let mut events = bus.subscribe();
        let address = "10.0.0.1:9042".parse().unwrap();
        let node = writer.add_node(address);

        assert_eq!(writer.set_state(&node, NodeState::Up), NodeState::Unknown);
        assert_eq!(writer.set_state(&node, NodeState::Up), NodeState::Up);

        assert_eq!(events.try_recv().unwrap(), DriverEvent::NodeAdded { address });
        assert_eq!(
            events.try_recv().unwrap(),
            DriverEvent::NodeStateChanged {
                address,
                old: NodeState::Unknown,
                new: NodeState::Up
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_removed_descriptor_stays_readable() {
        let (writer, nodes, _) = writer();
        let address = "10.0.0.1:9042".parse().unwrap();
        let node = writer.add_node(address);

        let removed = writer.remove_node(address).unwrap();
        assert_eq!(removed, node);
        assert!(nodes.load().is_empty());
        assert_eq!(node.state(), NodeState::Unknown);
        assert!(writer.remove_node(address).is_none());
    }
}
