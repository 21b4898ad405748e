//! # Metadata Manager
//!
//! Owns the membership map and the coordination task that is allowed to change
//! it. Readers get lock-free snapshots; changes go through jobs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use crate::config::{DriverConfig, DriverOption};
use crate::error::ContextError;
use crate::events::EventBus;
use crate::metadata::coordinator::CoordinationTask;
use crate::metadata::node::NodeDescriptor;
use crate::metadata::writer::{NodeMap, NodeWriter};
use crate::metrics::MetricsFactory;

/// Port used for contact points given without one.
pub const DEFAULT_PORT: u16 = 9042;

pub struct MetadataManager {
    nodes: Arc<ArcSwap<NodeMap>>,
    coordinator: CoordinationTask,
}

impl MetadataManager {
    /// Create the manager and start its coordination thread.
    pub fn new(
        event_bus: Arc<EventBus>,
        metrics_factory: Arc<dyn MetricsFactory>,
    ) -> Result<Self, ContextError> {
        let nodes = Arc::new(ArcSwap::from_pointee(NodeMap::new()));
        let writer = NodeWriter::new(Arc::clone(&nodes), metrics_factory, event_bus);
        let coordinator = CoordinationTask::spawn(writer)
            .map_err(|e| ContextError::build("metadata_manager", e))?;

        info!("[Metadata] Coordination task started");
        Ok(Self { nodes, coordinator })
    }

    /// Current membership, as an immutable snapshot.
    #[must_use]
    pub fn nodes(&self) -> Arc<NodeMap> {
        self.nodes.load_full()
    }

    #[must_use]
    pub fn node(&self, address: SocketAddr) -> Option<Arc<NodeDescriptor>> {
        self.nodes.load().get(&address).cloned()
    }

    /// Members ordered by address, for stable iteration.
    #[must_use]
    pub fn sorted_nodes(&self) -> Vec<Arc<NodeDescriptor>> {
        let mut nodes: Vec<_> = self.nodes.load().values().cloned().collect();
        nodes.sort_by_key(|node| node.connect_address());
        nodes
    }

    #[must_use]
    pub fn coordinator(&self) -> &CoordinationTask {
        &self.coordinator
    }

    /// Register the initial contact points. Returns once they are members.
    pub fn add_contact_points(
        &self,
        addresses: Vec<SocketAddr>,
    ) -> Result<Vec<Arc<NodeDescriptor>>, ContextError> {
        self.coordinator.execute(move |writer| {
            addresses
                .into_iter()
                .map(|address| writer.add_node(address))
                .collect()
        })
    }

    /// Stop the coordination task. Membership stays readable.
    pub fn close(&self) {
        self.coordinator.shutdown();
    }
}

/// Parse `contact-points`; entries without a port get [`DEFAULT_PORT`].
pub fn contact_points(config: &DriverConfig) -> Result<Vec<SocketAddr>, ContextError> {
    let option = DriverOption::ContactPoints;
    config
        .get_string_list(option)?
        .iter()
        .map(|raw| {
            parse_contact_point(raw).ok_or_else(|| {
                ContextError::invalid_option(option.path(), format!("invalid address {raw:?}"))
            })
        })
        .collect()
}

fn parse_contact_point(raw: &str) -> Option<SocketAddr> {
    let raw = raw.trim();
    if let Ok(address) = raw.parse::<SocketAddr>() {
        return Some(address);
    }
    raw.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_points_default_port() {
        let config = DriverConfig::empty().with(
            DriverOption::ContactPoints,
            vec!["10.0.0.1".to_string(), "10.0.0.2:9142".to_string(), "::1".to_string()],
        );

        let points = contact_points(&config).unwrap();
        assert_eq!(
            points,
            vec![
                "10.0.0.1:9042".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:9142".parse::<SocketAddr>().unwrap(),
                "[::1]:9042".parse::<SocketAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_bad_contact_point_names_the_option() {
        let config =
            DriverConfig::empty().with(DriverOption::ContactPoints, vec!["nowhere".to_string()]);
        let error = contact_points(&config).unwrap_err();
        assert_eq!(error.option(), Some("contact-points"));
    }
}
