//! # Metrics Hooks
//!
//! The core never aggregates or exports metrics. It only asks the configured
//! [`MetricsFactory`] for one [`NodeMetricUpdater`] per node and reports
//! gauge-style values through it. The default factory discards everything.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Per-node metrics the core reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMetric {
    /// Connections currently open to the node.
    OpenConnections,
    /// Reconnection attempts in flight.
    PendingReconnections,
}

impl NodeMetric {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenConnections => "pool.open-connections",
            Self::PendingReconnections => "pool.pending-reconnections",
        }
    }
}

impl fmt::Display for NodeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives metric updates for one node.
pub trait NodeMetricUpdater: Send + Sync {
    fn is_enabled(&self, metric: NodeMetric) -> bool;

    /// Record the current value of a gauge.
    fn record(&self, metric: NodeMetric, value: u64);
}

/// Creates the per-node updaters.
pub trait MetricsFactory: Send + Sync {
    fn new_node_updater(&self, address: SocketAddr) -> Arc<dyn NodeMetricUpdater>;
}

/// Updater that ignores every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNodeMetricUpdater;

impl NodeMetricUpdater for NoopNodeMetricUpdater {
    fn is_enabled(&self, _metric: NodeMetric) -> bool {
        false
    }

    fn record(&self, _metric: NodeMetric, _value: u64) {}
}

/// Default factory: every node shares one no-op updater.
#[derive(Default)]
pub struct NoopMetricsFactory {
    updater: Arc<NoopNodeMetricUpdater>,
}

impl MetricsFactory for NoopMetricsFactory {
    fn new_node_updater(&self, _address: SocketAddr) -> Arc<dyn NodeMetricUpdater> {
        self.updater.clone()
    }
}
