//! # Cluster Metadata
//!
//! Node descriptors and the single-writer discipline around them.
//!
//! ```text
//!  TopologyMonitor ──jobs──► CoordinationTask ("driver-admin")
//!                                   │ &NodeWriter
//!                                   ▼
//!  MetadataManager ◄── ArcSwap<NodeMap> ──► Arc<NodeDescriptor> ◄── readers
//! ```
//!
//! ## Rules
//!
//! - Only code running on the coordination thread holds a `&NodeWriter`.
//! - Readers never lock: membership is an `ArcSwap` snapshot and every
//!   descriptor field is an atomic or an `ArcSwap`.

pub mod coordinator;
pub mod manager;
pub mod node;
pub mod topology;
pub mod writer;

pub use coordinator::{CoordinationTask, ADMIN_THREAD_NAME};
pub use manager::{contact_points, MetadataManager, DEFAULT_PORT};
pub use node::{NodeDescriptor, NodeDistance, NodeInfo, NodeSnapshot, NodeState, ServerVersion};
pub use topology::{LoadBalancingPolicyWrapper, PeerRow, TopologyDiff, TopologyMonitor};
pub use writer::{NodeMap, NodeWriter};
