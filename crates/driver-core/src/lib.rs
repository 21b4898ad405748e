//! # Driver Core - Component Registry and Node Metadata
//!
//! Bootstrap and shared-state core of a cluster database driver.
//!
//! ## What Lives Here
//!
//! - **DriverContext:** lazily builds every driver component exactly once,
//!   on first access, and reports dependency cycles instead of deadlocking
//! - **NodeDescriptor:** one record per cluster node, readable from any
//!   thread without locking, writable only from the `driver-admin` thread
//!
//! ```text
//!        caller threads                       driver-admin thread
//!  ┌──────────────────────────┐         ┌──────────────────────────┐
//!  │ ctx.topology_monitor()   │  jobs   │ CoordinationTask         │
//!  │ ctx.metadata_manager()   │ ──────► │   job(&NodeWriter)       │
//!  │ node.state()  (no lock)  │         │   node.store_*()         │
//!  └──────────────────────────┘         └──────────────────────────┘
//!               ▲                                   │
//!               └──────── Arc<NodeDescriptor> ◄─────┘
//! ```
//!
//! ## Not Here
//!
//! Socket I/O, frame encoding, TLS handshakes and routing algorithms. The
//! context only builds and hands out the collaborators that do them.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod channel;
pub mod concurrent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod metadata;
pub mod metrics;
pub mod policies;
pub mod protocol;

// Re-export main types
pub use concurrent::{CellStatus, CycleDetector, LazyCell};
pub use config::{DriverConfig, DriverOption, OptionValue};
pub use context::{DriverContext, StrategyFactories};
pub use error::{ContextError, ParseError};
pub use events::{DriverEvent, EventBus};
pub use metadata::{
    CoordinationTask, MetadataManager, NodeDescriptor, NodeDistance, NodeInfo, NodeState,
    NodeWriter,
};
