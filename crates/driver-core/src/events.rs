//! # Driver Events
//!
//! In-process broadcast of cluster membership and node state changes.
//!
//! Publishing never blocks. A subscriber that falls more than the channel
//! capacity behind observes `RecvError::Lagged` and skips ahead.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::metadata::{NodeDistance, NodeState};

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A change published by the coordination task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    NodeAdded {
        address: SocketAddr,
    },
    NodeRemoved {
        address: SocketAddr,
    },
    NodeStateChanged {
        address: SocketAddr,
        old: NodeState,
        new: NodeState,
    },
    DistanceChanged {
        address: SocketAddr,
        old: NodeDistance,
        new: NodeDistance,
    },
}

impl DriverEvent {
    /// The node the event is about.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        match self {
            Self::NodeAdded { address }
            | Self::NodeRemoved { address }
            | Self::NodeStateChanged { address, .. }
            | Self::DistanceChanged { address, .. } => *address,
        }
    }
}

/// Multi-producer, multi-consumer event channel.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DriverEvent>,
    capacity: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// Publish an event, returning how many subscribers will see it.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: DriverEvent) -> usize {
        trace!("[Events] {:?}", event);
        self.sender.send(event).unwrap_or(0)
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
