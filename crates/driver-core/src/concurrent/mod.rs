//! # Deferred Construction Primitives
//!
//! - [`LazyCell`]: at-most-once, memoized value holder (the unit of deferred
//!   construction)
//! - [`CycleDetector`]: per-registry wait-for graph that turns reentrant or
//!   cross-thread construction cycles into errors

pub mod cycle_detector;
pub mod lazy_cell;

pub use cycle_detector::{BuildGuard, CycleDetector, WaitGuard};
pub use lazy_cell::{Builder, CellStatus, LazyCell};
