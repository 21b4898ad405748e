//! # Lazy Cell
//!
//! Memoized, thread-safe, at-most-once value holder.
//!
//! ```text
//!            get()                 builder Ok            (forever)
//!  ┌───────┐ ─────► ┌──────────┐ ──────────► ┌───────┐
//!  │ Empty │        │ Building │             │ Built │
//!  └───────┘        └──────────┘ ──────────► ┌────────┐
//!      ▲                 │       builder Err │ Failed │
//!      │ replace_builder │ others block      └────────┘
//!      └──── (only here) ▼ on the condvar
//! ```
//!
//! The builder runs on the first caller's thread. Concurrent callers block
//! until the value (or the failure) is published and then receive a clone of
//! it. A failure is published exactly like a value: the builder is never
//! invoked again.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::concurrent::CycleDetector;
use crate::error::ContextError;

/// Zero-argument builder stored in an unbuilt cell.
pub type Builder<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

enum CellState<T> {
    Empty(Builder<T>),
    Building,
    Built(T),
    Failed(ContextError),
}

impl<T> CellState<T> {
    fn status(&self) -> CellStatus {
        match self {
            Self::Empty(_) => CellStatus::Empty,
            Self::Building => CellStatus::Building,
            Self::Built(_) => CellStatus::Built,
            Self::Failed(_) => CellStatus::Failed,
        }
    }
}

/// Observable phase of a [`LazyCell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellStatus {
    /// Never accessed.
    Empty,
    /// A thread is running the builder.
    Building,
    /// The value is cached.
    Built,
    /// The builder failed; the failure is cached.
    Failed,
}

/// A lazily built value shared by every caller.
pub struct LazyCell<T> {
    name: &'static str,
    state: Mutex<CellState<T>>,
    ready: Condvar,
    cycle_detector: Arc<CycleDetector>,
}

impl<T: Clone> LazyCell<T> {
    pub fn new<F>(name: &'static str, builder: F, cycle_detector: Arc<CycleDetector>) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            name,
            state: Mutex::new(CellState::Empty(Box::new(builder))),
            ready: Condvar::new(),
            cycle_detector,
        }
    }

    /// Name used in diagnostics and cycle chains.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the cached value, building it on first call.
    ///
    /// # Errors
    ///
    /// - [`ContextError::Cycle`] if the calling thread (directly or through
    ///   threads it would wait on) is already building this cell
    /// - whatever error the builder produced, now and on every later call
    pub fn get(&self) -> Result<T, ContextError> {
        if let Some(result) = self.completed() {
            return result;
        }

        let wait = self.cycle_detector.on_try_lock(self.name)?;
        let mut state = self.state.lock();
        let builder = loop {
            match &*state {
                CellState::Built(value) => return Ok(value.clone()),
                CellState::Failed(error) => return Err(error.clone()),
                CellState::Building => self.ready.wait(&mut state),
                CellState::Empty(_) => {
                    if let CellState::Empty(builder) =
                        mem::replace(&mut *state, CellState::Building)
                    {
                        break builder;
                    }
                }
            }
        };
        drop(state);
        drop(wait);

        let _building = self.cycle_detector.on_lock_acquired(self.name);
        let mut publish = Publish {
            cell: self,
            published: false,
        };

        debug!("[Context] Building {}", self.name);
        let started = Instant::now();
        let result = builder().map_err(|error| ContextError::from_builder(self.name, error));

        match &result {
            Ok(_) => debug!(
                "[Context] Built {} in {:?}",
                self.name,
                started.elapsed()
            ),
            Err(error) => warn!("[Context] Failed to build {}: {}", self.name, error),
        }

        publish.finish(result.clone());
        result
    }

    /// The cached value, if the cell is built. Never triggers the builder.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        match &*self.state.lock() {
            CellState::Built(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Swap the builder while the cell has never been accessed.
    ///
    /// Returns `false` (and leaves the cell untouched) once the first access
    /// has started.
    pub fn replace_builder<F>(&self, builder: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        match &mut *self.state.lock() {
            CellState::Empty(current) => {
                *current = Box::new(builder);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn status(&self) -> CellStatus {
        self.state.lock().status()
    }

    fn completed(&self) -> Option<Result<T, ContextError>> {
        match &*self.state.lock() {
            CellState::Built(value) => Some(Ok(value.clone())),
            CellState::Failed(error) => Some(Err(error.clone())),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for LazyCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCell")
            .field("name", &self.name)
            .field("status", &self.state.lock().status())
            .finish()
    }
}

/// Publishes the build outcome and wakes waiters. If the builder unwinds
/// before `finish`, the cell is failed on drop so waiters are not stranded.
struct Publish<'a, T> {
    cell: &'a LazyCell<T>,
    published: bool,
}

impl<T> Publish<'_, T> {
    fn finish(&mut self, result: Result<T, ContextError>) {
        self.store(match result {
            Ok(value) => CellState::Built(value),
            Err(error) => CellState::Failed(error),
        });
    }

    fn store(&mut self, state: CellState<T>) {
        *self.cell.state.lock() = state;
        self.published = true;
        self.cell.ready.notify_all();
    }
}

impl<T> Drop for Publish<'_, T> {
    fn drop(&mut self) {
        if !self.published {
            let error = ContextError::build(self.cell.name, "builder panicked");
            self.store(CellState::Failed(error));
        }
    }
}
