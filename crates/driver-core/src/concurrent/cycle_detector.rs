//! # Cycle Detector
//!
//! Tracks which component each thread is building and which component each
//! thread is blocked on. A request is a cycle when:
//!
//! - the component is already on the calling thread's construction stack, or
//! - following "built by" / "waiting on" edges from the requested component
//!   leads back to the calling thread.
//!
//! ```text
//!   thread-1 builds B ──requests──► A
//!                                   │ built by
//!                                   ▼
//!   thread-2 builds A ──waits on──► B ──built by──► thread-1   => cycle
//! ```
//!
//! Detection has a small cost per build, so it can be switched off. When it is
//! off every hook is a no-op and a cyclic dependency deadlocks instead.

use std::collections::{HashMap, HashSet};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::ContextError;

/// Shared wait-for graph for one registry.
pub struct CycleDetector {
    enabled: bool,
    graph: Mutex<WaitGraph>,
}

#[derive(Default)]
struct WaitGraph {
    /// Component name -> thread currently running its builder.
    building: HashMap<&'static str, ThreadId>,
    /// Thread -> component it is blocked on.
    waiting: HashMap<ThreadId, &'static str>,
    /// Thread -> components it is building, outermost first.
    stacks: HashMap<ThreadId, Vec<&'static str>>,
}

impl CycleDetector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            graph: Mutex::new(WaitGraph::default()),
        }
    }

    /// Detector that never reports anything.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Called before the current thread may block on `name`.
    ///
    /// Fails with [`ContextError::Cycle`] if waiting would close a cycle.
    /// Otherwise records the wait; the returned guard clears it on drop.
    pub fn on_try_lock(&self, name: &'static str) -> Result<WaitGuard<'_>, ContextError> {
        if !self.enabled {
            return Ok(WaitGuard { detector: None });
        }

        let current = thread::current().id();
        let mut graph = self.graph.lock();

        if let Some(chain) = graph.find_cycle(current, name) {
            warn!("[Context] Detected cycle: {}", chain.join(" -> "));
            return Err(ContextError::Cycle { chain });
        }

        graph.waiting.insert(current, name);
        Ok(WaitGuard {
            detector: Some(self),
        })
    }

    /// Called once the current thread has become the builder of `name`.
    ///
    /// The returned guard pops the name again when dropped, including while
    /// unwinding out of a panicking builder.
    pub fn on_lock_acquired(&self, name: &'static str) -> BuildGuard<'_> {
        if !self.enabled {
            return BuildGuard {
                detector: None,
                name,
            };
        }

        let current = thread::current().id();
        let mut graph = self.graph.lock();
        graph.waiting.remove(&current);
        graph.building.insert(name, current);
        graph.stacks.entry(current).or_default().push(name);

        BuildGuard {
            detector: Some(self),
            name,
        }
    }

    /// Components the current thread is building, outermost first.
    #[must_use]
    pub fn active_stack(&self) -> Vec<&'static str> {
        self.graph
            .lock()
            .stacks
            .get(&thread::current().id())
            .cloned()
            .unwrap_or_default()
    }

    fn on_wait_finished(&self) {
        self.graph.lock().waiting.remove(&thread::current().id());
    }

    fn on_release_lock(&self, name: &'static str) {
        let current = thread::current().id();
        let mut graph = self.graph.lock();
        graph.building.remove(name);

        if let Some(stack) = graph.stacks.get_mut(&current) {
            if let Some(pos) = stack.iter().rposition(|entry| *entry == name) {
                stack.remove(pos);
            }
            if stack.is_empty() {
                graph.stacks.remove(&current);
            }
        }
    }
}

impl WaitGraph {
    fn find_cycle(&self, current: ThreadId, requested: &'static str) -> Option<Vec<String>> {
        let stack = self.stacks.get(&current).map(Vec::as_slice).unwrap_or(&[]);

        // Reentrant request on the same thread.
        if let Some(pos) = stack.iter().position(|entry| *entry == requested) {
            let mut chain: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
            chain.push(requested.to_string());
            return Some(chain);
        }

        // Wait-for chain through other threads.
        let mut path = vec![requested];
        let mut visited = HashSet::new();
        let mut next = requested;

        while let Some(&owner) = self.building.get(next) {
            if owner == current {
                let pos = stack.iter().position(|entry| *entry == next)?;
                let chain = stack[pos..]
                    .iter()
                    .chain(path.iter())
                    .map(|s| s.to_string())
                    .collect();
                return Some(chain);
            }
            // A loop that does not pass through us is reported by its own members.
            if !visited.insert(owner) {
                return None;
            }
            next = *self.waiting.get(&owner)?;
            path.push(next);
        }

        None
    }
}

/// Clears the current thread's wait record on drop.
#[must_use = "the wait record is cleared when the guard drops"]
pub struct WaitGuard<'a> {
    detector: Option<&'a CycleDetector>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector {
            detector.on_wait_finished();
        }
    }
}

/// Removes a component from the current thread's construction stack on drop.
#[must_use = "the component leaves the construction stack when the guard drops"]
pub struct BuildGuard<'a> {
    detector: Option<&'a CycleDetector>,
    name: &'static str,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector {
            detector.on_release_lock(self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentrant_request_is_a_cycle() {
        let detector = CycleDetector::new(true);
        let _a = detector.on_lock_acquired("a");
        let _b = detector.on_lock_acquired("b");

        let error = detector.on_try_lock("a").err().expect("cycle expected");
        assert_eq!(
            error,
            ContextError::Cycle {
                chain: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_stack_is_symmetric() {
        let detector = CycleDetector::new(true);
        {
            let _a = detector.on_lock_acquired("a");
            {
                let _b = detector.on_lock_acquired("b");
                assert_eq!(detector.active_stack(), vec!["a", "b"]);
            }
            assert_eq!(detector.active_stack(), vec!["a"]);
        }
        assert!(detector.active_stack().is_empty());
        assert!(detector.on_try_lock("a").is_ok());
    }

    #[test]
    fn test_disabled_detector_never_reports() {
        let detector = CycleDetector::disabled();
        let _a = detector.on_lock_acquired("a");

        assert!(detector.on_try_lock("a").is_ok());
        assert!(detector.active_stack().is_empty());
    }

    #[test]
    fn test_other_threads_stack_is_not_a_cycle() {
        let detector = std::sync::Arc::new(CycleDetector::new(true));
        let _a = detector.on_lock_acquired("a");

        let remote = std::sync::Arc::clone(&detector);
        let result = std::thread::spawn(move || remote.on_try_lock("a").map(|_| ()))
            .join()
            .expect("thread panicked");
        assert!(result.is_ok());
    }
}
