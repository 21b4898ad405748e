//! # Coordination Task
//!
//! The `driver-admin` thread: a FIFO of jobs, each run with `&NodeWriter`.
//!
//! ```text
//!  submit(job) ──┐
//!  execute(job) ─┼──► mpsc ──► driver-admin thread ──► job(&writer)
//!  (reply via    │                                      │
//!   oneshot) ◄───┴──────────────────────────────────────┘
//! ```
//!
//! Jobs run one at a time in submission order. A panicking job is logged and
//! the thread moves on to the next one.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::ContextError;
use crate::metadata::writer::NodeWriter;

/// Name of the coordination thread.
pub const ADMIN_THREAD_NAME: &str = "driver-admin";

type Job = Box<dyn FnOnce(&NodeWriter) + Send>;

/// Handle to the coordination thread.
pub struct CoordinationTask {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl CoordinationTask {
    /// Move `writer` onto a new coordination thread.
    pub(crate) fn spawn(writer: NodeWriter) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let handle = thread::Builder::new()
            .name(ADMIN_THREAD_NAME.to_string())
            .spawn(move || {
                debug!("[Coordinator] Started");
                while let Some(job) = receiver.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(|| job(&writer))).is_err() {
                        error!("[Coordinator] Job panicked; continuing with the next one");
                    }
                }
                debug!("[Coordinator] Stopped");
            })?;

        Ok(Self {
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job without waiting for it.
    pub fn submit<F>(&self, job: F) -> Result<(), ContextError>
    where
        F: FnOnce(&NodeWriter) + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(ContextError::Closed)?;
        sender
            .send(Box::new(job))
            .map_err(|_| ContextError::Closed)
    }

    /// Queue a job and get a receiver for its result. Usable from async code.
    pub fn submit_with_reply<R, F>(&self, job: F) -> Result<oneshot::Receiver<R>, ContextError>
    where
        R: Send + 'static,
        F: FnOnce(&NodeWriter) -> R + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        self.submit(move |writer| {
            let _ = reply.send(job(writer));
        })?;
        Ok(receiver)
    }

    /// Run a job and block until it has finished.
    ///
    /// Must not be called from inside an async runtime (use
    /// [`submit_with_reply`](Self::submit_with_reply) there) nor from a job.
    pub fn execute<R, F>(&self, job: F) -> Result<R, ContextError>
    where
        R: Send + 'static,
        F: FnOnce(&NodeWriter) -> R + Send + 'static,
    {
        if self.is_coordination_thread() {
            return Err(ContextError::build(
                ADMIN_THREAD_NAME,
                "execute() called from a coordination job would wait on itself",
            ));
        }
        self.submit_with_reply(job)?
            .blocking_recv()
            .map_err(|_| ContextError::Closed)
    }

    /// Whether the caller is running on the coordination thread.
    #[must_use]
    pub fn is_coordination_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs, let queued jobs finish and join the thread.
    ///
    /// Safe to call more than once. Called from a job it only closes the queue.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        info!("[Coordinator] Shutting down");

        if self.is_coordination_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("[Coordinator] Thread terminated abnormally");
            }
        }
    }
}

impl Drop for CoordinationTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
