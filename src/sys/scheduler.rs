//! One-shot delayed work on a single serial execution context.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "macos")]
pub use macos::{MainQueue, release_on_main};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Runs `task` once, at or after `delay` from now. Tasks never run
    /// concurrently with each other.
    fn schedule_after(&self, delay: Duration, task: Task);
}

/// A current-thread tokio runtime on a dedicated thread. Every task is a
/// timer on that one runtime, so tasks never overlap.
///
/// Dropping the queue discards tasks that have not fired yet.
pub struct SerialQueue {
    handle: Handle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl SerialQueue {
    pub fn new(label: &str) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().thread_name(label).build()?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let thread = thread::Builder::new().name(label.to_string()).spawn(move || {
            runtime.block_on(token.cancelled());
            debug!("serial queue shutting down");
        })?;
        Ok(SerialQueue { handle, shutdown, thread: Some(thread) })
    }
}

impl Scheduler for SerialQueue {
    fn schedule_after(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(?delay, "running scheduled task");
            task();
        });
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take()
            && thread.thread().id() != thread::current().id()
        {
            let _ = thread.join();
        }
    }
}

/// The scheduler the host should use: the main dispatch queue where there
/// is one, otherwise a [`SerialQueue`].
pub fn system() -> io::Result<Arc<dyn Scheduler>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(MainQueue))
    }
    #[cfg(not(target_os = "macos"))]
    {
        Ok(Arc::new(SerialQueue::new("observer-subscriptions")?))
    }
}
