//! Inbound Command Executor
//!
//! Runs the bodies of commands received from other members. Bodies are user code and
//! may block, so they run on the blocking pool and never on the transport's receive
//! path. A semaphore bounds how many execute at once.
//!
//! ## Lifecycle
//! - **Running**: `execute` waits for a permit, then runs the task.
//! - **Shutdown**: new tasks are rejected, in-flight ones are given a bounded time to
//!   finish, then the permits are closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct CommandExecutor {
    permits: Arc<Semaphore>,
    threads: u32,
    closed: AtomicBool,
}

impl CommandExecutor {
    pub fn new(threads: usize) -> Self {
        let threads = threads.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        Self {
            permits: Arc::new(Semaphore::new(threads)),
            threads: threads as u32,
            closed: AtomicBool::new(false),
        }
    }

    /// Runs `task` on the blocking pool.
    ///
    /// Returns `None` if the executor was shut down before the task could start.
    pub async fn execute<R, F>(&self, task: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_shutdown() {
            return None;
        }
        let permit = self.permits.clone().acquire_owned().await.ok()?;

        let running = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        });
        match running.await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!("Command execution aborted: {}", e);
                None
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of tasks currently holding a permit.
    pub fn active(&self) -> usize {
        self.threads as usize - self.permits.available_permits()
    }

    /// Rejects new tasks and waits up to `timeout` for running ones.
    ///
    /// Returns `true` if everything finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);

        let drained = tokio::time::timeout(timeout, self.permits.acquire_many(self.threads)).await;
        self.permits.close();

        match drained {
            Ok(Ok(_all)) => true,
            Ok(Err(_)) => true,
            Err(_) => {
                tracing::warn!(
                    "{} inbound commands still running after {:?}",
                    self.active(),
                    timeout
                );
                false
            }
        }
    }
}
