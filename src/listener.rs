//! Listener Workers
//!
//! Every registered listener gets its own worker task fed through an unbounded FIFO
//! channel. Events raised on cache or transport threads are only enqueued there, and
//! the listener callback itself runs on the blocking pool. Listener code therefore
//! never runs on the thread that raised the event, and a slow listener only delays
//! itself. Each listener observes its events in submission order.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

/// Dedicated delivery worker for a single listener.
///
/// Dropping the worker stops delivery; events still queued are discarded.
pub struct ListenerWorker<E> {
    name: String,
    sender: mpsc::UnboundedSender<E>,
    handle: JoinHandle<()>,
}

impl<E: Send + 'static> ListenerWorker<E> {
    /// Spawns a worker on `runtime` that hands every submitted event to `deliver`.
    ///
    /// Each call of `deliver` runs on the blocking pool and is awaited before the next
    /// event is taken, so a listener that blocks only holds up its own queue. A callback
    /// error or panic is logged under `name` and does not stop the worker.
    pub fn spawn<F>(runtime: &Handle, name: impl Into<String>, deliver: F) -> Self
    where
        F: Fn(E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<E>();
        let deliver = Arc::new(deliver);

        let worker_name = name.clone();
        let handle = runtime.spawn(async move {
            while let Some(event) = receiver.recv().await {
                let deliver = deliver.clone();
                match task::spawn_blocking(move || deliver(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(listener = %worker_name, "Listener notification failed: {:#}", e);
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(listener = %worker_name, "Listener panicked during notification");
                    }
                    Err(_) => break,
                }
            }
            tracing::trace!(listener = %worker_name, "Listener worker drained");
        });

        Self {
            name,
            sender,
            handle,
        }
    }

    /// Queues `event` for delivery. Returns `false` once the worker has stopped.
    pub fn submit(&self, event: E) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops delivery and releases the worker.
    pub fn close(self) {
        tracing::debug!(listener = %self.name, "Closing listener worker");
    }
}

impl<E> Drop for ListenerWorker<E> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The set of workers currently registered with one event source.
pub struct Listeners<E> {
    workers: DashMap<u64, ListenerWorker<E>>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> Listeners<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Adds `worker`; the returned registration removes it again.
    pub fn add(self: &Arc<Self>, worker: ListenerWorker<E>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(listener = %worker.name(), id, "Registered listener");
        self.workers.insert(id, worker);

        let listeners: Weak<Self> = Arc::downgrade(self);
        Registration::new(move || {
            if let Some(listeners) = listeners.upgrade()
                && let Some((_, worker)) = listeners.workers.remove(&id)
            {
                worker.close();
            }
        })
    }

    /// Queues a copy of `event` on every registered worker.
    pub fn notify(&self, event: &E) {
        for worker in self.workers.iter() {
            if !worker.submit(event.clone()) {
                tracing::debug!(listener = %worker.name(), "Dropped event for stopped listener");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stops and releases every worker.
    pub fn clear(&self) {
        self.workers.clear();
    }
}

/// Handle returned by a `register` call.
///
/// Closing or dropping it undoes the registration.
#[must_use = "dropping a registration immediately unregisters it"]
pub struct Registration {
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Registration {
    pub fn new(on_close: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            on_close: Some(Box::new(on_close)),
        }
    }

    /// A registration with nothing to undo.
    pub fn empty() -> Self {
        Self { on_close: None }
    }

    pub fn close(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = ListenerWorker::spawn(&Handle::current(), "ordered", move |event: u32| {
            sink.lock().push(event);
            Ok(())
        });

        for i in 0..100 {
            assert!(worker.submit(i));
        }

        wait_until(|| seen.lock().len() == 100).await;
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_stop_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = ListenerWorker::spawn(&Handle::current(), "flaky", move |event: u32| {
            if event == 1 {
                anyhow::bail!("rejecting {}", event);
            }
            if event == 2 {
                panic!("boom");
            }
            sink.lock().push(event);
            Ok(())
        });

        for i in 0..4 {
            worker.submit(i);
        }

        wait_until(|| seen.lock().len() == 2).await;
        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[tokio::test]
    async fn test_blocking_listener_does_not_delay_others() {
        let listeners = Listeners::<u32>::new();
        let _slow = listeners.add(ListenerWorker::spawn(&Handle::current(), "slow", |_| {
            std::thread::sleep(Duration::from_millis(800));
            Ok(())
        }));
        let delivered = Arc::new(Mutex::new(None));
        let sink = delivered.clone();
        let _fast = listeners.add(ListenerWorker::spawn(
            &Handle::current(),
            "fast",
            move |_: u32| {
                *sink.lock() = Some(Instant::now());
                Ok(())
            },
        ));

        let notified = Instant::now();
        listeners.notify(&1);

        wait_until(|| delivered.lock().is_some()).await;
        let elapsed = delivered.lock().map(|at| at - notified).unwrap();
        assert!(elapsed < Duration::from_millis(200), "fast listener waited {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_registration_close_removes_worker() {
        let listeners = Listeners::<u32>::new();
        let first = listeners.add(ListenerWorker::spawn(&Handle::current(), "a", |_| Ok(())));
        let _second = listeners.add(ListenerWorker::spawn(&Handle::current(), "b", |_| Ok(())));
        assert_eq!(listeners.len(), 2);

        first.close();
        assert_eq!(listeners.len(), 1);

        listeners.clear();
        assert!(listeners.is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let worker = ListenerWorker::spawn(&Handle::current(), "closed", |_: u32| Ok(()));
        let sender = worker.sender.clone();
        worker.close();

        wait_until(|| sender.is_closed()).await;
        assert!(sender.send(1).is_err());
    }
}
