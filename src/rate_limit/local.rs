//! In-process counter registry for single-instance deployments.
//!
//! # Structure
//!
//! ```text
//!  increment(key) ──► DashMap<key, Window { count, generation }>
//!        │ first touch
//!        ▼
//!  mpsc ──► reaper task ──► DelayQueue (deadline = opened_at + window)
//!                                │ expired
//!                                ▼
//!               remove(key) if generation still matches
//! ```
//!
//! One reaper task serves every key. A key schedules exactly one expiry when
//! its window opens; the generation check keeps a late expiry from deleting
//! a newer window of the same key.
//!
//! # Concurrency
//!
//! Increments run under the DashMap shard lock for the key, so concurrent
//! increments of one key are linearizable and never lost.
//!
//! # Lifecycle
//!
//! The reaper is spawned by [`LocalCounterStore::new`] (requires a Tokio
//! runtime) and stopped by [`CounterStore::shutdown`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, trace};

use super::{BackendError, CounterStore, StoreFuture};

/// Counter state for one key's current window.
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    generation: u64,
}

/// Expiry request handed to the reaper.
#[derive(Debug)]
struct Expiry {
    key: String,
    generation: u64,
    deadline: Instant,
}

/// Concurrent counter map with deadline-driven window resets.
pub struct LocalCounterStore {
    counters: Arc<DashMap<String, Window>>,
    window: Duration,
    next_generation: AtomicU64,
    expiries: mpsc::UnboundedSender<Expiry>,
    closed: AtomicBool,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl LocalCounterStore {
    /// Create the registry and spawn its reaper task.
    pub fn new(window: Duration) -> Self {
        let counters = Arc::new(DashMap::new());
        let (expiries, receiver) = mpsc::unbounded_channel();
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        task_tracker.spawn(run_reaper(
            counters.clone(),
            receiver,
            cancellation_token.clone(),
        ));

        info!(window_secs = window.as_secs_f64(), "Local rate limit counter store started");

        Self {
            counters,
            window,
            next_generation: AtomicU64::new(0),
            expiries,
            closed: AtomicBool::new(false),
            task_tracker,
            cancellation_token,
        }
    }

    /// Current count for a key, if its window is open.
    pub fn count(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|window| window.count)
    }

    /// Number of keys with an open window.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn increment_now(&self, key: &str) -> Result<u64, BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }

        let mut opened = false;
        let (count, generation) = {
            let mut entry = self.counters.entry(key.to_string()).or_insert_with(|| {
                opened = true;
                Window {
                    count: 0,
                    generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                }
            });
            entry.count += 1;
            (entry.count, entry.generation)
        };

        if opened {
            let expiry = Expiry {
                key: key.to_string(),
                generation,
                deadline: Instant::now() + self.window,
            };
            if self.expiries.send(expiry).is_err() {
                // Reaper is gone; drop the key so it cannot live forever
                self.counters.remove(key);
                return Err(BackendError::Closed);
            }
        }

        Ok(count)
    }
}

impl CounterStore for LocalCounterStore {
    fn increment<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<u64, BackendError>> {
        Box::pin(std::future::ready(self.increment_now(key)))
    }

    fn backend(&self) -> &'static str {
        "local"
    }

    fn shutdown(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            self.cancellation_token.cancel();
            self.task_tracker.close();
            self.task_tracker.wait().await;
            self.counters.clear();
            info!("Local rate limit counter store stopped");
        })
    }
}

impl Drop for LocalCounterStore {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

impl std::fmt::Debug for LocalCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCounterStore")
            .field("window", &self.window)
            .field("keys", &self.counters.len())
            .finish()
    }
}

/// What woke the reaper.
enum ReaperEvent {
    Schedule(Expiry),
    Expired(Expiry),
    Stop,
}

/// Single task owning the deadline queue.
async fn run_reaper(
    counters: Arc<DashMap<String, Window>>,
    mut receiver: mpsc::UnboundedReceiver<Expiry>,
    cancel: CancellationToken,
) {
    let mut queue: DelayQueue<Expiry> = DelayQueue::new();

    loop {
        let event = tokio::select! {
            biased;

            _ = cancel.cancelled() => ReaperEvent::Stop,
            scheduled = receiver.recv() => match scheduled {
                Some(expiry) => ReaperEvent::Schedule(expiry),
                None => ReaperEvent::Stop,
            },
            Some(expired) = std::future::poll_fn(|cx| queue.poll_expired(cx)) => {
                ReaperEvent::Expired(expired.into_inner())
            }
        };

        match event {
            ReaperEvent::Schedule(expiry) => {
                let deadline = expiry.deadline;
                queue.insert_at(expiry, deadline);
            }
            ReaperEvent::Expired(expiry) => {
                let removed = counters
                    .remove_if(&expiry.key, |_, window| window.generation == expiry.generation)
                    .is_some();
                if removed {
                    trace!(key = %expiry.key, "Rate limit counter has been reset");
                }
            }
            ReaperEvent::Stop => break,
        }
    }

    debug!(pending = queue.len(), "Rate limit reaper shutting down");
}
