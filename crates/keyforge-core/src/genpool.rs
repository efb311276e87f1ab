//! Background value-generation pools.
//!
//! A [`ValueGenPool`] keeps a bounded buffer of pre-generated values (key
//! bytes, identifiers) filled by a dedicated worker task, so request-time
//! generation never waits on CPU or entropy. The buffer is a bounded
//! `tokio::sync::mpsc` channel; the worker tops it up to the high-water
//! mark, idles until consumers drain it below the low-water mark, and
//! consumers suspend when it is empty.
//!
//! The worker rotates its generator in epochs: after producing a configured
//! number of items, or after a configured wall-clock lifetime, it starts a
//! fresh epoch. [`ValueGenPool::get`] discards buffered items from retired
//! epochs and items older than the lifetime, so a stale value is never
//! served. It never returns a default value.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::GenPoolError;

/// Pause before retrying a failed generator call.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Configuration for one [`ValueGenPool`].
#[derive(Debug, Clone)]
pub struct GenPoolConfig {
    /// Pool name, for logs only.
    pub name: String,
    /// Low-water mark: once buffered items fall below this, the worker
    /// refills to `max_items`.
    pub min_items: usize,
    /// High-water mark and buffer capacity. The worker suspends once this
    /// many items wait.
    pub max_items: usize,
    /// Items one generator epoch may produce before rotation.
    pub max_lifetime_items: u64,
    /// Wall-clock lifetime of one epoch, and the maximum age of a served
    /// item.
    pub max_lifetime: Duration,
}

impl GenPoolConfig {
    fn validate(&self) -> Result<(), GenPoolError> {
        let fail = |reason: &str| {
            Err(GenPoolError::InvalidConfig {
                pool: self.name.clone(),
                reason: reason.to_owned(),
            })
        };
        if self.name.is_empty() {
            return fail("pool name must not be empty");
        }
        if self.min_items == 0 {
            return fail("min_items must be at least 1");
        }
        if self.min_items > self.max_items {
            return fail("min_items must not exceed max_items");
        }
        if self.max_lifetime_items == 0 {
            return fail("max_lifetime_items must be at least 1");
        }
        if self.max_lifetime.is_zero() {
            return fail("max_lifetime must be positive");
        }
        Ok(())
    }
}

struct Buffered<T> {
    value: T,
    epoch: u64,
    produced_at: Instant,
}

/// A bounded buffer of pre-generated values with a background producer.
#[derive(Debug)]
pub struct ValueGenPool<T> {
    name: String,
    min_items: usize,
    max_lifetime: Duration,
    current_epoch: Arc<AtomicU64>,
    closed: AtomicBool,
    /// Buffered item count, incremented by the worker before it sends and
    /// decremented by `get` after it receives, so it never underflows.
    depth: Arc<AtomicUsize>,
    /// Wakes the worker once the buffer drains below `min_items`.
    refill: Arc<Notify>,
    receiver: Mutex<mpsc::Receiver<Buffered<T>>>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> ValueGenPool<T> {
    /// Start a pool with its worker task.
    ///
    /// The generator is called once per produced item and may fail
    /// transiently; failures are logged and retried by the worker. Anything
    /// that would make every call fail must be rejected here instead.
    ///
    /// # Errors
    ///
    /// Returns [`GenPoolError::InvalidConfig`] for unusable bounds or
    /// lifetimes.
    pub fn new<F>(config: GenPoolConfig, generator: F) -> Result<Self, GenPoolError>
    where
        F: Fn() -> Result<T, String> + Send + Sync + 'static,
    {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.max_items);
        let current_epoch = Arc::new(AtomicU64::new(0));
        let depth = Arc::new(AtomicUsize::new(0));
        let refill = Arc::new(Notify::new());
        let worker = tokio::spawn(run_worker(
            config.clone(),
            generator,
            sender,
            Arc::clone(&current_epoch),
            Arc::clone(&depth),
            Arc::clone(&refill),
        ));
        Ok(Self {
            name: config.name,
            min_items: config.min_items,
            max_lifetime: config.max_lifetime,
            current_epoch,
            closed: AtomicBool::new(false),
            depth,
            refill,
            receiver: Mutex::new(receiver),
            worker,
        })
    }

    /// Take one fresh value, waiting if the buffer is momentarily empty.
    ///
    /// Buffered items that outlived the configured lifetime or that belong
    /// to a retired generator epoch are discarded, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`GenPoolError::Closed`] once the pool has been cancelled.
    pub async fn get(&self) -> Result<T, GenPoolError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(GenPoolError::Closed {
                    pool: self.name.clone(),
                });
            }
            let Some(item) = receiver.recv().await else {
                return Err(GenPoolError::Closed {
                    pool: self.name.clone(),
                });
            };
            let remaining = self.depth.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            if remaining < self.min_items {
                self.refill.notify_one();
            }
            let current = self.current_epoch.load(Ordering::Acquire);
            if item.epoch == current && item.produced_at.elapsed() <= self.max_lifetime {
                return Ok(item.value);
            }
            debug!(pool = %self.name, item_epoch = item.epoch, current_epoch = current,
                "discarded stale buffered value");
        }
    }

    /// Stop the worker and close the buffer. Subsequent [`get`] calls fail
    /// with [`GenPoolError::Closed`]. Dropping the pool has the same effect.
    ///
    /// [`get`]: ValueGenPool::get
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::Release);
        self.worker.abort();
        debug!(pool = %self.name, "generator pool cancelled");
    }
}

impl<T> Drop for ValueGenPool<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<T, F>(
    config: GenPoolConfig,
    generator: F,
    sender: mpsc::Sender<Buffered<T>>,
    current_epoch: Arc<AtomicU64>,
    depth: Arc<AtomicUsize>,
    refill: Arc<Notify>,
) where
    F: Fn() -> Result<T, String> + Send + Sync + 'static,
{
    let mut epoch = 0u64;
    let mut epoch_start = Instant::now();
    let mut produced_in_epoch = 0u64;
    loop {
        // Top up to the high-water mark, then idle until the consumer
        // side drains the buffer below min_items.
        if depth.load(Ordering::Acquire) >= config.max_items {
            refill.notified().await;
            continue;
        }
        if produced_in_epoch >= config.max_lifetime_items
            || epoch_start.elapsed() >= config.max_lifetime
        {
            epoch = epoch.wrapping_add(1);
            current_epoch.store(epoch, Ordering::Release);
            epoch_start = Instant::now();
            produced_in_epoch = 0;
            debug!(pool = %config.name, epoch, "rotated generator epoch");
        }
        match generator() {
            Ok(value) => {
                produced_in_epoch += 1;
                let item = Buffered {
                    value,
                    epoch,
                    produced_at: Instant::now(),
                };
                depth.fetch_add(1, Ordering::AcqRel);
                if sender.send(item).await.is_err() {
                    // Receiver side is gone; the pool was dropped.
                    return;
                }
            }
            Err(reason) => {
                warn!(pool = %config.name, %reason, "generator failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}
