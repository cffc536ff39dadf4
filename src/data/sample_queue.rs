//! Bounded FIFO of raw samples between the acquisition tick and the render pump.
//!
//! The acquisition side calls [`BoundedSampleQueue::offer_all`] once per forwarded
//! tick and the render pump calls [`BoundedSampleQueue::drain_all`] once per frame.
//! Both go through one short critical section, so neither side ever waits on the
//! other for longer than a copy of the queued values.
//!
//! # Overflow
//!
//! Under normal rates the queue never fills because input is downsampled. When it
//! does, the configured [`OverflowPolicy`] applies:
//!
//! - `DropOldest` evicts from the head so the newest samples survive. Order of the
//!   retained samples is unchanged.
//! - `Reject` refuses the incoming sample and returns `LabError::QueueOverflow`.
//!
//! Either way the drop is counted and logged, never fatal.

use crate::error::{AppResult, LabError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// What happens to a sample offered to a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued sample to make room.
    #[default]
    DropOldest,
    /// Refuse the new sample.
    Reject,
}

enum Push {
    Accepted,
    Evicted,
    Rejected,
}

/// Fixed-capacity, internally synchronized sample queue.
#[derive(Debug)]
pub struct BoundedSampleQueue {
    inner: Mutex<VecDeque<f64>>,
    capacity: usize,
    policy: OverflowPolicy,
    log_every: u64,
    /// Samples lost to overflow since creation.
    dropped_total: AtomicU64,
    /// Samples lost since the last `clear`, drives log throttling.
    dropped_since_clear: AtomicU64,
}

impl BoundedSampleQueue {
    /// Creates a queue holding at most `capacity` samples.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_log_interval(capacity, policy, 1000)
    }

    /// Like [`BoundedSampleQueue::new`], warning once per `log_every` dropped samples.
    pub fn with_log_interval(capacity: usize, policy: OverflowPolicy, log_every: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            log_every: log_every.max(1),
            dropped_total: AtomicU64::new(0),
            dropped_since_clear: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts one sample at the tail.
    ///
    /// # Errors
    /// `LabError::QueueOverflow` when the queue is full and the policy is `Reject`.
    pub fn offer(&self, sample: f64) -> AppResult<()> {
        let outcome = {
            let mut queue = self.lock();
            self.push_locked(&mut queue, sample)
        };
        match outcome {
            Push::Accepted => Ok(()),
            Push::Evicted => {
                self.record_overflow(1);
                Ok(())
            }
            Push::Rejected => {
                self.record_overflow(1);
                Err(LabError::QueueOverflow {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Inserts every sample in order and returns how many were accepted.
    ///
    /// Under `DropOldest` all samples are accepted (possibly evicting older ones).
    /// Under `Reject` the samples that do not fit are refused.
    pub fn offer_all(&self, samples: &[f64]) -> usize {
        let mut lost = 0u64;
        let mut accepted = 0usize;
        {
            let mut queue = self.lock();
            for &sample in samples {
                match self.push_locked(&mut queue, sample) {
                    Push::Accepted => accepted += 1,
                    Push::Evicted => {
                        accepted += 1;
                        lost += 1;
                    }
                    Push::Rejected => lost += 1,
                }
            }
        }
        if lost > 0 {
            self.record_overflow(lost);
        }
        accepted
    }

    fn push_locked(&self, queue: &mut VecDeque<f64>, sample: f64) -> Push {
        if queue.len() < self.capacity {
            queue.push_back(sample);
            return Push::Accepted;
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                queue.pop_front();
                queue.push_back(sample);
                Push::Evicted
            }
            OverflowPolicy::Reject => Push::Rejected,
        }
    }

    fn record_overflow(&self, lost: u64) {
        self.dropped_total.fetch_add(lost, Ordering::Relaxed);
        let before = self.dropped_since_clear.fetch_add(lost, Ordering::Relaxed);
        let after = before + lost;
        // First drop after a clear, then once per `log_every`.
        if before == 0 || before / self.log_every != after / self.log_every {
            warn!(
                capacity = self.capacity,
                policy = ?self.policy,
                dropped = after,
                "Sample queue overflow"
            );
        }
    }

    /// Removes and returns every queued sample in FIFO order. Never blocks on the
    /// producer beyond the copy.
    pub fn drain_all(&self) -> Vec<f64> {
        let mut queue = self.lock();
        queue.drain(..).collect()
    }

    /// Discards queued samples and restarts overflow log throttling.
    pub fn clear(&self) {
        self.lock().clear();
        self.dropped_since_clear.store(0, Ordering::Relaxed);
    }

    /// Number of queued samples.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of queued samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy in force.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Total samples lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}
