//! Periodic acquisition.
//!
//! While a run is active the scheduler polls the gateway once per tick. Every
//! non-empty window goes to the processing capability; the primary channel of
//! one window out of every `downsample_factor` goes to the raw sample queue.
//!
//! Ticks never stack: the gateway read is awaited inside the tick, and ticks that
//! come due while a slow read is in flight are skipped
//! (`MissedTickBehavior::Skip`). Stopping waits for the tick task to exit, so no
//! tick body runs once [`SampleScheduler::stop`] has returned.

use crate::core::{ConnectionState, SampleWindow};
use crate::data::sample_queue::BoundedSampleQueue;
use crate::gateway::ConnectionGateway;
use crate::processing::ProcessingCapability;
use crate::stats::PipelineCounters;
use crate::task::TaskHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The connection is not running.
    NotRunning,
    /// The gateway has no device.
    Disconnected,
    /// Nothing new since the last poll.
    EmptyWindow,
    /// The poll failed.
    ReadFailed,
}

/// What a tick did with its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was forwarded or processed.
    Skipped(SkipReason),
    /// Raw samples of the primary channel were offered to the queue.
    Forwarded {
        /// Samples offered.
        samples: usize,
    },
    /// Window went to processing only; raw display was downsampled away.
    ProcessedOnly,
}

/// Per-run downsampling and hand-off logic, independent of timing.
///
/// The counter advances once per non-empty window and restarts at zero for every
/// run, so the first window of a run is always forwarded.
pub struct TickDispatcher {
    queue: Arc<BoundedSampleQueue>,
    processor: Option<Arc<dyn ProcessingCapability>>,
    counters: Arc<PipelineCounters>,
    factor: u64,
    counter: u64,
}

impl TickDispatcher {
    /// Creates a dispatcher with a fresh downsampling counter.
    pub fn new(
        queue: Arc<BoundedSampleQueue>,
        processor: Option<Arc<dyn ProcessingCapability>>,
        counters: Arc<PipelineCounters>,
        downsample_factor: u32,
    ) -> Self {
        Self {
            queue,
            processor,
            counters,
            factor: u64::from(downsample_factor.max(1)),
            counter: 0,
        }
    }

    /// Hands a polled window to the queue and the processor.
    pub fn dispatch(&mut self, window: &SampleWindow) -> TickOutcome {
        if window.is_empty() {
            PipelineCounters::bump(&self.counters.ticks_skipped);
            return TickOutcome::Skipped(SkipReason::EmptyWindow);
        }

        let forward = self.counter % self.factor == 0;
        self.counter += 1;

        let outcome = if forward {
            let samples = window.primary();
            self.queue.offer_all(samples);
            PipelineCounters::bump(&self.counters.windows_forwarded);
            PipelineCounters::add(&self.counters.samples_forwarded, samples.len() as u64);
            TickOutcome::Forwarded {
                samples: samples.len(),
            }
        } else {
            TickOutcome::ProcessedOnly
        };

        if let Some(processor) = &self.processor {
            processor.submit(window.clone());
            PipelineCounters::bump(&self.counters.windows_processed);
        }
        outcome
    }

    /// Non-empty windows seen this run.
    pub fn windows_seen(&self) -> u64 {
        self.counter
    }
}

/// Owner of the periodic acquisition task for one gateway.
pub struct SampleScheduler {
    gateway: Arc<dyn ConnectionGateway>,
    queue: Arc<BoundedSampleQueue>,
    processor: Option<Arc<dyn ProcessingCapability>>,
    state: watch::Receiver<ConnectionState>,
    counters: Arc<PipelineCounters>,
    period: Duration,
    downsample_factor: u32,
    task: Option<TaskHandle>,
}

impl SampleScheduler {
    /// Creates a stopped scheduler with default timing.
    pub fn new(
        gateway: Arc<dyn ConnectionGateway>,
        queue: Arc<BoundedSampleQueue>,
        state: watch::Receiver<ConnectionState>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            gateway,
            queue,
            processor: None,
            state,
            counters,
            period: Duration::from_millis(250),
            downsample_factor: 4,
            task: None,
        }
    }

    /// Processing stage to feed, if any.
    pub fn with_processor(mut self, processor: Option<Arc<dyn ProcessingCapability>>) -> Self {
        self.processor = processor;
        self
    }

    /// Tick period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Forward raw samples from 1 tick out of `factor`.
    pub fn with_downsample_factor(mut self, factor: u32) -> Self {
        self.downsample_factor = factor.max(1);
        self
    }

    /// True while the tick task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(TaskHandle::is_active)
    }

    /// Starts ticking with a fresh downsampling counter. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!(gateway = %self.gateway.name(), "Scheduler already running");
            return;
        }

        let gateway = Arc::clone(&self.gateway);
        let state = self.state.clone();
        let counters = Arc::clone(&self.counters);
        let mut dispatcher = TickDispatcher::new(
            Arc::clone(&self.queue),
            self.processor.clone(),
            Arc::clone(&self.counters),
            self.downsample_factor,
        );
        let period = self.period;

        self.task = Some(TaskHandle::spawn("sample-scheduler", move |mut shutdown| async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = interval.tick() => {}
                }
                PipelineCounters::bump(&counters.ticks);

                if !state.borrow().is_running() {
                    PipelineCounters::bump(&counters.ticks_skipped);
                    trace!("Tick skipped, run not active");
                    continue;
                }
                if !gateway.is_connected() {
                    PipelineCounters::bump(&counters.ticks_skipped);
                    trace!("Tick skipped, gateway disconnected");
                    continue;
                }

                let read = tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    read = gateway.current_window() => read,
                };

                match read {
                    Ok(window) => {
                        let outcome = dispatcher.dispatch(&window);
                        trace!(?outcome, len = window.len(), "Tick dispatched");
                    }
                    Err(err) => {
                        PipelineCounters::bump(&counters.read_failures);
                        PipelineCounters::bump(&counters.ticks_skipped);
                        warn!(error = %err, "Sample read failed, skipping tick");
                    }
                }
            }
            debug!(windows = dispatcher.windows_seen(), "Scheduler loop exited");
        }));
    }

    /// Stops ticking and waits for an in-flight tick to finish. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop().await;
        }
    }
}
