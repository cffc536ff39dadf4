//! Moves queued raw samples onto the sliding display.
//!
//! Once per frame the pump drains the whole queue and dispatches each value to
//! the rendering context, spacing dispatches by the pacing interval so a large
//! batch scrolls in smoothly instead of appearing at once.

use crate::data::sample_queue::BoundedSampleQueue;
use crate::render::context::RenderHandle;
use crate::stats::PipelineCounters;
use crate::task::TaskHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// Spaces consecutive dispatches by a fixed interval.
///
/// Deadlines accumulate from the start of a batch, so a pacer that falls behind
/// (coarse timers) catches up instead of drifting.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next: Option<Instant>,
}

impl Pacer {
    /// Creates a pacer; a zero interval never waits.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Forgets the previous schedule; the next deadline is one interval from now.
    pub fn reset(&mut self) {
        self.next = None;
    }

    /// Deadline the next `wait` will sleep until.
    pub fn next_deadline(&self) -> Instant {
        self.next.unwrap_or_else(Instant::now) + self.interval
    }

    /// Sleeps until the next deadline.
    pub async fn wait(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        let deadline = self.next_deadline();
        self.next = Some(deadline);
        time::sleep_until(deadline).await;
    }
}

/// Owner of the drain-and-dispatch task.
pub struct RenderPump {
    queue: Arc<BoundedSampleQueue>,
    render: RenderHandle,
    counters: Arc<PipelineCounters>,
    pacing: Duration,
    task: Option<TaskHandle>,
}

impl RenderPump {
    /// Creates a stopped pump.
    pub fn new(
        queue: Arc<BoundedSampleQueue>,
        render: RenderHandle,
        counters: Arc<PipelineCounters>,
        pacing: Duration,
    ) -> Self {
        Self {
            queue,
            render,
            counters,
            pacing,
            task: None,
        }
    }

    /// True while the drain task runs.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(TaskHandle::is_active)
    }

    /// Starts draining on every frame. No-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let queue = Arc::clone(&self.queue);
        let render = self.render.clone();
        let counters = Arc::clone(&self.counters);
        let mut pacer = Pacer::new(self.pacing);

        self.task = Some(TaskHandle::spawn("render-pump", move |mut shutdown| async move {
            let mut frames = render.frames();
            'frames: loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    changed = frames.changed() => {
                        if changed.is_err() {
                            debug!("Render context closed, pump exiting");
                            break;
                        }
                    }
                }

                let batch = queue.drain_all();
                if batch.is_empty() {
                    continue;
                }
                trace!(len = batch.len(), "Dispatching batch");

                pacer.reset();
                for value in batch {
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break 'frames,
                        _ = pacer.wait() => {}
                    }
                    let counters = Arc::clone(&counters);
                    let sent = render.run_later(move |display| {
                        display.raw.push(value);
                        PipelineCounters::bump(&counters.values_rendered);
                    });
                    if sent.is_err() {
                        debug!("Render context closed mid-batch, pump exiting");
                        break 'frames;
                    }
                }
            }
        }));
    }

    /// Stops the pump. Values drained but not yet dispatched are discarded.
    pub async fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pacer_accumulates_deadlines() {
        let mut pacer = Pacer::new(Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait().await;
        }
        assert!(Instant::now() - start >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_pacing_never_sleeps() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.wait().await;
        }
        assert_eq!(Instant::now(), start);
    }
}
