//! Processing capability and its display bridge.
//!
//! The capability receives every non-empty window and asynchronously emits a
//! [`ProcessedResult`] on its result feed. [`ProcessingBridge`] marshals those
//! results onto the band display, and [`BaselineCalibration`] runs the timed
//! baseline capture the capability supports.

use crate::core::{ConnectionState, ProcessedResult, SampleWindow};
use crate::display::DisplaySink;
use crate::error::{AppResult, LabError};
use crate::render::context::RenderHandle;
use crate::stats::PipelineCounters;
use crate::task::TaskHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// External signal-processing stage.
///
/// `submit` must return quickly; heavy work belongs on the implementation's own
/// task. Results arrive on `results` in submission order.
pub trait ProcessingCapability: Send + Sync {
    /// Hands over one acquired window.
    fn submit(&self, window: SampleWindow);

    /// Subscribe to processed results.
    fn results(&self) -> broadcast::Receiver<ProcessedResult>;

    /// Drop the current baseline so results are reported unadjusted.
    fn reset_baseline(&self);

    /// Start accumulating submitted windows into a new baseline.
    fn begin_baseline_calculation(&self);

    /// Finish accumulating and apply the new baseline.
    fn end_baseline_calculation(&self);
}

/// Paints processed results on the band display unless painting is suppressed.
pub struct ProcessingBridge {
    render: RenderHandle,
    enabled: Arc<AtomicBool>,
    band_count: usize,
    task: TaskHandle,
}

impl ProcessingBridge {
    /// Starts painting results from `processor`.
    pub fn spawn(
        processor: &Arc<dyn ProcessingCapability>,
        render: RenderHandle,
        counters: Arc<PipelineCounters>,
        band_count: usize,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(true));
        let mut results = processor.results();
        let task = {
            let render = render.clone();
            let enabled = Arc::clone(&enabled);
            TaskHandle::spawn("processing-bridge", move |mut shutdown| async move {
                loop {
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.wait() => break,
                        result = results.recv() => result,
                    };
                    match result {
                        Ok(result) => {
                            // Checked on the rendering context so a paint can never
                            // land after the zero fill queued by a disable.
                            let enabled = Arc::clone(&enabled);
                            let counters = Arc::clone(&counters);
                            let painted = render.run_later(move |display| {
                                if enabled.load(Ordering::Acquire) {
                                    display.bands.paint(&result);
                                    PipelineCounters::bump(&counters.results_painted);
                                }
                            });
                            if painted.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Band display fell behind processed results");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };
        Self {
            render,
            enabled,
            band_count,
            task,
        }
    }

    /// Turns band painting on or off. Turning it off also zeroes the bars.
    pub fn set_display_enabled(&self, enabled: bool) -> AppResult<()> {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            let band_count = self.band_count;
            self.render
                .run_later(move |display| display.bands.fill_zero(band_count))?;
        }
        Ok(())
    }

    /// Whether results are painted.
    pub fn is_display_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Stops the bridge task.
    pub async fn stop(&mut self) {
        self.task.stop().await;
    }
}

/// Timed baseline capture.
///
/// While calculating, the capability folds every submitted window into a new
/// baseline; after `duration` the capture ends and the baseline applies.
pub struct BaselineCalibration {
    processor: Arc<dyn ProcessingCapability>,
    duration: Duration,
    calculating: Arc<AtomicBool>,
    task: Mutex<Option<TaskHandle>>,
}

impl BaselineCalibration {
    /// Creates an idle capture of `duration`.
    pub fn new(processor: Arc<dyn ProcessingCapability>, duration: Duration) -> Self {
        Self {
            processor,
            duration,
            calculating: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Starts a capture. Only one runs at a time and only while acquiring.
    ///
    /// # Errors
    /// `LabError::Processing` when not running or a capture is already in progress.
    pub fn calculate(&self, state: ConnectionState) -> AppResult<()> {
        if !state.is_running() {
            return Err(LabError::Processing(
                "baseline calculation needs a running connection".to_string(),
            ));
        }
        if self
            .calculating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LabError::Processing(
                "baseline calculation already in progress".to_string(),
            ));
        }

        info!(duration = ?self.duration, "Calculating baseline");
        self.processor.begin_baseline_calculation();

        let processor = Arc::clone(&self.processor);
        let calculating = Arc::clone(&self.calculating);
        let duration = self.duration;
        let handle = TaskHandle::spawn("baseline-calibration", move |mut shutdown| async move {
            tokio::select! {
                biased;
                _ = shutdown.wait() => warn!("Baseline calculation cut short"),
                _ = tokio::time::sleep(duration) => info!("Baseline calculation finished"),
            }
            processor.end_baseline_calculation();
            calculating.store(false, Ordering::Release);
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// True while a capture is collecting data.
    pub fn is_calculating(&self) -> bool {
        self.calculating.load(Ordering::Acquire)
    }

    /// Removes the current baseline.
    pub fn clear(&self) {
        info!("Clearing baseline");
        self.processor.reset_baseline();
    }

    /// Ends a running capture early, applying what was collected.
    pub async fn cancel(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            task.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::ScopeDisplay;
    use crate::mock::MockProcessor;
    use crate::render::RenderContext;

    #[tokio::test(start_paused = true)]
    async fn disable_wins_over_already_queued_paint() {
        let mock = Arc::new(MockProcessor::new(3));
        let processor: Arc<dyn ProcessingCapability> = mock.clone();
        let counters = Arc::new(PipelineCounters::default());
        let (mut context, render) = RenderContext::new(ScopeDisplay::new(10, 3));
        let mut bridge = ProcessingBridge::spawn(&processor, render, Arc::clone(&counters), 3);

        mock.publish(ProcessedResult::new(vec![0.0, 1.0, 2.0, 3.0]));
        // Let the bridge queue its paint before the disable arrives.
        tokio::time::sleep(Duration::from_millis(1)).await;
        bridge.set_display_enabled(false).unwrap();

        context.apply_pending();
        assert_eq!(context.display().bands.values(), &[0.0, 0.0, 0.0]);
        assert_eq!(counters.snapshot(0).results_painted, 0);
        bridge.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_capture_runs_once_at_a_time() {
        let mock = Arc::new(MockProcessor::new(3));
        let calibration = BaselineCalibration::new(mock.clone(), Duration::from_secs(10));

        assert!(calibration.calculate(ConnectionState::Stopped).is_err());
        calibration.calculate(ConnectionState::Running).unwrap();
        assert!(calibration.calculate(ConnectionState::Running).is_err());

        calibration.cancel().await;
        assert!(!calibration.is_calculating());
        assert_eq!(mock.baseline_calls(), (1, 1, 0));
    }
}
