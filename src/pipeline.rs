//! Pipeline assembly.
//!
//! ```text
//!   gateway ──tick──> SampleScheduler ──every window──> ProcessingCapability
//!                          │                                   │ results
//!                 1 of N windows                               v
//!                          v                            ProcessingBridge
//!                 BoundedSampleQueue                           │
//!                          │ drain per frame                   │
//!                          v                                   v
//!                     RenderPump ──paced run_later──> RenderContext (ScopeDisplay)
//! ```
//!
//! [`Pipeline`] owns one of each and exposes the user-facing operations. The
//! lifecycle controller runs the scheduler and pump; everything else lives for
//! the lifetime of the pipeline.

use crate::config::PipelineConfig;
use crate::controller::{
    ControllerDeps, ControllerHandle, ErrorPresenter, LifecycleController, LogPresenter,
};
use crate::core::ConnectionState;
use crate::data::sample_queue::BoundedSampleQueue;
use crate::display::{DisplaySnapshot, ScopeDisplay};
use crate::error::{AppResult, LabError};
use crate::gateway::ConnectionGateway;
use crate::processing::{BaselineCalibration, ProcessingBridge, ProcessingCapability};
use crate::render::{RenderContext, RenderHandle};
use crate::stats::{PipelineCounters, PipelineStats};
use crate::task::TaskHandle;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    presenter: Arc<dyn ErrorPresenter>,
    processor: Option<Arc<dyn ProcessingCapability>>,
}

impl PipelineBuilder {
    /// Starts a builder with the log presenter and no processor.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            presenter: Arc::new(LogPresenter),
            processor: None,
        }
    }

    /// Where user-visible errors are shown. Defaults to the log.
    pub fn presenter(mut self, presenter: Arc<dyn ErrorPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Processing stage fed by every tick.
    pub fn processor(mut self, processor: Arc<dyn ProcessingCapability>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Builds the pipeline with a headless render loop running at the
    /// configured frame period. Must be called inside a tokio runtime.
    pub fn build(self) -> AppResult<Pipeline> {
        let frame_period = self.config.frame_period;
        let (mut pipeline, context) = self.build_embedded()?;
        pipeline.render_task = Some(context.spawn(frame_period));
        Ok(pipeline)
    }

    /// Builds the pipeline and hands back the render context for a host UI to
    /// drive with [`RenderContext::run_frame`].
    pub fn build_embedded(self) -> AppResult<(Pipeline, RenderContext)> {
        self.config.validate()?;
        let config = self.config;

        let counters = Arc::new(PipelineCounters::default());
        let queue = Arc::new(BoundedSampleQueue::with_log_interval(
            config.queue_capacity,
            config.overflow_policy,
            config.overflow_log_every,
        ));
        let (context, render) =
            RenderContext::new(ScopeDisplay::new(config.window_width, config.band_count));

        let bridge = self.processor.as_ref().map(|processor| {
            ProcessingBridge::spawn(
                processor,
                render.clone(),
                Arc::clone(&counters),
                config.band_count,
            )
        });
        let baseline = self
            .processor
            .as_ref()
            .map(|processor| BaselineCalibration::new(Arc::clone(processor), config.baseline_duration));

        let controller = LifecycleController::spawn(ControllerDeps {
            config: config.clone(),
            queue: Arc::clone(&queue),
            render: render.clone(),
            processor: self.processor,
            presenter: self.presenter,
            counters: Arc::clone(&counters),
        });
        info!(
            tick = ?config.tick_period,
            downsample = config.downsample_factor,
            window = config.window_width,
            "Pipeline ready"
        );

        let pipeline = Pipeline {
            config,
            controller,
            render,
            render_task: None,
            bridge,
            baseline,
            queue,
            counters,
        };
        Ok((pipeline, context))
    }
}

/// A running acquisition pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    controller: ControllerHandle,
    render: RenderHandle,
    render_task: Option<TaskHandle>,
    bridge: Option<ProcessingBridge>,
    baseline: Option<BaselineCalibration>,
    queue: Arc<BoundedSampleQueue>,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    /// Starts building a pipeline.
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Validated configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle to the lifecycle controller.
    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    /// Handle to the rendering context.
    pub fn render_handle(&self) -> &RenderHandle {
        &self.render
    }

    /// Raw sample queue.
    pub fn queue(&self) -> &Arc<BoundedSampleQueue> {
        &self.queue
    }

    /// Replaces the connection. See [`ControllerHandle::attach`].
    pub async fn attach(&self, gateway: Arc<dyn ConnectionGateway>) -> AppResult<()> {
        self.controller.attach(gateway).await
    }

    /// Requests a start. See [`ControllerHandle::request_start`].
    pub async fn start(&self) -> AppResult<()> {
        self.controller.request_start().await
    }

    /// Stops the run. See [`ControllerHandle::request_stop`].
    pub async fn stop(&self) -> AppResult<()> {
        self.controller.request_stop().await
    }

    /// The start/stop control: starts when idle, stops when running.
    pub async fn toggle(&self) -> AppResult<()> {
        self.controller.toggle().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Text for the start/stop control in the current state.
    pub fn control_label(&self) -> &'static str {
        self.state().control_label()
    }

    /// Receiver that sees every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.controller.subscribe_state()
    }

    /// Enables or suppresses painting of processed results.
    ///
    /// # Errors
    /// `LabError::Processing` when no processing capability is configured.
    pub fn set_band_display(&self, enabled: bool) -> AppResult<()> {
        self.bridge
            .as_ref()
            .ok_or_else(no_processor)?
            .set_display_enabled(enabled)
    }

    /// Whether processed results are painted.
    pub fn band_display_enabled(&self) -> bool {
        self.bridge
            .as_ref()
            .is_some_and(ProcessingBridge::is_display_enabled)
    }

    /// Starts a timed baseline capture.
    pub fn calculate_baseline(&self) -> AppResult<()> {
        self.baseline
            .as_ref()
            .ok_or_else(no_processor)?
            .calculate(self.state())
    }

    /// True while a baseline capture runs.
    pub fn is_calculating_baseline(&self) -> bool {
        self.baseline
            .as_ref()
            .is_some_and(BaselineCalibration::is_calculating)
    }

    /// Drops the current baseline.
    pub fn clear_baseline(&self) -> AppResult<()> {
        self.baseline.as_ref().ok_or_else(no_processor)?.clear();
        Ok(())
    }

    /// Copy of what the display currently shows.
    pub async fn snapshot(&self) -> AppResult<DisplaySnapshot> {
        self.render.query(ScopeDisplay::snapshot).await
    }

    /// Counters so far.
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot(self.queue.dropped())
    }

    /// Stops acquisition and every background task.
    pub async fn shutdown(mut self) -> AppResult<PipelineStats> {
        match self.controller.shutdown().await {
            Ok(()) | Err(LabError::ControllerClosed) => {}
            Err(err) => return Err(err),
        }
        if let Some(baseline) = &self.baseline {
            baseline.cancel().await;
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.stop().await;
        }
        if let Some(mut task) = self.render_task.take() {
            task.stop().await;
        }
        let stats = self.stats();
        info!(?stats, "Pipeline shut down");
        Ok(stats)
    }
}

fn no_processor() -> LabError {
    LabError::Processing("no processing capability configured".to_string())
}
