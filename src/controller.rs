//! Connection lifecycle controller.
//!
//! The controller is an actor: one task owns the connection state, the attached
//! gateway, the scheduler and the render pump, and processes
//! [`ControllerCommand`]s strictly in arrival order. User requests come in
//! through a [`ControllerHandle`]; gateway events are relayed into the same
//! mailbox by a forwarder task, tagged with the attachment generation they
//! belong to.
//!
//! ## State machine
//!
//! ```text
//!  Disconnected/Stopped --Started--> Starting --pre-start--> Running
//!  Running --Stopped--> Stopped          (scheduler stopped, display cleared)
//!  any     --ErrorStopped/ErrorUnbound--> Errored (plus one error presentation)
//! ```
//!
//! The pre-start hook clears the sample queue and the sliding display. The
//! post-stop hook zero-fills both displays after a short settle delay, unless a
//! new run started in the meantime.
//!
//! ## Error presentation
//!
//! User-visible failures go through an [`ErrorGate`]: while one presentation is
//! showing, further ones are logged and dropped. Presentation runs on its own
//! task so the mailbox keeps draining while the user reads the message.

use crate::config::PipelineConfig;
use crate::core::{ConnectionEvent, ConnectionState};
use crate::data::sample_queue::BoundedSampleQueue;
use crate::display::DisplaySink;
use crate::error::{AppResult, LabError};
use crate::gateway::ConnectionGateway;
use crate::processing::ProcessingCapability;
use crate::render::{RenderHandle, RenderPump};
use crate::scheduler::SampleScheduler;
use crate::stats::PipelineCounters;
use crate::task::TaskHandle;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Title of every connection error presentation.
pub const ERROR_TITLE: &str = "Device Unavailable";

const MAILBOX_CAPACITY: usize = 64;

/// Which user-visible failure a notice reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A user-initiated start failed.
    Unavailable,
    /// The gateway reported an asynchronous failure.
    Lost,
}

/// Content of one error presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    /// Which failure this notice reports.
    pub kind: NoticeKind,
    /// Dialog title.
    pub title: String,
    /// User-facing text.
    pub message: String,
    /// Underlying error text, if any.
    pub detail: Option<String>,
}

impl ErrorNotice {
    /// Notice for a start the gateway refused.
    pub fn unavailable(gateway: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Unavailable,
            title: ERROR_TITLE.to_string(),
            message: format!(
                "Could not connect to the {gateway}. Set/reset the connection and try again."
            ),
            detail: Some(detail.into()),
        }
    }

    /// Notice for a connection that failed mid-run.
    pub fn lost(gateway: &str, event: ConnectionEvent) -> Self {
        Self {
            kind: NoticeKind::Lost,
            title: ERROR_TITLE.to_string(),
            message: format!("Lost connection to the {gateway}. Reset the connection and try again."),
            detail: Some(event.to_string()),
        }
    }
}

/// Shows error notices to the user.
#[async_trait]
pub trait ErrorPresenter: Send + Sync {
    /// Shows `notice` and resolves once it was dismissed.
    async fn present(&self, notice: ErrorNotice);
}

/// Headless presenter that writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

#[async_trait]
impl ErrorPresenter for LogPresenter {
    async fn present(&self, notice: ErrorNotice) {
        error!(
            title = %notice.title,
            detail = notice.detail.as_deref().unwrap_or(""),
            "{}",
            notice.message
        );
    }
}

/// At-most-one gate for error presentations.
#[derive(Debug, Default)]
pub struct ErrorGate {
    showing: AtomicBool,
}

impl ErrorGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate. `None` while another presentation holds it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ErrorGateGuard> {
        self.showing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ErrorGateGuard {
                gate: Arc::clone(self),
            })
    }

    /// True while a presentation holds the gate.
    pub fn is_showing(&self) -> bool {
        self.showing.load(Ordering::Acquire)
    }
}

/// Holds the [`ErrorGate`] until dropped.
#[derive(Debug)]
pub struct ErrorGateGuard {
    gate: Arc<ErrorGate>,
}

impl Drop for ErrorGateGuard {
    fn drop(&mut self) {
        self.gate.showing.store(false, Ordering::Release);
    }
}

/// Messages processed by the controller actor.
pub enum ControllerCommand {
    /// Replace the current gateway.
    Attach {
        /// New gateway to follow.
        gateway: Arc<dyn ConnectionGateway>,
        /// Reply channel.
        response: oneshot::Sender<()>,
    },
    /// Drop the current gateway.
    Detach {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },
    /// Ask the gateway to start.
    Start {
        /// Reply channel.
        response: oneshot::Sender<AppResult<()>>,
    },
    /// Stop the gateway and the run.
    Stop {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },
    /// Relayed gateway event. Dropped if `generation` is not current.
    GatewayEvent {
        /// Attachment the event came from.
        generation: u64,
        /// The event itself.
        event: ConnectionEvent,
    },
    /// The forwarder missed events; re-check the gateway directly.
    EventsLagged {
        /// Attachment whose feed lagged.
        generation: u64,
        /// Number of events lost.
        missed: u64,
    },
    /// Detach and exit the actor.
    Shutdown {
        /// Reply channel.
        response: oneshot::Sender<()>,
    },
}

impl ControllerCommand {
    /// `Attach` command and its reply.
    pub fn attach(gateway: Arc<dyn ConnectionGateway>) -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Attach { gateway, response }, rx)
    }

    /// `Detach` command and its reply.
    pub fn detach() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Detach { response }, rx)
    }

    /// `Start` command and its reply.
    pub fn start() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (response, rx) = oneshot::channel();
        (Self::Start { response }, rx)
    }

    /// `Stop` command and its reply.
    pub fn stop() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Stop { response }, rx)
    }

    /// `Shutdown` command and its reply.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Shutdown { response }, rx)
    }
}

/// Everything the controller drives, supplied by the pipeline.
pub struct ControllerDeps {
    /// Timing and sizing.
    pub config: PipelineConfig,
    /// Raw sample queue shared with the pump.
    pub queue: Arc<BoundedSampleQueue>,
    /// Rendering context the display lives on.
    pub render: RenderHandle,
    /// Processing stage fed by every tick, if any.
    pub processor: Option<Arc<dyn ProcessingCapability>>,
    /// Where user-visible errors go.
    pub presenter: Arc<dyn ErrorPresenter>,
    /// Shared pipeline counters.
    pub counters: Arc<PipelineCounters>,
}

/// Cloneable front end of the controller actor.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    state: watch::Receiver<ConnectionState>,
    gate: Arc<ErrorGate>,
}

impl ControllerHandle {
    async fn send<T>(&self, (command, rx): (ControllerCommand, oneshot::Receiver<T>)) -> AppResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LabError::ControllerClosed)?;
        rx.await.map_err(|_| LabError::ControllerClosed)
    }

    /// Replaces the current gateway. Events from the old one are never acted on
    /// after this returns.
    pub async fn attach(&self, gateway: Arc<dyn ConnectionGateway>) -> AppResult<()> {
        self.send(ControllerCommand::attach(gateway)).await
    }

    /// Drops the current gateway and ends any run.
    pub async fn detach(&self) -> AppResult<()> {
        self.send(ControllerCommand::detach()).await
    }

    /// Asks the gateway to start. The run begins when it reports `Started`.
    ///
    /// # Errors
    /// `LabError::ConnectionUnavailable` if the gateway refused to start.
    pub async fn request_start(&self) -> AppResult<()> {
        self.send(ControllerCommand::start()).await?
    }

    /// Stops the gateway and the run. Returns once no tick can run any more.
    pub async fn request_stop(&self) -> AppResult<()> {
        self.send(ControllerCommand::stop()).await
    }

    /// Start when idle, stop when running.
    pub async fn toggle(&self) -> AppResult<()> {
        if self.state().is_running() {
            self.request_stop().await
        } else {
            self.request_start().await
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that sees every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// True while an error presentation is showing.
    pub fn error_showing(&self) -> bool {
        self.gate.is_showing()
    }

    /// Detaches the gateway and ends the actor.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.send(ControllerCommand::shutdown()).await
    }
}

/// The actor itself. Built and started with [`LifecycleController::spawn`].
pub struct LifecycleController {
    config: PipelineConfig,
    state: watch::Sender<ConnectionState>,
    queue: Arc<BoundedSampleQueue>,
    render: RenderHandle,
    processor: Option<Arc<dyn ProcessingCapability>>,
    presenter: Arc<dyn ErrorPresenter>,
    gate: Arc<ErrorGate>,
    counters: Arc<PipelineCounters>,
    pump: RenderPump,
    gateway: Option<Arc<dyn ConnectionGateway>>,
    scheduler: Option<SampleScheduler>,
    forwarder: Option<TaskHandle>,
    generation: u64,
    run_epoch: Arc<AtomicU64>,
    mailbox: mpsc::WeakSender<ControllerCommand>,
}

impl LifecycleController {
    /// Spawns the actor on the current runtime. It ends on `shutdown` or when
    /// every handle is dropped.
    pub fn spawn(deps: ControllerDeps) -> ControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let gate = Arc::new(ErrorGate::new());

        let pump = RenderPump::new(
            Arc::clone(&deps.queue),
            deps.render.clone(),
            Arc::clone(&deps.counters),
            deps.config.render_pacing,
        );
        let controller = Self {
            config: deps.config,
            state: state_tx,
            queue: deps.queue,
            render: deps.render,
            processor: deps.processor,
            presenter: deps.presenter,
            gate: Arc::clone(&gate),
            counters: deps.counters,
            pump,
            gateway: None,
            scheduler: None,
            forwarder: None,
            generation: 0,
            run_epoch: Arc::new(AtomicU64::new(0)),
            mailbox: command_tx.downgrade(),
        };
        tokio::spawn(controller.run(command_rx));

        ControllerHandle {
            commands: command_tx,
            state: state_rx,
            gate,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) {
        info!("Lifecycle controller started");
        while let Some(command) = commands.recv().await {
            match command {
                ControllerCommand::Attach { gateway, response } => {
                    self.attach(gateway).await;
                    let _ = response.send(());
                }
                ControllerCommand::Detach { response } => {
                    self.detach().await;
                    let _ = response.send(());
                }
                ControllerCommand::Start { response } => {
                    let result = self.request_start().await;
                    let _ = response.send(result);
                }
                ControllerCommand::Stop { response } => {
                    self.request_stop().await;
                    let _ = response.send(());
                }
                ControllerCommand::GatewayEvent { generation, event } => {
                    self.on_gateway_event(generation, event).await;
                }
                ControllerCommand::EventsLagged { generation, missed } => {
                    self.on_events_lagged(generation, missed).await;
                }
                ControllerCommand::Shutdown { response } => {
                    self.detach().await;
                    let _ = response.send(());
                    break;
                }
            }
        }
        self.detach().await;
        info!("Lifecycle controller stopped");
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = previous.label(), to = next.label(), "Connection state changed");
        }
    }

    fn gateway_name(&self) -> String {
        self.gateway
            .as_ref()
            .map_or_else(|| "device".to_string(), |g| g.name())
    }

    async fn attach(&mut self, gateway: Arc<dyn ConnectionGateway>) {
        self.detach().await;

        self.generation += 1;
        let events = gateway.events();
        self.forwarder = Some(self.spawn_forwarder(events, self.generation));
        self.scheduler = Some(
            SampleScheduler::new(
                Arc::clone(&gateway),
                Arc::clone(&self.queue),
                self.state.subscribe(),
                Arc::clone(&self.counters),
            )
            .with_processor(self.processor.clone())
            .with_period(self.config.tick_period)
            .with_downsample_factor(self.config.downsample_factor),
        );
        info!(gateway = %gateway.name(), generation = self.generation, "Connection attached");
        self.gateway = Some(gateway);
    }

    async fn detach(&mut self) {
        if let Some(mut forwarder) = self.forwarder.take() {
            forwarder.stop().await;
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        self.pump.stop().await;
        if let Some(gateway) = self.gateway.take() {
            info!(gateway = %gateway.name(), "Connection detached");
            self.generation += 1;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn spawn_forwarder(
        &self,
        mut events: broadcast::Receiver<ConnectionEvent>,
        generation: u64,
    ) -> TaskHandle {
        let mailbox = self.mailbox.clone();
        TaskHandle::spawn("event-forwarder", move |mut shutdown| async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    received = events.recv() => received,
                };
                let command = match received {
                    Ok(event) => ControllerCommand::GatewayEvent { generation, event },
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Gateway events missed");
                        ControllerCommand::EventsLagged { generation, missed }
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(mailbox) = mailbox.upgrade() else {
                    break;
                };
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    sent = mailbox.send(command) => if sent.is_err() { break },
                }
            }
            trace!(generation, "Event forwarder exited");
        })
    }

    async fn on_gateway_event(&mut self, generation: u64, event: ConnectionEvent) {
        if generation != self.generation {
            debug!(%event, generation, "Dropping event from a detached gateway");
            return;
        }
        let current = self.current_state();
        match event {
            ConnectionEvent::Started => {
                if current.accepts_start() {
                    self.begin_run();
                } else {
                    debug!(state = current.label(), "Ignoring start in this state");
                }
            }
            ConnectionEvent::Stopped => self.end_run(ConnectionState::Stopped).await,
            event if event.is_error() => {
                let name = self.gateway_name();
                let err = LabError::ConnectionLost {
                    name: name.clone(),
                    kind: event.to_string(),
                };
                warn!(error = %err, "Connection failed");
                self.end_run(ConnectionState::Errored).await;
                self.present(ErrorNotice::lost(&name, event));
            }
            _ => trace!(%event, "Ignoring gateway event"),
        }
    }

    /// A lost `Stopped` or error event cannot be recovered, so the gateway is
    /// asked directly. A run on a gateway that is no longer connected is ended
    /// as if it had reported `ErrorUnbound`.
    async fn on_events_lagged(&mut self, generation: u64, missed: u64) {
        if generation != self.generation {
            return;
        }
        let connected = self
            .gateway
            .as_ref()
            .is_some_and(|gateway| gateway.is_connected());
        debug!(missed, connected, "Re-checking gateway after missed events");
        if self.current_state().is_running() && !connected {
            self.on_gateway_event(generation, ConnectionEvent::ErrorUnbound)
                .await;
        }
    }

    fn begin_run(&mut self) {
        self.set_state(ConnectionState::Starting);

        self.queue.clear();
        self.run_epoch.fetch_add(1, Ordering::SeqCst);
        if self
            .render
            .run_later(|display| display.raw.clear())
            .is_err()
        {
            warn!("Render context closed, display not cleared");
        }

        self.set_state(ConnectionState::Running);
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.start();
        }
        self.pump.start();
        info!(gateway = %self.gateway_name(), "Acquisition running");
    }

    async fn end_run(&mut self, target: ConnectionState) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.stop().await;
        }
        self.pump.stop().await;
        let was_running = self.current_state().is_running();
        self.set_state(target);
        if was_running {
            info!(gateway = %self.gateway_name(), state = target.label(), "Acquisition ended");
        }
        self.schedule_display_clear();
    }

    fn schedule_display_clear(&self) {
        let epoch = self.run_epoch.load(Ordering::SeqCst);
        let run_epoch = Arc::clone(&self.run_epoch);
        let render = self.render.clone();
        let delay = self.config.clear_settle_delay;
        let width = self.config.window_width;
        let bands = self.config.band_count;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if run_epoch.load(Ordering::SeqCst) != epoch {
                debug!("New run started, skipping display clear");
                return;
            }
            let cleared = render.run_later(move |display| {
                display.raw.fill_zero(width);
                display.bands.fill_zero(bands);
            });
            if cleared.is_err() {
                debug!("Render context closed before display clear");
            }
        });
    }

    async fn request_start(&mut self) -> AppResult<()> {
        let Some(gateway) = self.gateway.clone() else {
            let reason = "no connection attached".to_string();
            warn!("Start requested without a connection");
            self.present(ErrorNotice::unavailable("device", reason.clone()));
            return Err(LabError::ConnectionUnavailable {
                name: "device".to_string(),
                reason,
            });
        };

        match self.current_state() {
            ConnectionState::Running | ConnectionState::Starting => {
                debug!("Start requested while already running");
                return Ok(());
            }
            ConnectionState::Errored => self.set_state(ConnectionState::Stopped),
            ConnectionState::Disconnected | ConnectionState::Stopped => {}
        }

        let name = gateway.name();
        match gateway.start().await {
            Ok(()) => {
                info!(gateway = %name, "Start requested");
                Ok(())
            }
            Err(err) => {
                error!(gateway = %name, error = %err, "Could not start connection");
                self.set_state(ConnectionState::Stopped);
                self.present(ErrorNotice::unavailable(&name, err.to_string()));
                Err(match err {
                    err if err.is_user_visible() => err,
                    other => LabError::ConnectionUnavailable {
                        name,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    async fn request_stop(&mut self) {
        let Some(gateway) = self.gateway.clone() else {
            debug!("Stop requested without a connection");
            return;
        };
        gateway.stop().await;
        self.end_run(ConnectionState::Stopped).await;
    }

    fn present(&self, notice: ErrorNotice) {
        match self.gate.try_acquire() {
            Some(guard) => {
                PipelineCounters::bump(&self.counters.errors_presented);
                let presenter = Arc::clone(&self.presenter);
                tokio::spawn(async move {
                    let _guard = guard;
                    presenter.present(notice).await;
                });
            }
            None => {
                PipelineCounters::bump(&self.counters.errors_suppressed);
                info!(message = %notice.message, "Error already showing, presentation suppressed");
            }
        }
    }
}
