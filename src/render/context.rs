//! The single rendering context.
//!
//! [`RenderContext`] owns the [`ScopeDisplay`]. Other domains never touch the
//! display directly; they post jobs through a cloneable [`RenderHandle`] and the
//! context runs them in submission order.
//!
//! The context either runs headless as its own task ([`RenderContext::spawn`]) or
//! is driven by a host UI calling [`RenderContext::run_frame`] once per frame.
//! Either way every frame first applies pending jobs and then publishes a frame
//! number, which the render pump waits on.

use crate::display::ScopeDisplay;
use crate::error::{AppResult, LabError};
use crate::task::TaskHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

/// Work executed on the rendering context.
pub type RenderJob = Box<dyn FnOnce(&mut ScopeDisplay) + Send + 'static>;

/// Owner of the display. Not cloneable; exactly one exists per pipeline.
pub struct RenderContext {
    display: ScopeDisplay,
    jobs: mpsc::UnboundedReceiver<RenderJob>,
    frames: watch::Sender<u64>,
    frame: u64,
}

/// Cloneable submission side of a [`RenderContext`].
#[derive(Clone)]
pub struct RenderHandle {
    jobs: mpsc::UnboundedSender<RenderJob>,
    frames: watch::Receiver<u64>,
}

impl RenderContext {
    /// Creates a context owning `display` and its submission handle.
    pub fn new(display: ScopeDisplay) -> (Self, RenderHandle) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = watch::channel(0);
        let context = Self {
            display,
            jobs: job_rx,
            frames: frame_tx,
            frame: 0,
        };
        let handle = RenderHandle {
            jobs: job_tx,
            frames: frame_rx,
        };
        (context, handle)
    }

    /// Runs every job queued so far and returns how many ran.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(job) = self.jobs.try_recv() {
            job(&mut self.display);
            applied += 1;
        }
        applied
    }

    /// One frame: apply pending jobs, then signal the frame to waiters.
    pub fn run_frame(&mut self) -> u64 {
        let applied = self.apply_pending();
        self.frame += 1;
        self.frames.send_replace(self.frame);
        trace!(frame = self.frame, applied, "Frame rendered");
        self.frame
    }

    /// Read access for a host UI between frames.
    pub fn display(&self) -> &ScopeDisplay {
        &self.display
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Runs the context as a headless task with a fixed frame period.
    ///
    /// Jobs are applied as soon as they arrive; frames are signalled every
    /// `frame_period`.
    pub fn spawn(mut self, frame_period: Duration) -> TaskHandle {
        TaskHandle::spawn("render-context", move |mut shutdown| async move {
            let mut ticker = time::interval(frame_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    job = self.jobs.recv() => match job {
                        Some(job) => job(&mut self.display),
                        None => break,
                    },
                    _ = ticker.tick() => {
                        self.run_frame();
                    }
                }
            }
            debug!(frames = self.frame, "Render context exited");
        })
    }
}

impl RenderHandle {
    /// Queues `job` to run on the rendering context.
    ///
    /// # Errors
    /// `LabError::RenderClosed` once the context is gone.
    pub fn run_later<F>(&self, job: F) -> AppResult<()>
    where
        F: FnOnce(&mut ScopeDisplay) + Send + 'static,
    {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| LabError::RenderClosed)
    }

    /// Runs `read` on the rendering context and returns its output.
    ///
    /// Jobs queued before this call have run by the time it resolves.
    pub async fn query<R, F>(&self, read: F) -> AppResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ScopeDisplay) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run_later(move |display| {
            let _ = tx.send(read(display));
        })?;
        rx.await.map_err(|_| LabError::RenderClosed)
    }

    /// A frame-signal receiver with the current frame already marked as seen.
    pub fn frames(&self) -> watch::Receiver<u64> {
        let mut frames = self.frames.clone();
        frames.borrow_and_update();
        frames
    }
}
