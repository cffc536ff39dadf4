//! Device connection capability.
//!
//! The transport, authentication and framing of a device live behind this trait.
//! The pipeline only needs to start and stop acquisition, poll the latest window
//! and follow the lifecycle event feed.
//!
//! # Contract
//! - `current_window` is polled from the periodic acquisition domain and may be slow;
//!   it must not be called concurrently by the pipeline, which never stacks ticks.
//! - `events` returns a fresh subscription every call. Dropping the receiver is the
//!   unsubscribe.
//! - Events are delivered in the order the device produced them.

use crate::core::{ConnectionEvent, SampleWindow};
use crate::error::AppResult;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// A device connection the pipeline can acquire from.
#[async_trait]
pub trait ConnectionGateway: Send + Sync {
    /// Human-readable device name used in diagnostics and error messages.
    fn name(&self) -> String;

    /// Whether the underlying transport currently has a device.
    fn is_connected(&self) -> bool;

    /// Begin acquisition.
    ///
    /// # Errors
    /// `LabError::ConnectionUnavailable` when the device cannot be started.
    async fn start(&self) -> AppResult<()>;

    /// Stop acquisition. Stopping an idle gateway is a no-op.
    async fn stop(&self);

    /// Latest window of readings. An empty window means "nothing new".
    ///
    /// # Errors
    /// `LabError::Read` for a failed poll. The caller skips the tick.
    async fn current_window(&self) -> AppResult<SampleWindow>;

    /// Subscribe to the lifecycle event feed.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;
}
