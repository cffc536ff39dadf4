//! Custom error types for the application.
//!
//! This module defines the primary error type, `LabError`, for the whole pipeline.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur, from configuration problems to a
//! device dropping off mid-stream.
//!
//! ## Error Hierarchy
//!
//! - **`ConnectionUnavailable`**: a user-initiated start failed. Reported to the caller
//!   synchronously and surfaced once through the guarded error presentation. The
//!   connection stays STOPPED.
//! - **`ConnectionLost`**: the gateway reported an asynchronous failure
//!   (`ErrorStopped` / `ErrorUnbound`). Always stops acquisition first.
//! - **`QueueOverflow`**: the bounded sample queue refused a sample. A capacity-planning
//!   condition, counted and logged, never fatal.
//! - **`Read`** / **`Processing`**: failures local to a single tick. The tick is skipped.
//! - **`Configuration`** / **`Figment`**: semantic and parse errors in configuration.
//! - **`ControllerClosed`** / **`RenderClosed`**: the lifecycle controller or the
//!   rendering context has shut down.
//!
//! Only the first two are ever escalated to user-visible presentation, see
//! [`LabError::is_user_visible`].

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LabError>;

/// Every failure the pipeline reports.
#[derive(Error, Debug)]
pub enum LabError {
    /// A start request failed.
    #[error("Could not start connection '{name}': {reason}")]
    ConnectionUnavailable {
        /// Gateway name.
        name: String,
        /// Why the start failed.
        reason: String,
    },

    /// The gateway failed while running.
    #[error("Lost connection '{name}' ({kind})")]
    ConnectionLost {
        /// Gateway name.
        name: String,
        /// Failure event reported.
        kind: String,
    },

    /// The sample queue refused a sample.
    #[error("Sample queue full (capacity {capacity})")]
    QueueOverflow {
        /// Queue capacity.
        capacity: usize,
    },

    /// A single gateway poll failed.
    #[error("Sample read failed: {0}")]
    Read(String),

    /// Processing stage error or missing capability.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// A configuration value is out of range.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// The lifecycle controller has exited.
    #[error("Lifecycle controller is no longer running")]
    ControllerClosed,

    /// The rendering context has exited.
    #[error("Render context is no longer running")]
    RenderClosed,

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),
}

impl From<figment::Error> for LabError {
    fn from(err: figment::Error) -> Self {
        LabError::Figment(Box::new(err))
    }
}

impl LabError {
    /// Whether this error escalates to the guarded, user-visible error presentation.
    ///
    /// Tick-local failures and overflow are logged and counted instead.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            LabError::ConnectionUnavailable { .. } | LabError::ConnectionLost { .. }
        )
    }
}
