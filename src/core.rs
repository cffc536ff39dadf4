//! Core data types shared by every stage of the pipeline.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One batch of readings produced by a single poll of the gateway.
///
/// Laid out `channels x samples`. The raw display path only looks at the
/// primary channel (index 0). Cloning is cheap and the readings are never
/// mutated after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    channels: Arc<Vec<Vec<f64>>>,
    captured_at: DateTime<Utc>,
}

impl SampleWindow {
    /// Creates a window from per-channel readings.
    pub fn new(channels: Vec<Vec<f64>>) -> Self {
        Self {
            channels: Arc::new(channels),
            captured_at: Utc::now(),
        }
    }

    /// Creates a single-channel window.
    pub fn single(samples: Vec<f64>) -> Self {
        Self::new(vec![samples])
    }

    /// A window with no readings.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Readings of the primary channel, empty if there are no channels.
    pub fn primary(&self) -> &[f64] {
        self.channels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// All channels.
    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    /// Number of readings in the primary channel.
    pub fn len(&self) -> usize {
        self.primary().len()
    }

    /// True when the primary channel holds no readings.
    pub fn is_empty(&self) -> bool {
        self.primary().is_empty()
    }

    /// When the window was read from the gateway.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// A single point on the sliding display, `(position, value)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayPoint {
    /// X position on the display.
    pub position: u64,
    /// Sample value.
    pub value: f64,
}

impl DisplayPoint {
    /// Creates a point.
    pub fn new(position: u64, value: f64) -> Self {
        Self { position, value }
    }
}

/// Output of the external processing capability for one window.
///
/// Index 0 conventionally carries the DC bin, which the band display skips.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResult {
    /// Per-bin values, DC first.
    pub values: Vec<f64>,
}

impl ProcessedResult {
    /// Wraps processed values.
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Lifecycle notification pushed by a gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Transport bound, acquisition not yet running. Ignored by the controller.
    Bound,
    /// Acquisition running.
    Started,
    /// Acquisition stopped without error.
    Stopped,
    /// Transport released without error. Ignored by the controller.
    Unbound,
    /// Acquisition stopped because of a failure.
    ErrorStopped,
    /// Transport released because of a failure.
    ErrorUnbound,
}

impl ConnectionEvent {
    /// True for the two asynchronous failure kinds.
    pub fn is_error(self) -> bool {
        matches!(self, Self::ErrorStopped | Self::ErrorUnbound)
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Bound => "bound",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Unbound => "unbound",
            Self::ErrorStopped => "error stopped",
            Self::ErrorUnbound => "error unbound",
        };
        f.write_str(label)
    }
}

/// Connection lifecycle state. Written only by the lifecycle controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No gateway attached, or nothing started yet.
    #[default]
    Disconnected,
    /// A run is being set up.
    Starting,
    /// Samples are being acquired.
    Running,
    /// Last run stopped normally.
    Stopped,
    /// Last run ended with a gateway failure.
    Errored,
}

impl ConnectionState {
    /// Returns true while samples are being acquired.
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// States from which a `Started` event begins a new run.
    #[must_use]
    pub fn accepts_start(self) -> bool {
        matches!(self, Self::Disconnected | Self::Stopped)
    }

    /// Text of the start/stop toggle for this state.
    #[must_use]
    pub fn control_label(self) -> &'static str {
        if self.is_running() {
            "Stop"
        } else {
            "Start"
        }
    }

    /// Short status label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Starting => "Starting...",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Errored => "Error",
        }
    }
}
