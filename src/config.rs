//! Configuration System using Figment
//!
//! Strongly-typed configuration for the acquisition pipeline. Configuration is loaded from:
//! 1. `config/signal_lab.toml` (optional, every field has a default)
//! 2. Environment variables prefixed with `SIGNAL_LAB_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use signal_lab::config::LabConfig;
//!
//! let config = LabConfig::load()?;
//! println!("Tick period: {:?}", config.pipeline.tick_period);
//! # Ok::<(), signal_lab::error::LabError>(())
//! ```
//!
//! Durations use human-readable strings:
//!
//! ```toml
//! [pipeline]
//! tick_period = "250ms"
//! render_pacing = "100us"
//! baseline_duration = "10s"
//! ```

use crate::data::sample_queue::OverflowPolicy;
use crate::error::{AppResult, LabError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/signal_lab.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SIGNAL_LAB_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Acquisition, buffering and display pacing settings
    pub pipeline: PipelineConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Signal Lab".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Pipeline timing and capacity constants.
///
/// None of these are hard requirements of the algorithm; they are the knobs the
/// scheduler, queue, pump and sinks are built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Period of the acquisition tick
    #[serde(with = "humantime_serde")]
    pub tick_period: Duration,
    /// Forward raw samples from one tick out of every `downsample_factor`
    pub downsample_factor: u32,
    /// Capacity of the raw sample queue
    pub queue_capacity: usize,
    /// What the queue does when full
    pub overflow_policy: OverflowPolicy,
    /// Number of points kept by the sliding display window
    pub window_width: usize,
    /// Delay between consecutive value dispatches to the display
    #[serde(with = "humantime_serde")]
    pub render_pacing: Duration,
    /// Frame period of the headless rendering loop
    #[serde(with = "humantime_serde")]
    pub frame_period: Duration,
    /// Settle time before the post-stop display clear
    #[serde(with = "humantime_serde")]
    pub clear_settle_delay: Duration,
    /// How long a baseline calculation collects data
    #[serde(with = "humantime_serde")]
    pub baseline_duration: Duration,
    /// Number of processed-result bands shown
    pub band_count: usize,
    /// Sample rate of the primary channel, used by the band-power processor
    pub sample_rate_hz: f64,
    /// Log one overflow warning per this many dropped samples
    pub overflow_log_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(250),
            downsample_factor: 4,
            queue_capacity: 10_000,
            overflow_policy: OverflowPolicy::DropOldest,
            window_width: 100,
            render_pacing: Duration::from_micros(100),
            frame_period: Duration::from_millis(16),
            clear_settle_delay: Duration::from_millis(50),
            baseline_duration: Duration::from_secs(10),
            band_count: 40,
            sample_rate_hz: 256.0,
            overflow_log_every: 1000,
        }
    }
}

impl LabConfig {
    /// Load configuration from `config/signal_lab.toml` and environment variables
    ///
    /// Example override: `SIGNAL_LAB_PIPELINE__DOWNSAMPLE_FACTOR=8`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults fill every field.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: LabConfig = Figment::from(Serialized::defaults(LabConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.pipeline.validate()
    }
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let nonzero_durations = [
            ("tick_period", self.tick_period),
            ("frame_period", self.frame_period),
            ("baseline_duration", self.baseline_duration),
        ];
        for (name, value) in nonzero_durations {
            if value.is_zero() {
                return Err(LabError::Configuration(format!("{name} must be non-zero")));
            }
        }

        if self.downsample_factor == 0 {
            return Err(LabError::Configuration(
                "downsample_factor must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(LabError::Configuration(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.window_width == 0 {
            return Err(LabError::Configuration(
                "window_width must be at least 1".to_string(),
            ));
        }
        if self.band_count == 0 {
            return Err(LabError::Configuration(
                "band_count must be at least 1".to_string(),
            ));
        }
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(LabError::Configuration(format!(
                "sample_rate_hz must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        if self.overflow_log_every == 0 {
            return Err(LabError::Configuration(
                "overflow_log_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
