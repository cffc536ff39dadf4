//! # Signal Lab Core Library
//!
//! Near-real-time acquisition, buffering and display pacing for live biosignal
//! streams. A device connection is polled on a fixed tick; raw samples are
//! downsampled into a bounded queue and paced onto a scrolling display, while
//! every window is also handed to a processing stage whose results paint a band
//! display.
//!
//! ## Crate Structure
//!
//! - **`core`**: shared data types (`SampleWindow`, `ConnectionEvent`, `ConnectionState`).
//! - **`gateway`**: the `ConnectionGateway` capability a device implements.
//! - **`data`**: the bounded sample queue and the FFT band-power processor.
//! - **`scheduler`**: the periodic acquisition tick with downsampling.
//! - **`render`**: the single rendering context and the paced render pump.
//! - **`display`**: sliding-window and band-power display sinks.
//! - **`processing`**: the processing capability, its display bridge and baseline calibration.
//! - **`controller`**: the lifecycle controller actor and guarded error presentation.
//! - **`pipeline`**: assembly of all of the above.
//! - **`config`**, **`error`**, **`tracing_setup`**, **`stats`**, **`task`**: ambient infrastructure.
//! - **`mock`**: simulated gateway and processor for running without hardware.

pub mod config;
pub mod controller;
pub mod core;
pub mod data;
pub mod display;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod scheduler;
pub mod stats;
pub mod task;
pub mod tracing_setup;

pub use config::LabConfig;
pub use error::{AppResult, LabError};
pub use pipeline::{Pipeline, PipelineBuilder};
