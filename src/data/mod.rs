//! Sample buffering and signal processing.

pub mod fft;
pub mod sample_queue;
