//! Mock Gateway and Processor
//!
//! Simulated implementations for running the pipeline without a device.
//! All delays use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! # Available Mocks
//!
//! - `MockGateway` - sine-plus-noise signal source with scriptable failures
//! - `MockProcessor` - records submissions and echoes cheap per-window statistics
//!
//! # Example
//!
//! ```
//! use signal_lab::gateway::ConnectionGateway;
//! use signal_lab::mock::MockGateway;
//!
//! # tokio_test::block_on(async {
//! let gateway = MockGateway::new("Mock headband").with_window_len(64);
//! gateway.start().await?;
//! let window = gateway.current_window().await?;
//! assert_eq!(window.len(), 64);
//! # Ok::<(), signal_lab::error::LabError>(())
//! # }).unwrap();
//! ```

use crate::core::{ConnectionEvent, ProcessedResult, SampleWindow};
use crate::error::{AppResult, LabError};
use crate::gateway::ConnectionGateway;
use crate::processing::ProcessingCapability;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockGateway - Simulated Device Connection
// =============================================================================

struct SignalGenerator {
    sample_rate: f64,
    tones: Vec<(f64, f64)>,
    noise: f64,
    index: u64,
    rng: StdRng,
}

impl SignalGenerator {
    fn next_window(&mut self, channels: usize, len: usize) -> Vec<Vec<f64>> {
        let mut data = vec![Vec::with_capacity(len); channels];
        for _ in 0..len {
            let t = self.index as f64 / self.sample_rate;
            self.index += 1;
            let clean: f64 = self
                .tones
                .iter()
                .map(|&(freq, amp)| amp * (2.0 * PI * freq * t).sin())
                .sum();
            for (ch, samples) in data.iter_mut().enumerate() {
                let jitter = self.rng.gen_range(-self.noise..=self.noise);
                // Channels share the signal with a per-channel gain.
                samples.push(clean * (1.0 + 0.1 * ch as f64) + jitter);
            }
        }
        data
    }
}

/// Mock device connection.
///
/// Simulates:
/// - a multi-channel signal (10 Hz and 20 Hz tones plus uniform noise)
/// - `Started`/`Stopped` events on start and stop
/// - failing starts, failing or slow reads and injected error events
/// - scripted windows returned ahead of the generated signal
pub struct MockGateway {
    name: String,
    channels: usize,
    window_len: usize,
    connected: AtomicBool,
    running: AtomicBool,
    fail_start: AtomicBool,
    failing_reads: AtomicU32,
    read_delay: Mutex<Duration>,
    reads: AtomicU64,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    scripted: Mutex<VecDeque<SampleWindow>>,
    generator: Mutex<SignalGenerator>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MockGateway {
    /// Connected, idle mock producing one channel of 64 samples per read at 256 Hz.
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            channels: 1,
            window_len: 64,
            connected: AtomicBool::new(true),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            failing_reads: AtomicU32::new(0),
            read_delay: Mutex::new(Duration::ZERO),
            reads: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            scripted: Mutex::new(VecDeque::new()),
            generator: Mutex::new(SignalGenerator {
                sample_rate: 256.0,
                tones: vec![(10.0, 1.0), (20.0, 0.5)],
                noise: 0.05,
                index: 0,
                rng: StdRng::seed_from_u64(0x5eed),
            }),
            events,
        }
    }

    /// Number of channels per window.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Samples per channel in each window.
    pub fn with_window_len(mut self, window_len: usize) -> Self {
        self.window_len = window_len;
        self
    }

    /// Sample rate of the generated tones.
    pub fn with_sample_rate(self, sample_rate: f64) -> Self {
        lock(&self.generator).sample_rate = sample_rate;
        self
    }

    /// Fixed RNG seed for reproducible noise.
    pub fn with_seed(self, seed: u64) -> Self {
        lock(&self.generator).rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Makes the next `start` calls fail until cleared.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Delays every read, simulating a slow transport.
    pub fn set_read_delay(&self, delay: Duration) {
        *lock(&self.read_delay) = delay;
    }

    /// Sets what `is_connected` reports, without emitting an event.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queues a window to be returned by a later read, ahead of generated data.
    pub fn push_window(&self, window: SampleWindow) {
        lock(&self.scripted).push_back(window);
    }

    /// Broadcasts an arbitrary lifecycle event.
    pub fn emit(&self, event: ConnectionEvent) {
        debug!(gateway = %self.name, %event, "MockGateway: emitting event");
        // No subscriber simply means nobody is attached.
        let _ = self.events.send(event);
    }

    /// Simulates the device dropping off mid-stream.
    pub fn fail(&self, event: ConnectionEvent) {
        self.running.store(false, Ordering::SeqCst);
        self.emit(event);
    }

    /// True between a successful start and a stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Total `current_window` calls so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Most reads ever in progress at the same time.
    pub fn max_concurrent_reads(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionGateway for MockGateway {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn start(&self) -> AppResult<()> {
        if self.fail_start.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(LabError::ConnectionUnavailable {
                name: self.name.clone(),
                reason: "mock device refused to start".to_string(),
            });
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(gateway = %self.name, "MockGateway: started");
            self.emit(ConnectionEvent::Started);
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(gateway = %self.name, "MockGateway: stopped");
            self.emit(ConnectionEvent::Stopped);
        }
    }

    async fn current_window(&self) -> AppResult<SampleWindow> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let delay = *lock(&self.read_delay);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(LabError::Read(format!("{}: simulated read failure", self.name)));
        }

        if let Some(window) = lock(&self.scripted).pop_front() {
            return Ok(window);
        }
        if !self.is_running() {
            return Ok(SampleWindow::empty());
        }
        let data = lock(&self.generator).next_window(self.channels, self.window_len);
        Ok(SampleWindow::new(data))
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// MockProcessor - Simulated Processing Capability
// =============================================================================

/// Mock processing capability.
///
/// Emits one result per submitted window, synchronously:
/// `[mean, s0, s1, ...]` where `s_i` are the primary channel's first samples,
/// padded with zeros to `band_count` entries. Baseline calls are only counted.
pub struct MockProcessor {
    band_count: usize,
    submitted: AtomicU64,
    baseline_begins: AtomicU64,
    baseline_ends: AtomicU64,
    baseline_resets: AtomicU64,
    results: broadcast::Sender<ProcessedResult>,
}

impl MockProcessor {
    /// Creates a processor emitting `band_count` bands plus DC.
    pub fn new(band_count: usize) -> Self {
        let (results, _) = broadcast::channel(256);
        Self {
            band_count,
            submitted: AtomicU64::new(0),
            baseline_begins: AtomicU64::new(0),
            baseline_ends: AtomicU64::new(0),
            baseline_resets: AtomicU64::new(0),
            results,
        }
    }

    /// Windows submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    /// `(begins, ends, resets)` of baseline calls.
    pub fn baseline_calls(&self) -> (u64, u64, u64) {
        (
            self.baseline_begins.load(Ordering::SeqCst),
            self.baseline_ends.load(Ordering::SeqCst),
            self.baseline_resets.load(Ordering::SeqCst),
        )
    }

    /// Emits `result` as if it had been computed.
    pub fn publish(&self, result: ProcessedResult) {
        let _ = self.results.send(result);
    }
}

impl ProcessingCapability for MockProcessor {
    fn submit(&self, window: SampleWindow) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let samples = window.primary();
        let mean = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };
        let mut values = Vec::with_capacity(self.band_count + 1);
        values.push(mean);
        values.extend(samples.iter().copied().take(self.band_count));
        values.resize(self.band_count + 1, 0.0);
        self.publish(ProcessedResult::new(values));
    }

    fn results(&self) -> broadcast::Receiver<ProcessedResult> {
        self.results.subscribe()
    }

    fn reset_baseline(&self) {
        self.baseline_resets.fetch_add(1, Ordering::SeqCst);
    }

    fn begin_baseline_calculation(&self) {
        self.baseline_begins.fetch_add(1, Ordering::SeqCst);
    }

    fn end_baseline_calculation(&self) {
        self.baseline_ends.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_stop_emit_events_once() {
        let gateway = MockGateway::new("mock");
        let mut events = gateway.events();

        gateway.start().await.unwrap();
        gateway.start().await.unwrap();
        gateway.stop().await;
        gateway.stop().await;

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Started);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Stopped);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn idle_gateway_reads_empty_windows() {
        let gateway = MockGateway::new("mock");
        assert!(gateway.current_window().await.unwrap().is_empty());
        assert_eq!(gateway.read_count(), 1);
    }

    #[tokio::test]
    async fn running_gateway_generates_all_channels() {
        let gateway = MockGateway::new("mock").with_channels(3).with_window_len(32);
        gateway.start().await.unwrap();
        let window = gateway.current_window().await.unwrap();
        assert_eq!(window.channels().len(), 3);
        assert_eq!(window.len(), 32);
        assert!(window.primary().iter().all(|v| v.abs() < 2.0));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let gateway = MockGateway::new("mock");
        gateway.fail_next_reads(1);
        gateway.push_window(SampleWindow::single(vec![1.0]));

        assert!(matches!(gateway.current_window().await, Err(LabError::Read(_))));
        assert_eq!(gateway.current_window().await.unwrap().primary(), &[1.0]);

        gateway.set_fail_start(true);
        assert!(matches!(
            gateway.start().await,
            Err(LabError::ConnectionUnavailable { .. })
        ));
    }

    #[test]
    fn mock_processor_skips_nothing_and_pads() {
        let processor = MockProcessor::new(4);
        let mut results = processor.results();
        processor.submit(SampleWindow::single(vec![2.0, 4.0]));
        let result = results.try_recv().unwrap();
        assert_eq!(result.values, vec![3.0, 2.0, 4.0, 0.0, 0.0]);
        assert_eq!(processor.submitted(), 1);
    }
}
