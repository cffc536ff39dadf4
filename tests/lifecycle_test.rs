//! Integration tests for the connection lifecycle: start/stop hooks, error
//! presentation gating and connection replacement.
//!
//! Every test drives a full [`Pipeline`] against [`MockGateway`] on a paused clock.

use async_trait::async_trait;
use signal_lab::config::PipelineConfig;
use signal_lab::controller::{ErrorNotice, ErrorPresenter, NoticeKind};
use signal_lab::core::{ConnectionEvent, ConnectionState};
use signal_lab::error::LabError;
use signal_lab::mock::{MockGateway, MockProcessor};
use signal_lab::Pipeline;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const TICK: Duration = Duration::from_millis(250);

/// Records notices and keeps each one "on screen" for `hold`.
struct RecordingPresenter {
    notices: Mutex<Vec<ErrorNotice>>,
    hold: Duration,
}

impl RecordingPresenter {
    fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            notices: Mutex::new(Vec::new()),
            hold,
        })
    }

    fn notices(&self) -> Vec<ErrorNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorPresenter for RecordingPresenter {
    async fn present(&self, notice: ErrorNotice) {
        self.notices.lock().unwrap().push(notice);
        sleep(self.hold).await;
    }
}

struct Fixture {
    pipeline: Pipeline,
    gateway: Arc<MockGateway>,
    presenter: Arc<RecordingPresenter>,
    processor: Arc<MockProcessor>,
}

async fn fixture(window_len: usize) -> Fixture {
    let presenter = RecordingPresenter::new(Duration::from_secs(30));
    let processor = Arc::new(MockProcessor::new(40));
    let pipeline = Pipeline::builder(PipelineConfig::default())
        .presenter(presenter.clone())
        .processor(processor.clone())
        .build()
        .unwrap();
    let gateway = Arc::new(MockGateway::new("headband").with_window_len(window_len));
    pipeline.attach(gateway.clone()).await.unwrap();
    Fixture {
        pipeline,
        gateway,
        presenter,
        processor,
    }
}

async fn wait_for_state(pipeline: &Pipeline, target: ConnectionState) {
    let mut state = pipeline.subscribe_state();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == target))
        .await
        .expect("state not reached in time")
        .expect("controller gone");
}

#[tokio::test(start_paused = true)]
async fn test_three_ticks_then_stop_zero_fills_display() {
    let f = fixture(10).await;
    assert_eq!(f.pipeline.control_label(), "Start");

    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    assert_eq!(f.pipeline.control_label(), "Stop");

    sleep(TICK * 3 + Duration::from_millis(100)).await;

    let stats = f.pipeline.stats();
    assert_eq!(stats.windows_processed, 3);
    // Only the first of the three ticks reaches the raw display.
    assert_eq!(stats.samples_forwarded, 10);
    let snapshot = f.pipeline.snapshot().await.unwrap();
    assert_eq!(snapshot.raw.len(), 10);
    assert_eq!(f.processor.submitted(), 3);

    f.pipeline.stop().await.unwrap();
    assert_eq!(f.pipeline.state(), ConnectionState::Stopped);
    let reads = f.gateway.read_count();

    sleep(Duration::from_millis(100)).await;
    let snapshot = f.pipeline.snapshot().await.unwrap();
    assert_eq!(snapshot.raw.len(), 100);
    assert!(snapshot.raw.iter().all(|p| p.value == 0.0));
    assert_eq!(snapshot.bands, vec![0.0; 40]);

    sleep(TICK * 4).await;
    assert_eq!(f.gateway.read_count(), reads);
    assert!(f.presenter.notices().is_empty());

    f.pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_error_stop_halts_ticks_and_presents_once() {
    let f = fixture(50).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    sleep(TICK + Duration::from_millis(100)).await;
    assert_eq!(f.pipeline.snapshot().await.unwrap().raw.len(), 50);

    f.gateway.fail(ConnectionEvent::ErrorStopped);
    wait_for_state(&f.pipeline, ConnectionState::Errored).await;
    let reads = f.gateway.read_count();

    sleep(Duration::from_secs(2)).await;
    assert_eq!(f.gateway.read_count(), reads);

    let notices = f.presenter.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Lost);
    assert_eq!(notices[0].title, "Device Unavailable");
    assert_eq!(
        notices[0].message,
        "Lost connection to the headband. Reset the connection and try again."
    );

    let snapshot = f.pipeline.snapshot().await.unwrap();
    assert!(snapshot.raw.iter().all(|p| p.value == 0.0));
    assert_eq!(f.pipeline.control_label(), "Start");
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_errors_present_once() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    f.gateway.fail(ConnectionEvent::ErrorStopped);
    f.gateway.fail(ConnectionEvent::ErrorUnbound);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(f.presenter.notices().len(), 1);
    assert!(f.pipeline.controller().error_showing());
    let stats = f.pipeline.stats();
    assert_eq!(stats.errors_presented, 1);
    assert_eq!(stats.errors_suppressed, 1);

    // Once dismissed, the next failure is shown again.
    sleep(Duration::from_secs(31)).await;
    assert!(!f.pipeline.controller().error_showing());
    f.gateway.fail(ConnectionEvent::ErrorUnbound);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(f.presenter.notices().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_reports_unavailable() {
    let f = fixture(10).await;
    f.gateway.set_fail_start(true);

    let err = f.pipeline.start().await.unwrap_err();
    assert!(matches!(err, LabError::ConnectionUnavailable { .. }));
    assert_eq!(f.pipeline.state(), ConnectionState::Stopped);

    sleep(Duration::from_millis(10)).await;
    let notices = f.presenter.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Unavailable);
    assert_eq!(
        notices[0].message,
        "Could not connect to the headband. Set/reset the connection and try again."
    );

    // The user fixes the device and retries.
    f.gateway.set_fail_start(false);
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_without_connection_is_unavailable() {
    let presenter = RecordingPresenter::new(Duration::from_secs(1));
    let pipeline = Pipeline::builder(PipelineConfig::default())
        .presenter(presenter.clone())
        .build()
        .unwrap();

    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(err, LabError::ConnectionUnavailable { .. }));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(presenter.notices().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_errored_connection_can_restart() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    f.gateway.fail(ConnectionEvent::ErrorStopped);
    wait_for_state(&f.pipeline, ConnectionState::Errored).await;

    // A start event alone does not leave the error state.
    f.gateway.emit(ConnectionEvent::Started);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(f.pipeline.state(), ConnectionState::Errored);

    f.pipeline.toggle().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
}

#[tokio::test(start_paused = true)]
async fn test_bound_and_unbound_are_ignored() {
    let f = fixture(10).await;
    f.gateway.emit(ConnectionEvent::Bound);
    f.gateway.emit(ConnectionEvent::Unbound);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(f.pipeline.state(), ConnectionState::Disconnected);
    assert!(f.presenter.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_replaced_connection_is_ignored() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    let replacement = Arc::new(MockGateway::new("replacement").with_window_len(4));
    f.pipeline.attach(replacement.clone()).await.unwrap();
    assert_eq!(f.pipeline.state(), ConnectionState::Disconnected);
    let old_reads = f.gateway.read_count();

    // The old device keeps talking; nobody listens any more.
    f.gateway.fail(ConnectionEvent::ErrorStopped);
    f.gateway.emit(ConnectionEvent::Started);
    sleep(TICK * 4).await;
    assert_eq!(f.pipeline.state(), ConnectionState::Disconnected);
    assert!(f.presenter.notices().is_empty());
    assert_eq!(f.gateway.read_count(), old_reads);

    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    sleep(TICK + Duration::from_millis(100)).await;
    assert_eq!(replacement.read_count(), 1);
    assert_eq!(f.gateway.read_count(), old_reads);
}

#[tokio::test(start_paused = true)]
async fn test_quick_restart_skips_stale_clear() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    sleep(TICK + Duration::from_millis(100)).await;

    f.pipeline.stop().await.unwrap();
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    // Past the settle delay but before the first tick of the new run.
    sleep(Duration::from_millis(100)).await;
    let snapshot = f.pipeline.snapshot().await.unwrap();
    assert!(snapshot.raw.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_clears_previous_run() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    sleep(TICK + Duration::from_millis(100)).await;
    f.pipeline.stop().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(f.pipeline.snapshot().await.unwrap().raw.len(), 100);

    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    sleep(TICK + Duration::from_millis(100)).await;

    let snapshot = f.pipeline.snapshot().await.unwrap();
    assert_eq!(snapshot.raw.len(), 10);
    assert_eq!(snapshot.raw[0].position, 0);
    assert!(f.pipeline.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_baseline_calculation_needs_running_connection() {
    let f = fixture(10).await;
    assert!(matches!(
        f.pipeline.calculate_baseline(),
        Err(LabError::Processing(_))
    ));

    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    f.pipeline.calculate_baseline().unwrap();
    assert!(f.pipeline.is_calculating_baseline());
    assert!(f.pipeline.calculate_baseline().is_err());
    assert_eq!(f.processor.baseline_calls(), (1, 0, 0));

    sleep(Duration::from_secs(10) + Duration::from_millis(10)).await;
    assert!(!f.pipeline.is_calculating_baseline());
    assert_eq!(f.processor.baseline_calls(), (1, 1, 0));

    f.pipeline.clear_baseline().unwrap();
    assert_eq!(f.processor.baseline_calls(), (1, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_gateway_stop_event_ends_the_run() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;
    sleep(TICK * 3 + Duration::from_millis(100)).await;
    assert_eq!(f.pipeline.snapshot().await.unwrap().raw.len(), 10);

    f.gateway.emit(ConnectionEvent::Stopped);
    wait_for_state(&f.pipeline, ConnectionState::Stopped).await;
    assert_eq!(f.pipeline.control_label(), "Start");
    let reads = f.gateway.read_count();

    sleep(Duration::from_millis(100)).await;
    let snapshot = f.pipeline.snapshot().await.unwrap();
    assert_eq!(snapshot.raw.len(), 100);
    assert!(snapshot.raw.iter().all(|p| p.value == 0.0));

    sleep(TICK * 4).await;
    assert_eq!(f.gateway.read_count(), reads);
    assert!(f.presenter.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_suppressed_bands_keep_feeding_processing() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    f.pipeline.set_band_display(false).unwrap();
    let submitted = f.processor.submitted();
    let painted = f.pipeline.stats().results_painted;

    sleep(TICK * 4 + Duration::from_millis(100)).await;
    assert_eq!(f.processor.submitted(), submitted + 4);
    assert_eq!(f.pipeline.stats().windows_processed, 4);
    assert_eq!(f.pipeline.stats().results_painted, painted);
    assert_eq!(f.pipeline.snapshot().await.unwrap().bands, vec![0.0; 40]);
}

#[tokio::test(start_paused = true)]
async fn test_lost_disconnect_found_after_missed_events() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    // Overrun the event channel so the forwarder lags, then drop the device
    // without an event of its own.
    for _ in 0..100 {
        f.gateway.emit(ConnectionEvent::Bound);
    }
    f.gateway.set_connected(false);

    wait_for_state(&f.pipeline, ConnectionState::Errored).await;
    sleep(Duration::from_millis(100)).await;
    let notices = f.presenter.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Lost);
}

#[tokio::test(start_paused = true)]
async fn test_missed_events_on_live_connection_keep_running() {
    let f = fixture(10).await;
    f.pipeline.start().await.unwrap();
    wait_for_state(&f.pipeline, ConnectionState::Running).await;

    for _ in 0..100 {
        f.gateway.emit(ConnectionEvent::Bound);
    }
    sleep(TICK + Duration::from_millis(100)).await;

    assert!(f.pipeline.state().is_running());
    assert_eq!(f.pipeline.stats().windows_processed, 1);
    assert!(f.presenter.notices().is_empty());
}
