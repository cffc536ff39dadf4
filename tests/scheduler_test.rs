//! Integration tests for the periodic acquisition scheduler.
//!
//! All tests run on a paused tokio clock, so tick counts are exact.

use signal_lab::core::{ConnectionState, SampleWindow};
use signal_lab::data::sample_queue::{BoundedSampleQueue, OverflowPolicy};
use signal_lab::gateway::ConnectionGateway;
use signal_lab::mock::{MockGateway, MockProcessor};
use signal_lab::processing::ProcessingCapability;
use signal_lab::scheduler::SampleScheduler;
use signal_lab::stats::PipelineCounters;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const TICK: Duration = Duration::from_millis(250);

struct Harness {
    gateway: Arc<MockGateway>,
    queue: Arc<BoundedSampleQueue>,
    counters: Arc<PipelineCounters>,
    state: watch::Sender<ConnectionState>,
    scheduler: SampleScheduler,
}

fn harness(gateway: MockGateway, processor: Option<Arc<dyn ProcessingCapability>>) -> Harness {
    let gateway = Arc::new(gateway);
    let queue = Arc::new(BoundedSampleQueue::new(10_000, OverflowPolicy::DropOldest));
    let counters = Arc::new(PipelineCounters::default());
    let (state, state_rx) = watch::channel(ConnectionState::Running);
    let scheduler = SampleScheduler::new(
        gateway.clone(),
        Arc::clone(&queue),
        state_rx,
        Arc::clone(&counters),
    )
    .with_processor(processor)
    .with_period(TICK)
    .with_downsample_factor(4);
    Harness {
        gateway,
        queue,
        counters,
        state,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn test_sixteen_ticks_forward_twenty_samples() {
    let processor = Arc::new(MockProcessor::new(8));
    let mut h = harness(
        MockGateway::new("test").with_window_len(5),
        Some(processor.clone()),
    );
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    sleep(TICK * 16 + Duration::from_millis(100)).await;
    h.scheduler.stop().await;

    assert_eq!(h.gateway.read_count(), 16);
    assert_eq!(h.queue.len(), 20);
    // Every window still reaches processing.
    assert_eq!(processor.submitted(), 16);

    let stats = h.counters.snapshot(h.queue.dropped());
    assert_eq!(stats.windows_forwarded, 4);
    assert_eq!(stats.samples_forwarded, 20);
    assert_eq!(stats.windows_processed, 16);
}

#[tokio::test(start_paused = true)]
async fn test_no_tick_runs_after_stop_returns() {
    let mut h = harness(MockGateway::new("test"), None);
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    sleep(TICK * 2 + Duration::from_millis(10)).await;
    h.scheduler.stop().await;
    assert!(!h.scheduler.is_running());

    let reads_at_stop = h.gateway.read_count();
    assert_eq!(reads_at_stop, 2);

    tokio::time::advance(TICK * 20).await;
    assert_eq!(h.gateway.read_count(), reads_at_stop);
}

#[tokio::test(start_paused = true)]
async fn test_start_then_immediate_stop_runs_nothing() {
    let mut h = harness(MockGateway::new("test"), None);
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    h.scheduler.stop().await;
    sleep(TICK * 10).await;

    assert_eq!(h.gateway.read_count(), 0);
    assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_reads_never_stack() {
    let mut h = harness(MockGateway::new("test"), None);
    h.gateway.set_read_delay(Duration::from_millis(600));
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    sleep(TICK * 12).await;
    h.scheduler.stop().await;

    assert_eq!(h.gateway.max_concurrent_reads(), 1);
    // 3 s of 600 ms reads fit at most five of them.
    assert!(h.gateway.read_count() <= 5, "reads: {}", h.gateway.read_count());
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_slow_read() {
    let mut h = harness(MockGateway::new("test"), None);
    h.gateway.set_read_delay(Duration::from_secs(5));
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    sleep(TICK + Duration::from_millis(10)).await;
    assert_eq!(h.gateway.read_count(), 1);

    h.scheduler.stop().await;
    sleep(Duration::from_secs(10)).await;
    // The interrupted read never reached the queue.
    assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_reads_are_skipped() {
    let mut h = harness(MockGateway::new("test").with_window_len(8), None);
    h.gateway.fail_next_reads(2);
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    sleep(TICK * 4 + Duration::from_millis(10)).await;
    h.scheduler.stop().await;

    let stats = h.counters.snapshot(0);
    assert_eq!(stats.read_failures, 2);
    // Failed reads do not advance downsampling, so the first good window is forwarded.
    assert_eq!(stats.windows_forwarded, 1);
    assert_eq!(h.queue.len(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_empty_windows_are_skipped() {
    let mut h = harness(MockGateway::new("test"), None);
    // Idle mock returns empty windows; scripted windows come first.
    h.gateway.push_window(SampleWindow::single(vec![1.0, 2.0]));

    h.scheduler.start();
    sleep(TICK * 3 + Duration::from_millis(10)).await;
    h.scheduler.stop().await;

    assert_eq!(h.gateway.read_count(), 3);
    assert_eq!(h.queue.drain_all(), vec![1.0, 2.0]);
    assert_eq!(h.counters.snapshot(0).ticks_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_run_or_disconnected_gateway_skips_reads() {
    let mut h = harness(MockGateway::new("test"), None);
    h.gateway.start().await.unwrap();
    h.state.send_replace(ConnectionState::Stopped);

    h.scheduler.start();
    sleep(TICK * 2 + Duration::from_millis(10)).await;
    assert_eq!(h.gateway.read_count(), 0);

    h.state.send_replace(ConnectionState::Running);
    h.gateway.set_connected(false);
    sleep(TICK * 2).await;
    assert_eq!(h.gateway.read_count(), 0);

    h.gateway.set_connected(true);
    sleep(TICK).await;
    h.scheduler.stop().await;
    assert_eq!(h.gateway.read_count(), 1);
    assert_eq!(h.counters.snapshot(0).ticks_skipped, 4);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resets_downsampling() {
    let mut h = harness(MockGateway::new("test").with_window_len(3), None);
    h.gateway.start().await.unwrap();

    h.scheduler.start();
    sleep(TICK * 2 + Duration::from_millis(10)).await;
    h.scheduler.stop().await;
    assert_eq!(h.queue.drain_all().len(), 3);

    // A new run forwards its first window again.
    h.scheduler.start();
    sleep(TICK + Duration::from_millis(10)).await;
    h.scheduler.stop().await;
    assert_eq!(h.queue.drain_all().len(), 3);
}
