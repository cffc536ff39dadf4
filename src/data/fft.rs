//! FFT band-power processing.
//!
//! [`BandPowerProcessor`] is the stock [`ProcessingCapability`]: a worker task keeps
//! the most recent second of primary-channel samples, applies a Hann window, runs
//! a forward FFT and reports power per 1 Hz band. Band 0 is the DC bin.
//!
//! # Baseline
//!
//! While a baseline calculation is running every spectrum is also accumulated.
//! When it ends, the per-band mean becomes the baseline and is subtracted from
//! subsequent results until reset.

use crate::core::{ProcessedResult, SampleWindow};
use crate::processing::ProcessingCapability;
use num_complex::Complex;
use rustfft::FftPlanner;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace};

/// Windowed FFT reduced to fixed 1 Hz bands.
pub struct BandSpectrum {
    sample_rate: f64,
    fft_len: usize,
    band_count: usize,
    planner: FftPlanner<f64>,
    hann: HashMap<usize, Vec<f64>>,
}

impl BandSpectrum {
    /// Spectrum over one second of data at `sample_rate`, bands `0..=band_count`.
    pub fn new(sample_rate: f64, band_count: usize) -> Self {
        let fft_len = (sample_rate.round() as usize).max(2);
        Self {
            sample_rate,
            fft_len,
            band_count,
            planner: FftPlanner::new(),
            hann: HashMap::new(),
        }
    }

    /// Samples per transform.
    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    fn hann_window(&mut self, len: usize) -> &[f64] {
        self.hann.entry(len).or_insert_with(|| {
            if len < 2 {
                return vec![1.0; len];
            }
            (0..len)
                .map(|i| {
                    0.5 * (1.0
                        - (2.0 * std::f64::consts::PI * i as f64 / (len - 1) as f64).cos())
                })
                .collect()
        })
    }

    /// Band powers for `samples`, zero-padded to the transform length.
    ///
    /// Returns `band_count + 1` values; a band with no FFT bin reads 0.
    pub fn band_powers(&mut self, samples: &[f64]) -> Vec<f64> {
        let n = self.fft_len;
        let used = samples.len().min(n);
        let tail = &samples[samples.len() - used..];

        let window: Vec<f64> = self.hann_window(used).to_vec();
        let mut buffer: Vec<Complex<f64>> = tail
            .iter()
            .zip(window.iter())
            .map(|(&value, &w)| Complex::new(value * w, 0.0))
            .collect();
        buffer.resize(n, Complex::new(0.0, 0.0));

        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut buffer);

        let resolution = self.sample_rate / n as f64;
        let mut sums = vec![0.0; self.band_count + 1];
        let mut counts = vec![0usize; self.band_count + 1];
        for (i, bin) in buffer.iter().enumerate().take(n / 2 + 1) {
            let amplitude = if i == 0 {
                bin.norm() / n as f64
            } else {
                bin.norm() * 2.0 / n as f64
            };
            let band = (i as f64 * resolution).round() as usize;
            if band <= self.band_count {
                sums[band] += amplitude * amplitude;
                counts[band] += 1;
            }
        }
        sums.iter()
            .zip(counts)
            .map(|(&sum, count)| if count == 0 { 0.0 } else { sum / count as f64 })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Baseline {
    collecting: Option<(Vec<f64>, usize)>,
    applied: Option<Vec<f64>>,
}

impl Baseline {
    fn observe(&mut self, powers: &[f64]) {
        if let Some((sums, count)) = &mut self.collecting {
            if sums.is_empty() {
                sums.resize(powers.len(), 0.0);
            }
            for (sum, &p) in sums.iter_mut().zip(powers) {
                *sum += p;
            }
            *count += 1;
        }
    }

    fn adjust(&self, powers: &mut [f64]) {
        if let Some(baseline) = &self.applied {
            for (p, &b) in powers.iter_mut().zip(baseline) {
                *p -= b;
            }
        }
    }
}

/// Background FFT worker implementing [`ProcessingCapability`].
pub struct BandPowerProcessor {
    windows: mpsc::UnboundedSender<SampleWindow>,
    results: broadcast::Sender<ProcessedResult>,
    baseline: Arc<Mutex<Baseline>>,
}

impl BandPowerProcessor {
    /// Spawns the worker on the current runtime. It exits when the processor drops.
    pub fn spawn(sample_rate: f64, band_count: usize) -> Arc<Self> {
        let (window_tx, mut window_rx) = mpsc::unbounded_channel::<SampleWindow>();
        let (result_tx, _) = broadcast::channel(64);
        let baseline = Arc::new(Mutex::new(Baseline::default()));

        let mut spectrum = BandSpectrum::new(sample_rate, band_count);
        let results = result_tx.clone();
        let shared = Arc::clone(&baseline);
        tokio::spawn(async move {
            let capacity = spectrum.fft_len();
            let mut history: VecDeque<f64> = VecDeque::with_capacity(capacity);
            while let Some(window) = window_rx.recv().await {
                for &sample in window.primary() {
                    if history.len() == capacity {
                        history.pop_front();
                    }
                    history.push_back(sample);
                }
                let mut powers = spectrum.band_powers(history.make_contiguous());
                {
                    let mut baseline = lock(&shared);
                    baseline.observe(&powers);
                    baseline.adjust(&mut powers);
                }
                trace!(bands = powers.len(), "Spectrum computed");
                // No subscribers is fine; results are simply not shown.
                let _ = results.send(ProcessedResult::new(powers));
            }
            debug!("Band power worker exited");
        });

        Arc::new(Self {
            windows: window_tx,
            results: result_tx,
            baseline,
        })
    }

    /// Baseline currently subtracted from results, if any.
    pub fn baseline(&self) -> Option<Vec<f64>> {
        lock(&self.baseline).applied.clone()
    }
}

fn lock(baseline: &Mutex<Baseline>) -> MutexGuard<'_, Baseline> {
    baseline.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessingCapability for BandPowerProcessor {
    fn submit(&self, window: SampleWindow) {
        if self.windows.send(window).is_err() {
            debug!("Band power worker gone, window dropped");
        }
    }

    fn results(&self) -> broadcast::Receiver<ProcessedResult> {
        self.results.subscribe()
    }

    fn reset_baseline(&self) {
        let mut baseline = lock(&self.baseline);
        baseline.applied = None;
        baseline.collecting = None;
    }

    fn begin_baseline_calculation(&self) {
        lock(&self.baseline).collecting = Some((Vec::new(), 0));
    }

    fn end_baseline_calculation(&self) {
        let mut baseline = lock(&self.baseline);
        match baseline.collecting.take() {
            Some((sums, count)) if count > 0 => {
                let mean: Vec<f64> = sums.iter().map(|s| s / count as f64).collect();
                info!(spectra = count, "Baseline applied");
                baseline.applied = Some(mean);
            }
            _ => info!("Baseline calculation collected no data"),
        }
    }
}
