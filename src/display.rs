//! Display sinks.
//!
//! Sinks are plain data structures with no synchronization. They are owned by the
//! [`RenderContext`](crate::render::RenderContext) and only ever mutated from jobs
//! running on it.

use crate::core::{DisplayPoint, ProcessedResult};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

/// Something the rendering context can draw into.
pub trait DisplaySink: Send {
    /// Adds or sets the point at `position`.
    fn append(&mut self, position: u64, value: f64);

    /// Removes every point and resets positions.
    fn clear(&mut self);

    /// Shows `width` zero-valued points, reusing existing slots where possible.
    fn fill_zero(&mut self, width: usize);
}

/// Scrolling line display retaining the last `max_points` values.
///
/// The visible axis follows the newest position `x` as `[x - max_points, x]`.
#[derive(Debug, Clone)]
pub struct SlidingWindowSink {
    points: VecDeque<DisplayPoint>,
    max_points: usize,
    next_position: u64,
    axis: (f64, f64),
}

impl SlidingWindowSink {
    /// Creates an empty sink keeping at most `max_points` points.
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(1);
        let mut sink = Self {
            points: VecDeque::with_capacity(max_points + 1),
            max_points,
            next_position: 0,
            axis: (0.0, 0.0),
        };
        sink.update_axis();
        sink
    }

    /// Appends `value` at the next position and returns the point added.
    pub fn push(&mut self, value: f64) -> DisplayPoint {
        let position = self.next_position;
        self.append(position, value);
        DisplayPoint::new(position, value)
    }

    /// Visible points, oldest first.
    pub fn points(&self) -> impl ExactSizeIterator<Item = &DisplayPoint> + '_ {
        self.points.iter()
    }

    /// Visible values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Number of visible points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when nothing is shown.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Most points ever shown at once.
    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Position the next pushed value will take.
    pub fn next_position(&self) -> u64 {
        self.next_position
    }

    /// Visible `(lower, upper)` bounds of the x axis.
    pub fn axis_range(&self) -> (f64, f64) {
        self.axis
    }

    fn update_axis(&mut self) {
        let upper = self.next_position as f64;
        self.axis = (upper - self.max_points as f64, upper);
    }
}

impl DisplaySink for SlidingWindowSink {
    fn append(&mut self, position: u64, value: f64) {
        self.points.push_back(DisplayPoint::new(position, value));
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
        self.next_position = position + 1;
        self.update_axis();
    }

    fn clear(&mut self) {
        self.points.clear();
        self.next_position = 0;
        self.update_axis();
    }

    fn fill_zero(&mut self, width: usize) {
        let width = width.min(self.max_points);
        if self.points.len() == width {
            for point in &mut self.points {
                point.value = 0.0;
            }
            return;
        }
        self.points.clear();
        self.points
            .extend((0..width as u64).map(|position| DisplayPoint::new(position, 0.0)));
        self.next_position = width as u64;
        self.update_axis();
    }
}

/// Categorical bar display, one slot per band.
///
/// Slot `i` shows `values[i + 1]` of a processed result; the DC bin is skipped.
#[derive(Debug, Clone)]
pub struct BandPowerSink {
    slots: Vec<f64>,
}

impl BandPowerSink {
    /// Creates `band_count` zeroed slots.
    pub fn new(band_count: usize) -> Self {
        Self {
            slots: vec![0.0; band_count],
        }
    }

    /// Paints a processed result, ignoring index 0 and anything past the last slot.
    pub fn paint(&mut self, result: &ProcessedResult) {
        for (slot, &value) in self.slots.iter_mut().zip(result.values.iter().skip(1)) {
            *slot = value;
        }
    }

    /// Current slot values.
    pub fn values(&self) -> &[f64] {
        &self.slots
    }

    /// Number of slots.
    pub fn band_count(&self) -> usize {
        self.slots.len()
    }

    /// Category label for slot `index`, counting bands from 1.
    pub fn label(index: usize) -> String {
        (index + 1).to_string()
    }
}

impl DisplaySink for BandPowerSink {
    fn append(&mut self, position: u64, value: f64) {
        match usize::try_from(position)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
        {
            Some(slot) => *slot = value,
            None => trace!(position, "Band position out of range"),
        }
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|v| *v = 0.0);
    }

    fn fill_zero(&mut self, width: usize) {
        if self.slots.len() == width {
            self.clear();
        } else {
            self.slots = vec![0.0; width];
        }
    }
}

/// Everything the rendering context draws.
#[derive(Debug, Clone)]
pub struct ScopeDisplay {
    /// Scrolling raw signal.
    pub raw: SlidingWindowSink,
    /// Band power bars.
    pub bands: BandPowerSink,
}

impl ScopeDisplay {
    /// Creates an empty display.
    pub fn new(window_width: usize, band_count: usize) -> Self {
        Self {
            raw: SlidingWindowSink::new(window_width),
            bands: BandPowerSink::new(band_count),
        }
    }

    /// Copies the current contents.
    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            raw: self.raw.points().copied().collect(),
            axis: self.raw.axis_range(),
            bands: self.bands.values().to_vec(),
        }
    }
}

/// Owned copy of the display, safe to hand out of the rendering context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    /// Raw points, oldest first.
    pub raw: Vec<DisplayPoint>,
    /// Visible x axis bounds.
    pub axis: (f64, f64),
    /// Band slot values.
    pub bands: Vec<f64>,
}

impl DisplaySnapshot {
    /// Raw values without positions.
    pub fn raw_values(&self) -> Vec<f64> {
        self.raw.iter().map(|p| p.value).collect()
    }
}
