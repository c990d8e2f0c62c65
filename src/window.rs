//! Bounded, time-stamped RSSI history for one device.

use std::collections::VecDeque;

use crate::stats::{self, AggregationTick};

/// Lowest RSSI (dBm) the radio can report meaningfully.
pub const RSSI_VALID_MIN: i32 = -120;

/// Highest RSSI (dBm) accepted as a real measurement.
pub const RSSI_VALID_MAX: i32 = 10;

/// Samples kept per device before the oldest are dropped.
pub const DEFAULT_WINDOW_CAPACITY: usize = 50;

/// One received signal strength measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiSample {
    pub rssi: i32,
    pub at_ms: u64,
}

/// Returns true when `rssi` lies in the sensor's valid range.
pub fn is_valid_rssi(rssi: i32) -> bool {
    (RSSI_VALID_MIN..=RSSI_VALID_MAX).contains(&rssi)
}

/// FIFO of the most recent samples. Ticks read it without draining it.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<RssiSample>,
    capacity: usize,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WINDOW_CAPACITY)
    }
}

impl SampleWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample. Out-of-range values are dropped and `false` is returned.
    pub fn push(&mut self, rssi: i32, at_ms: u64) -> bool {
        if !is_valid_rssi(rssi) {
            return false;
        }
        self.samples.push_back(RssiSample { rssi, at_ms });
        self.evict_capacity();
        true
    }

    /// Drop the oldest samples until the window fits its capacity.
    pub fn evict_capacity(&mut self) {
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &RssiSample> {
        self.samples.iter()
    }

    pub fn rssi_values(&self) -> Vec<i32> {
        self.samples.iter().map(|s| s.rssi).collect()
    }

    pub fn newest(&self) -> Option<&RssiSample> {
        self.samples.back()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Aggregate the current contents. The window is left untouched.
    pub fn compute_tick(
        &self,
        remove_outliers: bool,
        path_loss_exponent: f64,
        tx_power: Option<i32>,
    ) -> AggregationTick {
        stats::compute_tick(
            &self.rssi_values(),
            remove_outliers,
            path_loss_exponent,
            tx_power,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_rejects_out_of_range() {
        let mut window = SampleWindow::default();
        assert!(!window.push(-121, 0));
        assert!(!window.push(11, 0));
        assert!(window.push(-120, 0));
        assert!(window.push(10, 0));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_fifo_eviction_drops_oldest() {
        let mut window = SampleWindow::with_capacity(3);
        for (i, rssi) in [-50, -51, -52, -53, -54].into_iter().enumerate() {
            window.push(rssi, i as u64 * 100);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.rssi_values(), vec![-52, -53, -54]);
        assert_eq!(window.newest().map(|s| s.at_ms), Some(400));
    }

    #[test]
    fn test_default_capacity() {
        let mut window = SampleWindow::default();
        for i in 0..80 {
            window.push(-70, i);
        }
        assert_eq!(window.capacity(), DEFAULT_WINDOW_CAPACITY);
        assert_eq!(window.len(), DEFAULT_WINDOW_CAPACITY);
        assert_eq!(window.samples().next().map(|s| s.at_ms), Some(30));
    }

    #[test]
    fn test_tick_does_not_clear_window() {
        let mut window = SampleWindow::default();
        window.push(-60, 0);
        window.push(-62, 10);

        let first = window.compute_tick(false, 2.0, Some(-59));
        let second = window.compute_tick(false, 2.0, Some(-59));

        assert_eq!(window.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first.sample_count, 2);
    }
}
