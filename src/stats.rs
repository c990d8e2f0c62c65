//! Statistics over RSSI samples.
//!
//! Pure functions: mean and population standard deviation, sigma-based outlier
//! rejection and the log-distance pseudo-distance estimate. Nothing here owns
//! state; the caller passes the samples of a [`SampleWindow`](crate::window::SampleWindow).

use crate::window::is_valid_rssi;

/// Samples deviating from the mean by more than this many sigmas are outliers.
pub const N_SIGMA_OUTLIER_THRESHOLD: f64 = 2.0;

/// Sentinel for "pseudo-distance could not be computed".
pub const PSEUDO_DISTANCE_UNKNOWN: f64 = -1.0;

/// Aggregated view of one device's window at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationTick {
    /// Arithmetic mean of the retained samples (dBm)
    pub mean: f64,
    /// Number of samples the statistics were computed over
    pub sample_count: u32,
    /// Population standard deviation of the retained samples (dB)
    pub sigma: f64,
    pub max_rssi: i32,
    pub min_rssi: i32,
    /// Meters, or -1 when the device's tx power is unknown
    pub pseudo_distance: f64,
    /// Half-spread of the distance band one sigma either side of the mean
    pub pseudo_distance_error: f64,
    /// Samples discarded by outlier rejection
    pub outliers_removed: u32,
}

impl AggregationTick {
    pub fn empty() -> Self {
        Self {
            mean: 0.0,
            sample_count: 0,
            sigma: 0.0,
            max_rssi: 0,
            min_rssi: 0,
            pseudo_distance: PSEUDO_DISTANCE_UNKNOWN,
            pseudo_distance_error: PSEUDO_DISTANCE_UNKNOWN,
            outliers_removed: 0,
        }
    }

    pub fn has_pseudo_distance(&self) -> bool {
        self.pseudo_distance >= 0.0
    }
}

/// Mean and population standard deviation. `(0, 0)` for an empty slice.
pub fn mean_and_sigma(samples: &[i32]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Remove outliers until the retained set has none left.
///
/// Returns the retained samples (input order) and the number discarded.
pub fn filter_outliers(samples: &[i32]) -> (Vec<i32>, usize) {
    let mut retained = samples.to_vec();
    let mut removed = 0;

    loop {
        let (mean, sigma) = mean_and_sigma(&retained);
        let limit = sigma * N_SIGMA_OUTLIER_THRESHOLD;
        let before = retained.len();
        retained.retain(|&x| (x as f64 - mean).abs() <= limit);

        let dropped = before - retained.len();
        if dropped == 0 || retained.is_empty() {
            break;
        }
        removed += dropped;
    }

    (retained, removed)
}

/// Log-distance path loss estimate: `10 ^ ((tx_power - mean) / (10 * n))`.
///
/// Returns the -1 sentinel when `path_loss_exponent` is not a positive number.
pub fn pseudo_distance(tx_power: i32, mean: f64, path_loss_exponent: f64) -> f64 {
    if !(path_loss_exponent > 0.0) || !path_loss_exponent.is_finite() {
        return PSEUDO_DISTANCE_UNKNOWN;
    }
    10f64.powf((tx_power as f64 - mean) / (10.0 * path_loss_exponent))
}

/// Error bound on [`pseudo_distance`] derived from `sigma` with the same scaling.
pub fn pseudo_distance_error(tx_power: i32, mean: f64, sigma: f64, path_loss_exponent: f64) -> f64 {
    let far = pseudo_distance(tx_power, mean - sigma, path_loss_exponent);
    let near = pseudo_distance(tx_power, mean + sigma, path_loss_exponent);
    if far < 0.0 || near < 0.0 {
        return PSEUDO_DISTANCE_UNKNOWN;
    }
    (far - near) / 2.0
}

/// Compute one tick over `samples`.
pub fn compute_tick(
    samples: &[i32],
    remove_outliers: bool,
    path_loss_exponent: f64,
    tx_power: Option<i32>,
) -> AggregationTick {
    if samples.is_empty() {
        return AggregationTick::empty();
    }

    let (retained, outliers_removed) = if remove_outliers {
        filter_outliers(samples)
    } else {
        (samples.to_vec(), 0)
    };

    let (mean, sigma) = mean_and_sigma(&retained);
    let max_rssi = retained.iter().copied().max().unwrap_or(0);
    let min_rssi = retained.iter().copied().min().unwrap_or(0);

    let (pseudo_distance, pseudo_distance_error) = match tx_power {
        Some(tx) => (
            pseudo_distance(tx, mean, path_loss_exponent),
            pseudo_distance_error(tx, mean, sigma, path_loss_exponent),
        ),
        None => (PSEUDO_DISTANCE_UNKNOWN, PSEUDO_DISTANCE_UNKNOWN),
    };

    AggregationTick {
        mean,
        sample_count: retained.len() as u32,
        sigma,
        max_rssi,
        min_rssi,
        pseudo_distance,
        pseudo_distance_error,
        outliers_removed: outliers_removed as u32,
    }
}

/// Like [`compute_tick`], but first drops readings outside the valid RSSI range.
pub fn aggregate_samples(
    samples: Vec<i32>,
    remove_outliers: bool,
    path_loss_exponent: f64,
    tx_power: Option<i32>,
) -> AggregationTick {
    let valid: Vec<i32> = samples.into_iter().filter(|&r| is_valid_rssi(r)).collect();
    compute_tick(&valid, remove_outliers, path_loss_exponent, tx_power)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_window_tick() {
        let tick = compute_tick(&[], true, 2.0, Some(-59));
        assert_eq!(tick.sample_count, 0);
        assert_eq!(tick.pseudo_distance, -1.0);
        assert!(!tick.has_pseudo_distance());
    }

    #[test]
    fn test_single_sample_has_zero_sigma() {
        let tick = compute_tick(&[-70], true, 2.0, Some(-59));
        assert_eq!(tick.sample_count, 1);
        assert_eq!(tick.sigma, 0.0);
        assert_eq!(tick.outliers_removed, 0);
        assert_eq!(tick.max_rssi, -70);
        assert_eq!(tick.min_rssi, -70);
        assert_eq!(tick.pseudo_distance_error, 0.0);
    }

    #[test]
    fn test_outlier_boundary_keeps_far_sample() {
        // mean -68.25, population sigma ~12.577; -90 deviates 21.75 < 25.15
        let samples = [-60, -62, -61, -90];
        let (mean, sigma) = mean_and_sigma(&samples);
        assert!((mean - -68.25).abs() < 1e-9);
        assert!((sigma - 158.1875f64.sqrt()).abs() < 1e-9);

        let tick = compute_tick(&samples, true, 2.0, None);
        assert_eq!(tick.outliers_removed, 0);
        assert_eq!(tick.sample_count, 4);
        assert!((tick.mean - -68.25).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_removed_and_recomputed() {
        let samples = [-60, -60, -61, -61, -60, -61, -60, -61, -60, -95];
        let tick = compute_tick(&samples, true, 2.0, None);
        assert_eq!(tick.outliers_removed, 1);
        assert_eq!(tick.sample_count, 9);
        assert_eq!(tick.min_rssi, -61);
        assert!(tick.mean > -61.0 && tick.mean < -60.0);

        let untouched = compute_tick(&samples, false, 2.0, None);
        assert_eq!(untouched.outliers_removed, 0);
        assert_eq!(untouched.sample_count, 10);
        assert_eq!(untouched.min_rssi, -95);
    }

    #[test]
    fn test_pseudo_distance_known_value() {
        let d = pseudo_distance(-59, -79.0, 2.0);
        assert!((d - 10.0).abs() < 1e-9);

        let at_one_meter = pseudo_distance(-59, -59.0, 2.0);
        assert!((at_one_meter - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pseudo_distance_rejects_degenerate_exponent() {
        assert_eq!(pseudo_distance(-59, -79.0, 0.0), -1.0);
        assert_eq!(pseudo_distance(-59, -79.0, -2.0), -1.0);
        assert_eq!(pseudo_distance(-59, -79.0, f64::NAN), -1.0);
    }

    #[test]
    fn test_unknown_tx_power_gives_sentinel() {
        let tick = compute_tick(&[-70, -72], false, 2.0, None);
        assert_eq!(tick.pseudo_distance, -1.0);
        assert_eq!(tick.pseudo_distance_error, -1.0);
        assert_eq!(tick.sample_count, 2);
    }

    #[test]
    fn test_pseudo_distance_error_grows_with_sigma() {
        let tight = pseudo_distance_error(-59, -79.0, 1.0, 2.0);
        let loose = pseudo_distance_error(-59, -79.0, 6.0, 2.0);
        assert!(tight > 0.0);
        assert!(loose > tight);
    }

    #[test]
    fn test_aggregate_samples_drops_invalid_readings() {
        let tick = aggregate_samples(vec![-60, 127, -62, -130], false, 2.0, Some(-59));
        assert_eq!(tick.sample_count, 2);
        assert!((tick.mean - -61.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_outlier_removal_is_idempotent(
            samples in proptest::collection::vec(-120i32..=10, 1..60)
        ) {
            let (retained, _) = filter_outliers(&samples);
            prop_assert!(!retained.is_empty());
            let (again, removed) = filter_outliers(&retained);
            prop_assert_eq!(removed, 0);
            prop_assert_eq!(again, retained);
        }

        #[test]
        fn prop_weaker_signal_is_never_closer(
            tx in -100i32..=0,
            mean in -120i32..=10,
            drop in 0i32..=40,
            exponent in 1.0f64..4.0,
        ) {
            let strong = pseudo_distance(tx, mean as f64, exponent);
            let weak = pseudo_distance(tx, (mean - drop) as f64, exponent);
            prop_assert!(weak >= strong);
        }
    }
}
