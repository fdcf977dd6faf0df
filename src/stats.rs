//! Pure statistics over request durations.
//!
//! Everything here is deterministic: the same input slice always yields the
//! same bits. Rounding uses round-half-to-even so `2.675` style midpoints
//! do not drift upwards across large reports.

/// Percentiles reported for every group, as fractions in `[0, 1]`.
pub const PERCENTILES: [f64; 8] = [0.50, 0.66, 0.75, 0.80, 0.90, 0.95, 0.98, 0.99];

/// Rounds `value` to `places` decimal places, ties to even.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

/// Percentile by linear interpolation between order statistics.
///
/// `sorted` must be ascending. With `real = p * (n - 1)`, the result lies
/// between `sorted[floor(real)]` and the next element, weighted by the
/// fractional part of `real`. When there is no next element the value is
/// returned rounded to three places. An empty slice yields `0.0`.
pub fn percentile(sorted: &[u64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    debug_assert!(sorted.is_sorted(), "percentile input must be sorted");

    let real_index = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let index = real_index.floor() as usize;
    let frac = real_index - index as f64;

    if index + 1 < n {
        let low = sorted[index] as f64;
        let high = sorted[index + 1] as f64;
        // The weighted sum can overshoot a neighbour by an ulp.
        (low * (1.0 - frac) + high * frac).clamp(low, high)
    } else {
        round_to(sorted[index] as f64, 3)
    }
}

pub fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, rounded to three places.
///
/// A single sample has no spread to estimate, so fewer than two values
/// yield `0.0` instead of dividing by zero.
pub fn std_dev(values: &[u64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let sum: f64 = values
        .iter()
        .map(|&v| {
            let d = v as f64 - avg;
            d * d
        })
        .sum();
    round_to((sum / (values.len() - 1) as f64).sqrt(), 3)
}
