//! Technical indicators over close prices.

/// Default RSI lookback.
pub const RSI_PERIOD: usize = 14;

/// Latest Relative Strength Index using Wilder smoothing.
///
/// The first average gain/loss is the simple mean of the first `period`
/// changes; later values are smoothed with `(prev * (period - 1) + x) / period`.
/// Needs at least `period + 1` closes. A flat series reads as 50.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let p = period as f64;
    let mut avg_gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / p;
    let mut avg_loss = seed.iter().filter(|c| **c < 0.0).map(|c| -c).sum::<f64>() / p;

    for change in rest {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    let total = avg_gain + avg_loss;
    if total == 0.0 {
        return Some(50.0);
    }
    Some(100.0 * avg_gain / total)
}
