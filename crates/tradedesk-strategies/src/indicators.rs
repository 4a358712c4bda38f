//! Scalar indicator calculations over close-price slices.

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average seeded with an SMA over the first `period`
/// values.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    for value in &values[period..] {
        ema = alpha * value + (1.0 - alpha) * ema;
    }
    Some(ema)
}

/// Wilder-smoothed RSI. Needs `period + 1` values for the first reading.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for pair in values[..period + 1].windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for pair in values[period..].windows(2) {
        let delta = pair[1] - pair[0];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 5), Some(3.0));
        assert_eq!(sma(&values, 2), Some(4.5));
        assert_eq!(sma(&values, 6), None);
        assert_eq!(sma(&values, 0), None);
    }

    #[test]
    fn test_ema_tracks_recent_values() {
        let flat = [10.0; 20];
        assert_eq!(ema(&flat, 5), Some(10.0));

        let mut rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let e = ema(&rising, 5).unwrap();
        let s = sma(&rising, 5).unwrap();
        // EMA leans toward the newest values on a rising series
        assert!(e > s - 1.0);
        rising.reverse();
        assert!(ema(&rising, 5).unwrap() < 5.0);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1.0);
    }

    #[test]
    fn test_rsi_needs_period_plus_one() {
        let values = [1.0; 14];
        assert_eq!(rsi(&values, 14), None);
        let values = [1.0; 15];
        assert!(rsi(&values, 14).is_some());
    }

    #[test]
    fn test_rsi_midpoint_on_alternating_series() {
        let values: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let r = rsi(&values, 14).unwrap();
        assert!(r > 40.0 && r < 60.0);
    }
}
