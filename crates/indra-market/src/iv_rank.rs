//! IV rank: current ATM IV as a percentile of its trailing history.

/// Percentile of `current` within `history`, in [0, 1].
///
/// Neutral 0.5 when the history is too thin to rank against.
pub fn iv_rank_percentile(current: f64, history: &[f64]) -> f64 {
    if history.len() < 5 || !current.is_finite() {
        return 0.5;
    }
    let below = history.iter().filter(|&&iv| iv < current).count();
    below as f64 / history.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_extremes() {
        let history: Vec<f64> = (1..=100).map(|i| i as f64 / 4.0).collect();
        assert!(iv_rank_percentile(30.0, &history) > 0.99);
        assert!(iv_rank_percentile(0.1, &history) < 0.01);
    }

    #[test]
    fn test_rank_midpoint() {
        let history: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let rank = iv_rank_percentile(50.5, &history);
        assert!((rank - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_thin_history_is_neutral() {
        assert_eq!(iv_rank_percentile(15.0, &[12.0, 13.0]), 0.5);
        assert_eq!(iv_rank_percentile(f64::NAN, &[1.0; 50]), 0.5);
    }
}
