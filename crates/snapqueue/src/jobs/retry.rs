/// Exponential backoff policy applied between retry attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_seconds: i64,
    pub multiplier: f64,
    pub max_seconds: i64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 10,
            multiplier: 2.0,
            max_seconds: 300,
        }
    }
}

impl BackoffConfig {
    pub fn new(base_seconds: i64, multiplier: f64, max_seconds: i64) -> Self {
        Self {
            base_seconds,
            multiplier,
            max_seconds,
        }
    }
}

/// Computes the retry delay after a failure.
///
/// `attempts_completed` is the number of attempts already consumed by the job
/// (1-indexed): the first failure waits `base`, the second `base * multiplier`,
/// and so on, rounded up to whole seconds and clamped to `[base, max]`.
pub fn retry_delay_seconds(attempts_completed: i32, cfg: &BackoffConfig) -> i64 {
    let base = cfg.base_seconds.max(1);
    let multiplier = cfg.multiplier.max(1.0);
    let max_delay = cfg.max_seconds.max(base);

    let exponent = attempts_completed.saturating_sub(1).max(0);
    let raw = (base as f64) * multiplier.powi(exponent);

    // Overflow / infinity collapses onto the cap.
    if !raw.is_finite() || raw >= max_delay as f64 {
        return max_delay;
    }

    (raw.ceil() as i64).clamp(base, max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let cfg = BackoffConfig::new(10, 2.0, 300);
        let delays: Vec<i64> = (1..=6).map(|n| retry_delay_seconds(n, &cfg)).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 300]);
    }

    #[test]
    fn first_failure_waits_base_delay() {
        let cfg = BackoffConfig::new(7, 3.0, 100);
        assert_eq!(retry_delay_seconds(1, &cfg), 7);
    }

    #[test]
    fn fractional_delays_round_up() {
        let cfg = BackoffConfig::new(10, 1.5, 300);
        // 10 * 1.5 = 15, 10 * 1.5^2 = 22.5 -> 23
        assert_eq!(retry_delay_seconds(2, &cfg), 15);
        assert_eq!(retry_delay_seconds(3, &cfg), 23);
    }

    #[test]
    fn huge_attempt_counts_stay_at_cap() {
        let cfg = BackoffConfig::new(10, 2.0, 300);
        assert_eq!(retry_delay_seconds(1_000, &cfg), 300);
        assert_eq!(retry_delay_seconds(i32::MAX, &cfg), 300);
    }

    #[test]
    fn zero_attempts_is_treated_as_first() {
        let cfg = BackoffConfig::new(10, 2.0, 300);
        assert_eq!(retry_delay_seconds(0, &cfg), 10);
    }
}
