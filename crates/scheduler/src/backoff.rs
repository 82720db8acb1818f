//! Exponential backoff for failing instances.

use std::time::Duration;

/// Delay before the next tick after `failures` consecutive failures.
///
/// `base × 2^failures`, capped at `base × max_multiplier`. With no failures
/// the delay is the base interval itself.
pub fn calculate_backoff(failures: u32, base: Duration, max_multiplier: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = base_ms.saturating_mul(u64::from(max_multiplier.max(1)));
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(failures));
    Duration::from_millis(backoff.min(max_ms).max(base_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failures_is_base_interval() {
        assert_eq!(
            calculate_backoff(0, Duration::from_secs(60), 16),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let base = Duration::from_secs(10);
        let delays: Vec<_> = (1..=5).map(|n| calculate_backoff(n, base, 8)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(20),
                Duration::from_secs(40),
                Duration::from_secs(80),
                Duration::from_secs(80),
                Duration::from_secs(80),
            ]
        );
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let delay = calculate_backoff(200, Duration::from_secs(u64::MAX / 1000), u32::MAX);
        assert!(delay >= Duration::from_secs(1));
    }

    #[test]
    fn test_multiplier_one_never_grows() {
        let base = Duration::from_secs(5);
        assert_eq!(calculate_backoff(3, base, 1), base);
    }
}
