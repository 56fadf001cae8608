//! Age classification.
//!
//! Every expiry decision in a sweep goes through [`is_expired`]. The
//! reference time is always passed in; nothing here reads the clock.

use std::time::{Duration, SystemTime};

/// Seconds in one day.
pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Convert an age limit in days to a duration.
pub fn age_limit(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * SECS_PER_DAY)
}

/// Time elapsed between `timestamp` and `now`.
///
/// Timestamps in the future count as zero elapsed time.
pub fn elapsed(timestamp: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(timestamp).unwrap_or(Duration::ZERO)
}

/// Elapsed time in fractional days.
pub fn elapsed_days(timestamp: SystemTime, now: SystemTime) -> f64 {
    elapsed(timestamp, now).as_secs_f64() / SECS_PER_DAY as f64
}

/// Decide whether an item with the given timestamp is expired as of `now`.
///
/// An item is expired when the elapsed time is at least `age_limit_days`
/// days. A limit of zero expires everything, including items stamped in the
/// future.
pub fn is_expired(timestamp: SystemTime, age_limit_days: u32, now: SystemTime) -> bool {
    age_limit_days == 0 || elapsed(timestamp, now) >= age_limit(age_limit_days)
}

/// Classifier bound to one age limit and one reference time.
#[derive(Debug, Clone, Copy)]
pub struct AgeClassifier {
    age_limit_days: u32,
    now: SystemTime,
}

impl AgeClassifier {
    /// Create a classifier for a directory with the given limit.
    pub fn new(age_limit_days: u32, now: SystemTime) -> Self {
        Self {
            age_limit_days,
            now,
        }
    }

    /// The age limit in days.
    pub fn age_limit_days(&self) -> u32 {
        self.age_limit_days
    }

    /// The reference time.
    pub fn now(&self) -> SystemTime {
        self.now
    }

    /// Check a timestamp against this classifier's limit.
    pub fn is_expired(&self, timestamp: SystemTime) -> bool {
        is_expired(timestamp, self.age_limit_days, self.now)
    }

    /// Human-readable age description used in audit reasons.
    pub fn describe(&self, timestamp: SystemTime) -> String {
        format!(
            "{:.1} days old, limit {} days",
            elapsed_days(timestamp, self.now),
            self.age_limit_days
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days_ago(now: SystemTime, days: u64) -> SystemTime {
        now - Duration::from_secs(days * SECS_PER_DAY)
    }

    #[test]
    fn test_expired_at_exact_limit() {
        let now = SystemTime::now();
        assert!(is_expired(days_ago(now, 5), 5, now));
        assert!(!is_expired(days_ago(now, 5) + Duration::from_secs(1), 5, now));
    }

    #[test]
    fn test_zero_limit_always_expired() {
        let now = SystemTime::now();
        assert!(is_expired(now, 0, now));
        assert!(is_expired(now + Duration::from_secs(3600), 0, now));
    }

    #[test]
    fn test_future_timestamp_not_expired() {
        let now = SystemTime::now();
        let future = now + Duration::from_secs(10 * SECS_PER_DAY);
        assert!(!is_expired(future, 1, now));
        assert_eq!(elapsed(future, now), Duration::ZERO);
    }

    #[test]
    fn test_elapsed_days_fractional() {
        let now = SystemTime::now();
        let ts = now - Duration::from_secs(SECS_PER_DAY / 2);
        assert!((elapsed_days(ts, now) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_classifier_describe() {
        let now = SystemTime::now();
        let classifier = AgeClassifier::new(5, now);
        assert!(classifier.is_expired(days_ago(now, 10)));
        assert_eq!(
            classifier.describe(days_ago(now, 10)),
            "10.0 days old, limit 5 days"
        );
    }
}
