//! Queue statistics

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

/// Aggregate view over active and historical entries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Entries already taken off the queue
    pub dequeued_count: i64,
    /// Seconds of content already taken off the queue
    pub dequeued_duration_total: i64,
    /// Active entries
    pub enqueued_count: i64,
    /// Seconds of content still queued
    pub enqueued_duration_total: i64,
    /// Mean seconds between dequeue and start
    pub wait_mean_secs: f64,
    /// Population standard deviation of the dequeue-to-start wait
    pub wait_std_dev_secs: f64,
}

impl QueueStats {
    /// Projected time at which the queue drains, counting the mean start-gate
    /// wait once per active entry
    pub fn estimated_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let likely_wait = self.wait_mean_secs * self.enqueued_count as f64;
        let total_ms = (self.enqueued_duration_total as f64 + likely_wait) * 1000.0;
        now + ChronoDuration::milliseconds(total_ms.round() as i64)
    }
}

/// Mean and population standard deviation; zeros for an empty sample
pub fn mean_and_std_dev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_dev_empty() {
        assert_eq!(mean_and_std_dev(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_mean_and_std_dev() {
        let (mean, std_dev) = mean_and_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(mean, 5.0);
        assert_eq!(std_dev, 2.0);
    }

    #[test]
    fn test_estimated_end_adds_waits() {
        let stats = QueueStats {
            dequeued_count: 0,
            dequeued_duration_total: 0,
            enqueued_count: 2,
            enqueued_duration_total: 300,
            wait_mean_secs: 10.0,
            wait_std_dev_secs: 0.0,
        };
        let now = Utc::now();
        assert_eq!(stats.estimated_end(now), now + ChronoDuration::seconds(320));
    }
}
