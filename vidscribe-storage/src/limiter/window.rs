//! The sliding-log algorithm, independent of where the log is stored.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use vidscribe_core::{chrono_duration, RateDecision, RateQuota};

/// Admission timestamps of one rate window, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlidingLog {
    admitted: VecDeque<DateTime<Utc>>,
}

impl SlidingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admissions currently recorded (after the last slide).
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Drop entries at or before `now - window`.
    pub fn slide(&mut self, window_start: DateTime<Utc>) {
        while self
            .admitted
            .front()
            .is_some_and(|&oldest| oldest <= window_start)
        {
            self.admitted.pop_front();
        }
    }

    /// Slide the window to `now`, then admit and record one request if the
    /// quota allows it.
    pub fn check_and_record(&mut self, quota: RateQuota, now: DateTime<Utc>) -> RateDecision {
        let window = chrono_duration(quota.window);
        self.slide(now - window);

        let allowed = self.admitted.len() < quota.limit as usize;
        if allowed {
            self.admitted.push_back(now);
        }

        // The log is non-empty whenever the request was admitted; an empty
        // log with a zero limit resets a full window from now.
        let oldest = self.admitted.front().copied().unwrap_or(now);
        let used = self.admitted.len().min(quota.limit as usize) as u32;

        RateDecision {
            allowed,
            limit: quota.limit,
            remaining: quota.limit - used,
            reset_at: oldest + window,
        }
    }
}

/// Compute the decision for a store that has already counted the live
/// admissions (`live`, including none for this request) and knows the
/// oldest one. Used by backends that keep the log outside process memory.
pub fn decide(
    quota: RateQuota,
    live: u32,
    oldest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RateDecision {
    let window = chrono_duration(quota.window);
    let allowed = live < quota.limit;
    let used = if allowed { live + 1 } else { quota.limit };
    let oldest = oldest.unwrap_or(now);

    RateDecision {
        allowed,
        limit: quota.limit,
        remaining: quota.limit.saturating_sub(used),
        reset_at: oldest + window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn quota() -> RateQuota {
        RateQuota::new(5, Duration::from_secs(60))
    }

    #[test]
    fn test_sixth_request_in_window_is_rejected() {
        let start = Utc::now();
        let mut log = SlidingLog::new();

        for i in 0..5 {
            let d = log.check_and_record(quota(), start + chrono::Duration::seconds(i * 2));
            assert!(d.allowed, "request {} should be admitted", i + 1);
            assert_eq!(d.remaining, 4 - i as u32);
        }

        let now = start + chrono::Duration::seconds(10);
        let d = log.check_and_record(quota(), now);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_at, start + chrono::Duration::seconds(60));
        assert!(d.reset_at > now);
        assert_eq!(log.len(), 5, "rejections are not recorded");
    }

    #[test]
    fn test_capacity_returns_as_window_slides() {
        let start = Utc::now();
        let mut log = SlidingLog::new();
        for _ in 0..5 {
            log.check_and_record(quota(), start);
        }
        assert!(!log.check_and_record(quota(), start + chrono::Duration::seconds(59)).allowed);

        // Exactly one window later the old entries fall out.
        let d = log.check_and_record(quota(), start + chrono::Duration::seconds(60));
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_decide_matches_log() {
        let now = Utc::now();
        let admitted = decide(quota(), 4, Some(now - chrono::Duration::seconds(30)), now);
        assert!(admitted.allowed);
        assert_eq!(admitted.remaining, 0);
        assert_eq!(admitted.reset_at, now + chrono::Duration::seconds(30));

        let rejected = decide(quota(), 5, Some(now), now);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);

        let fresh = decide(quota(), 0, None, now);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
        assert_eq!(fresh.reset_at, now + chrono::Duration::seconds(60));
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_limit_in_any_window(
            limit in 1u32..10,
            gaps in proptest::collection::vec(0i64..5_000, 1..200),
        ) {
            let quota = RateQuota::new(limit, Duration::from_secs(10));
            let mut log = SlidingLog::new();
            let mut now = Utc::now();
            let mut admitted: Vec<DateTime<Utc>> = Vec::new();

            for gap in gaps {
                now += chrono::Duration::milliseconds(gap);
                if log.check_and_record(quota, now).allowed {
                    admitted.push(now);
                }
                let window_start = now - chrono::Duration::seconds(10);
                let in_window = admitted.iter().filter(|&&t| t > window_start).count();
                prop_assert!(in_window <= limit as usize);
            }
        }
    }
}
