//! Fixed backoff schedule.
//!
//! Unlike an open-ended exponential policy, the schedule here is a short
//! ordered list of delays indexed by the consecutive-failure count. Running
//! off the end stops automatic retries without clearing the error; a manual
//! retry or credential change resets the count.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Delay before the next attempt, or `None` once the schedule is
    /// exhausted for this failure streak.
    pub fn delay_for(&self, retry_count: u32) -> Option<Duration> {
        self.delays.get(retry_count as usize).copied()
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_secs(&[5, 15, 45])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_schedule_order() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(0), Some(Duration::from_secs(5)));
        assert_eq!(schedule.delay_for(1), Some(Duration::from_secs(15)));
        assert_eq!(schedule.delay_for(2), Some(Duration::from_secs(45)));
    }

    #[test]
    fn exhausted_schedule_returns_none() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(3), None);
        assert_eq!(schedule.delay_for(100), None);
    }

    #[test]
    fn empty_schedule_never_retries() {
        let schedule = BackoffSchedule::new(Vec::new());
        assert!(schedule.is_empty());
        assert_eq!(schedule.delay_for(0), None);
    }
}
