use std::time::Duration;

/// Fixed backoff list. Retry `n` (zero-based) waits `delays[n]`; once the
/// list is exhausted the last delay repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
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

    pub fn from_millis(millis: &[u64]) -> Self {
        Self::new(millis.iter().copied().map(Duration::from_millis).collect())
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let idx = (retry as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(idx).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queue_schedule() {
        let schedule = BackoffSchedule::from_secs(&[5, 15, 45, 90]);
        assert_eq!(schedule.delay_for(0), Duration::from_secs(5));
        assert_eq!(schedule.delay_for(3), Duration::from_secs(90));
        assert_eq!(schedule.delay_for(4), Duration::from_secs(90));
        assert_eq!(schedule.delay_for(100), Duration::from_secs(90));
    }

    #[test]
    fn test_empty_schedule_is_immediate() {
        let schedule = BackoffSchedule::from_millis(&[]);
        assert_eq!(schedule.delay_for(0), Duration::ZERO);
    }
}
