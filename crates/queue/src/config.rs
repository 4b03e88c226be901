use std::time::Duration;

/// Retry backoff policy for a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// `base_ms * 2^(attempt-1)`
    Exponential { base_ms: u64 },
    Fixed { delay_ms: u64 },
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the number of attempts already
    /// made (>= 1).
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self {
            BackoffPolicy::Exponential { base_ms } => {
                let shift = attempts_made.saturating_sub(1).min(16);
                Duration::from_millis(base_ms.saturating_mul(1u64 << shift))
            }
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
        }
    }
}

/// Per-queue policy, fixed at process start
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// How many finished jobs to keep around for inspection
    pub keep_completed: usize,
    pub keep_failed: usize,
}

/// Manager-wide settings
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub queues: Vec<QueueConfig>,
    /// False for read-only replicas: `register_processor` is refused
    pub workers_enabled: bool,
    /// How often idle workers poll for claimable jobs
    pub poll_interval: Duration,
    /// How often the repeatable-job scheduler checks for due patterns
    pub repeat_poll_interval: Duration,
}

impl QueueSettings {
    /// The three standard queues: execution (parallel runs), cleanup
    /// (strictly sequential), scheduled triggers.
    pub fn standard() -> Self {
        Self {
            queues: vec![
                QueueConfig {
                    name: "execution".to_string(),
                    concurrency: 5,
                    max_attempts: 3,
                    backoff: BackoffPolicy::Exponential { base_ms: 5_000 },
                    keep_completed: 100,
                    keep_failed: 500,
                },
                QueueConfig {
                    name: "cleanup".to_string(),
                    concurrency: 1,
                    max_attempts: 2,
                    backoff: BackoffPolicy::Fixed { delay_ms: 60_000 },
                    keep_completed: 50,
                    keep_failed: 200,
                },
                QueueConfig {
                    name: "scheduled".to_string(),
                    concurrency: 3,
                    max_attempts: 3,
                    backoff: BackoffPolicy::Fixed { delay_ms: 30_000 },
                    keep_completed: 50,
                    keep_failed: 200,
                },
            ],
            workers_enabled: true,
            poll_interval: Duration::from_millis(500),
            repeat_poll_interval: Duration::from_secs(10),
        }
    }

    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = BackoffPolicy::Exponential { base_ms: 1_000 };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::Fixed { delay_ms: 60_000 };
        assert_eq!(policy.delay_for(1), policy.delay_for(5));
    }

    #[test]
    fn standard_settings_serialize_cleanup() {
        let settings = QueueSettings::standard();
        assert_eq!(settings.queue("cleanup").unwrap().concurrency, 1);
        assert_eq!(settings.queue("execution").unwrap().concurrency, 5);
        assert_eq!(settings.queue("scheduled").unwrap().concurrency, 3);
    }
}
