use crate::host::DEFAULT_SYNC_HOSTS;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Candidate push hosts, in probe order.
    pub hosts: Vec<String>,
    /// Bound on one sync check call. The server holds the request for about
    /// 25 seconds when idle, so this has to be longer.
    pub poll_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Pause between sync checks that report nothing new.
    pub idle_delay: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Consecutive failed sync checks tolerated before giving up.
    pub max_poll_retries: u32,
    pub dispatch_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hosts: DEFAULT_SYNC_HOSTS.iter().map(|h| h.to_string()).collect(),
            poll_timeout: Duration::from_secs(35),
            fetch_timeout: Duration::from_secs(30),
            idle_delay: Duration::from_secs(1),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            max_poll_retries: 5,
            dispatch_queue_capacity: 32,
        }
    }
}

impl SyncConfig {
    /// Delay before retry number `attempt` (1-based): doubles from the base
    /// delay and saturates at the max delay.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}
