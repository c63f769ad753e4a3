//! Processor configuration.

use std::time::Duration;

/// Page size used when enumerating connections.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Configuration for the command processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Connections fetched per page during broadcast and cleanup.
    pub page_size: usize,
    /// Retry behavior for appends that hit store contention.
    pub retry: RetryConfig,
    /// Log length at which the log merger is asked to compact the object.
    pub auto_merge_log_length: Option<usize>,
    /// Whether sockets reported gone by the transport are cleaned up.
    pub evict_gone_sockets: bool,
}

impl ProcessorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryConfig::default(),
            auto_merge_log_length: None,
            evict_gone_sockets: true,
        }
    }

    /// Sets the connection page size. Values below 1 are raised to 1.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables log auto-merge at the given log length.
    pub fn with_auto_merge(mut self, log_length: usize) -> Self {
        self.auto_merge_log_length = Some(log_length);
        self
    }

    /// Sets whether gone sockets are cleaned up.
    pub fn with_evict_gone_sockets(mut self, evict: bool) -> Self {
        self.evict_gone_sockets = evict;
        self
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
