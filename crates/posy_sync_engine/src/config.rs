//! Sync engine settings.

use posy_core::RetentionPolicy;
use std::time::Duration;

/// Drive folder that holds the shared snapshot.
pub const DEFAULT_FOLDER: &str = "FlowerShopData";
/// File name of the shared snapshot inside [`DEFAULT_FOLDER`].
pub const DEFAULT_REMOTE_FILE: &str = "posy-snapshot.posy";

/// Knobs for the reconciliation engine and its background worker.
///
/// Defaults: a scheduled cycle every 15 minutes, 30 s per remote call, a
/// 2 s quiet period after local edits, and the store's default retention
/// after each pre-sync backup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of scheduled cycles. `None` leaves only dirty-triggered and
    /// manual cycles.
    pub sync_interval: Option<Duration>,
    /// Deadline of a single remote call.
    pub timeout: Duration,
    /// Remote folder holding the snapshot.
    pub folder_name: String,
    /// Snapshot file name inside the folder.
    pub remote_file: String,
    /// Backoff for transient remote failures.
    pub retry: RetryConfig,
    /// Access tokens this close to expiry are refreshed before use.
    pub refresh_skew: Duration,
    /// The worker waits for this much quiet after a local write.
    pub debounce: Duration,
    /// Pruning applied after every local backup; `None` keeps everything.
    pub retention: Option<RetentionPolicy>,
}

impl SyncConfig {
    /// The defaults listed above.
    pub fn new() -> Self {
        Self {
            sync_interval: Some(Duration::from_secs(15 * 60)),
            timeout: Duration::from_secs(30),
            folder_name: DEFAULT_FOLDER.into(),
            remote_file: DEFAULT_REMOTE_FILE.into(),
            retry: RetryConfig::default(),
            refresh_skew: Duration::from_secs(60),
            debounce: Duration::from_secs(2),
            retention: Some(RetentionPolicy::default()),
        }
    }

    /// Sets the scheduled-cycle period.
    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the remote folder.
    pub fn with_folder_name(mut self, folder: impl Into<String>) -> Self {
        self.folder_name = folder.into();
        self
    }

    /// Sets the backoff schedule.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the quiet period.
    pub fn with_debounce(mut self, quiet: Duration) -> Self {
        self.debounce = quiet;
        self
    }

    /// Sets or disables post-backup pruning.
    pub fn with_retention(mut self, retention: Option<RetentionPolicy>) -> Self {
        self.retention = retention;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff schedule for transient remote failures.
///
/// Attempt `n` (counting from 0) waits `initial_delay * 2^(n-1)`, capped at
/// `max_delay`, plus up to a quarter of that again when jitter is on.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries including the first; never below 1.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound of any single wait.
    pub max_delay: Duration,
    /// Randomly stretch waits by up to 25%.
    pub jitter: bool,
}

impl RetryConfig {
    /// `max_attempts` tries starting at 500 ms, capped at 30 s, with jitter.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// A single try, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sets the first wait.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the wait cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Turns jitter on or off.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before attempt `attempt`; the first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 1).min(31);
        let delay = self
            .initial_delay
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.jitter {
            delay + delay.mul_f64(rand::random::<f64>() / 4.0)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(4)
    }
}
