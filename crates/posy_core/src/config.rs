//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of the data directory.
    pub data_dir: PathBuf,

    /// Name of the backups subdirectory.
    pub backups_dir: String,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Snapshot retention applied by `prune`.
    pub retention: RetentionPolicy,
}

impl StoreConfig {
    /// Creates a configuration rooted at `data_dir` with default values.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backups_dir: "backups".to_string(),
            create_if_missing: true,
            retention: RetentionPolicy::default(),
        }
    }

    /// Sets the backups subdirectory name.
    #[must_use]
    pub fn backups_dir(mut self, name: impl Into<String>) -> Self {
        self.backups_dir = name.into();
        self
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    /// Path of the backups directory.
    #[must_use]
    pub fn backups_path(&self) -> PathBuf {
        self.data_dir.join(&self.backups_dir)
    }
}

/// Which snapshots `prune` keeps.
///
/// The newest `retain_count` snapshots are always kept. Older ones are
/// deleted, unless `retain_age` is set and they are younger than it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    retain_count: usize,
    retain_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retain_count: 20,
            retain_age: Some(Duration::from_secs(30 * 24 * 60 * 60)), // 30 days
        }
    }
}

impl RetentionPolicy {
    /// Keep the newest `count` snapshots (at least one), delete the rest.
    #[must_use]
    pub fn keep_last(count: usize) -> Self {
        Self {
            retain_count: count.max(1),
            retain_age: None,
        }
    }

    /// Also keep snapshots younger than `age`.
    #[must_use]
    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.retain_age = Some(age);
        self
    }

    /// Number of newest snapshots always kept.
    #[must_use]
    pub fn retain_count(&self) -> usize {
        self.retain_count
    }

    /// Age below which snapshots beyond the count are still kept.
    #[must_use]
    pub fn retain_age(&self) -> Option<Duration> {
        self.retain_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_last_never_drops_below_one() {
        assert_eq!(RetentionPolicy::keep_last(0).retain_count(), 1);
        assert_eq!(RetentionPolicy::keep_last(5).retain_count(), 5);
    }

    #[test]
    fn config_builder() {
        let config = StoreConfig::new("/tmp/shop")
            .backups_dir("snaps")
            .retention(RetentionPolicy::keep_last(3));
        assert_eq!(config.backups_path(), PathBuf::from("/tmp/shop/snaps"));
        assert_eq!(config.retention.retain_count(), 3);
        assert!(config.create_if_missing);
    }
}
