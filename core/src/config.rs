use crate::{
    error::{VolumeError, VolumeResult},
    reconciler::ReconcileMode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration. Callers pick the reconcile mode per use case:
/// `always` for a dashboard that reflects live edits, `gated` for a total
/// that is computed once and then left alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: ReconcileMode,
    /// Defer the total until every real size bucket has a row for the key.
    #[serde(default)]
    pub require_complete: bool,
    /// Reconcile a record's period key right after one of its fields is edited.
    #[serde(default = "default_true")]
    pub reconcile_on_edit: bool,
    /// Upper bound on parallel batch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ReconcileMode::default(),
            require_complete: false,
            reconcile_on_edit: default_true(),
            workers: default_workers(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    /// In tests, use EngineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in tests: live totals, a
    /// single worker.
    pub fn default_test() -> Self {
        Self {
            mode: ReconcileMode::Always,
            require_complete: false,
            reconcile_on_edit: true,
            workers: 1,
            busy_timeout_ms: 1_000,
        }
    }

    pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> VolumeResult<()> {
        if self.workers == 0 {
            return Err(VolumeError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }
}
