//! Scheduler configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max jobs in Initializing/Running/Cancelling at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Max running tasks per job
    #[serde(default = "default_max_concurrent_tasks_per_job")]
    pub max_concurrent_tasks_per_job: usize,

    /// Task timeout when neither the kind nor the job sets one
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    /// Per-kind timeout overrides
    #[serde(default)]
    pub kind_timeouts_secs: BTreeMap<String, u64>,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_max_concurrent_tasks_per_job() -> usize {
    2
}

fn default_task_timeout_secs() -> u64 {
    1800
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_concurrent_tasks_per_job: default_max_concurrent_tasks_per_job(),
            default_task_timeout_secs: default_task_timeout_secs(),
            kind_timeouts_secs: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.max_concurrent_tasks_per_job == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks_per_job must be at least 1".into(),
            ));
        }
        if self.default_task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "default_task_timeout_secs must be greater than zero".into(),
            ));
        }
        if let Some((kind, _)) = self.kind_timeouts_secs.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::Invalid(format!(
                "timeout for kind '{kind}' must be greater than zero"
            )));
        }
        Ok(())
    }

    /// Resolve the timeout of one task: kind override, then the job's own
    /// default, then the global default.
    pub fn timeout_for(&self, kind: &str, job_timeout_secs: Option<u64>) -> Duration {
        let secs = self
            .kind_timeouts_secs
            .get(kind)
            .copied()
            .or(job_timeout_secs)
            .unwrap_or(self.default_task_timeout_secs);
        Duration::from_secs(secs)
    }
}
