//! Swarm configuration.
//!
//! Defaults are usable as-is. [`SwarmConfig::load`] layers an optional JSON
//! file and then `CHIMERA_*` environment variables on top of them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ChimeraError, Result, TaskType};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmConfig {
    pub scheduler: SchedulerConfig,
    pub planner: PlannerConfig,
    pub judge: JudgeConfig,
    pub worker: WorkerConfig,
    pub mediation: MediationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub default_max_retries: u32,
    /// Deadline applied to planned tasks, relative to planning time.
    pub task_deadline_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            default_max_retries: 3,
            task_deadline_secs: Some(900),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    pub fetch_trends_cost: f64,
    pub generate_content_cost: f64,
    pub max_tasks_per_cycle: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fetch_trends_cost: 0.25,
            generate_content_cost: 1.0,
            max_tasks_per_cycle: 16,
        }
    }
}

impl PlannerConfig {
    pub fn cost_of(&self, task_type: TaskType) -> f64 {
        match task_type {
            TaskType::FetchTrends => self.fetch_trends_cost,
            TaskType::GenerateContent => self.generate_content_cost,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JudgeConfig {
    pub max_commit_attempts: u32,
    pub max_publish_attempts: u32,
    /// At or above: approved by the judge itself.
    pub auto_approve_threshold: f64,
    /// At or above (and below auto-approve): escalated to a human reviewer.
    pub hitl_min_confidence: f64,
    /// Case-insensitive regexes; a match marks content or prompts unsafe.
    pub unsafe_patterns: Vec<String>,
    pub require_provenance: bool,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
            max_publish_attempts: 3,
            auto_approve_threshold: 0.8,
            hitl_min_confidence: 0.5,
            unsafe_patterns: vec![
                r"\bguaranteed returns?\b".to_string(),
                r"\bget rich quick\b".to_string(),
                r"\bkill\b".to_string(),
                r"\bhate\b".to_string(),
            ],
            require_provenance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub skill_deadline_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            skill_deadline_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn skill_deadline(&self) -> Duration {
        Duration::from_millis(self.skill_deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediationConfig {
    pub call_timeout_ms: u64,
    /// How long a cached side-effect result is replayed for its key.
    pub idempotency_ttl_secs: u64,
    /// Upper bound on cached idempotency keys.
    pub idempotency_capacity: usize,
}

impl Default for MediationConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            idempotency_ttl_secs: 86_400,
            idempotency_capacity: 10_000,
        }
    }
}

impl MediationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

impl SwarmConfig {
    /// Read a JSON config file. Missing sections take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `CHIMERA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    ///
    /// Recognised keys: `CHIMERA_WORKER_POOL_SIZE`, `CHIMERA_SKILL_DEADLINE_MS`,
    /// `CHIMERA_MAX_RETRIES`, `CHIMERA_BACKOFF_BASE_MS`, `CHIMERA_BACKOFF_CAP_MS`,
    /// `CHIMERA_TASK_DEADLINE_SECS`, `CHIMERA_MAX_TASKS_PER_CYCLE`,
    /// `CHIMERA_MAX_COMMIT_ATTEMPTS`, `CHIMERA_AUTO_APPROVE_THRESHOLD`,
    /// `CHIMERA_HITL_MIN_CONFIDENCE`, `CHIMERA_MCP_TIMEOUT_MS`,
    /// `CHIMERA_IDEMPOTENCY_TTL_SECS`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| ChimeraError::Config(format!("{key}: cannot parse '{raw}'")))
        }

        macro_rules! override_with {
            ($key:literal, $target:expr) => {
                if let Some(raw) = lookup($key) {
                    $target = parse($key, raw)?;
                }
            };
        }

        override_with!("CHIMERA_WORKER_POOL_SIZE", self.worker.pool_size);
        override_with!("CHIMERA_SKILL_DEADLINE_MS", self.worker.skill_deadline_ms);
        override_with!("CHIMERA_MAX_RETRIES", self.scheduler.default_max_retries);
        override_with!("CHIMERA_BACKOFF_BASE_MS", self.scheduler.backoff_base_ms);
        override_with!("CHIMERA_BACKOFF_CAP_MS", self.scheduler.backoff_cap_ms);
        override_with!("CHIMERA_MAX_TASKS_PER_CYCLE", self.planner.max_tasks_per_cycle);
        override_with!("CHIMERA_MAX_COMMIT_ATTEMPTS", self.judge.max_commit_attempts);
        override_with!("CHIMERA_AUTO_APPROVE_THRESHOLD", self.judge.auto_approve_threshold);
        override_with!("CHIMERA_HITL_MIN_CONFIDENCE", self.judge.hitl_min_confidence);
        override_with!("CHIMERA_MCP_TIMEOUT_MS", self.mediation.call_timeout_ms);
        override_with!("CHIMERA_IDEMPOTENCY_TTL_SECS", self.mediation.idempotency_ttl_secs);

        if let Some(raw) = lookup("CHIMERA_TASK_DEADLINE_SECS") {
            self.scheduler.task_deadline_secs = match raw.trim() {
                "" | "none" => None,
                _ => Some(parse("CHIMERA_TASK_DEADLINE_SECS", raw)?),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let j = &self.judge;
        if !(0.0..=1.0).contains(&j.hitl_min_confidence)
            || !(0.0..=1.0).contains(&j.auto_approve_threshold)
            || j.hitl_min_confidence > j.auto_approve_threshold
        {
            return Err(ChimeraError::Config(format!(
                "judge thresholds must satisfy 0 <= hitl_min ({}) <= auto_approve ({}) <= 1",
                j.hitl_min_confidence, j.auto_approve_threshold
            )));
        }
        if j.max_commit_attempts == 0 || j.max_publish_attempts == 0 {
            return Err(ChimeraError::Config(
                "judge attempt limits must be at least 1".into(),
            ));
        }
        for pattern in &j.unsafe_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ChimeraError::Config(format!("unsafe pattern '{pattern}' is invalid: {e}"))
            })?;
        }
        if self.mediation.idempotency_capacity == 0 {
            return Err(ChimeraError::Config(
                "mediation.idempotency_capacity must be >= 1".into(),
            ));
        }
        if self.worker.pool_size == 0 {
            return Err(ChimeraError::Config("worker.pool_size must be >= 1".into()));
        }
        if self.scheduler.backoff_base_ms > self.scheduler.backoff_cap_ms {
            return Err(ChimeraError::Config(
                "scheduler.backoff_base_ms exceeds backoff_cap_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        SwarmConfig::default().validate().unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CHIMERA_WORKER_POOL_SIZE", "8"),
            ("CHIMERA_HITL_MIN_CONFIDENCE", "0.4"),
            ("CHIMERA_TASK_DEADLINE_SECS", "none"),
        ]
        .into_iter()
        .collect();

        let mut config = SwarmConfig::default();
        config
            .apply_env_with(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.worker.pool_size, 8);
        assert_eq!(config.judge.hitl_min_confidence, 0.4);
        assert_eq!(config.scheduler.task_deadline_secs, None);
        assert_eq!(config.scheduler.backoff_base_ms, 500);
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut config = SwarmConfig::default();
        let err = config
            .apply_env_with(|k| (k == "CHIMERA_WORKER_POOL_SIZE").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHIMERA_WORKER_POOL_SIZE"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"worker": {{"pool_size": 2}}}}"#).unwrap();

        let config = SwarmConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker.pool_size, 2);
        assert_eq!(config.worker.skill_deadline_ms, 30_000);
        assert_eq!(config.judge.max_commit_attempts, 5);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = SwarmConfig::default();
        config.judge.hitl_min_confidence = 0.9;
        config.judge.auto_approve_threshold = 0.6;
        assert!(config.validate().is_err());
    }
}
