use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOverride {
    pub priority: Option<i32>,
    pub max_concurrent_agents: Option<u32>,
}

/// Every option recognised by §6, with the defaults named there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_iterations: u32,
    pub parallel_crafters: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub volume_threshold: u32,
    pub replay_size: usize,
    pub max_log_size: usize,
    pub max_session_recovery_attempts: u32,
    pub staleness_threshold_ms: u64,
    pub provider_overrides: HashMap<String, ProviderOverride>,
    pub max_tokens: u64,
    pub max_wall_time_secs: u64,
    pub max_subagent_runs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            parallel_crafters: false,
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            volume_threshold: 10,
            replay_size: 32,
            max_log_size: 500,
            max_session_recovery_attempts: 2,
            staleness_threshold_ms: 300_000,
            provider_overrides: HashMap::new(),
            max_tokens: 1_000_000,
            max_wall_time_secs: 3_600,
            max_subagent_runs: 50,
        }
    }
}

/// Layered config: defaults, overridden by an on-disk file, overridden by
/// environment variables, overridden by explicit constructor arguments.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads defaults, then merges a config file if present at `path`
    /// (JSON if the extension is `.json`, YAML otherwise), then applies
    /// environment variable overrides for the scalar fields.
    pub fn load(path: Option<&Path>) -> CoreResult<EngineConfig> {
        let mut config = EngineConfig::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)?;
                let from_file: EngineConfig = if path.extension().and_then(|e| e.to_str()) == Some("json")
                {
                    serde_json::from_str(&raw).map_err(CoreError::Serialization)?
                } else {
                    serde_yaml::from_str(&raw)
                        .map_err(|e| CoreError::InvalidConfig(e.to_string()))?
                };
                config = from_file;
            }
        }

        Self::apply_env(&mut config);
        Ok(config)
    }

    fn apply_env(config: &mut EngineConfig) {
        if let Some(v) = env_u32("CRUCIBLE_MAX_ITERATIONS") {
            config.max_iterations = v;
        }
        if let Ok(v) = std::env::var("CRUCIBLE_PARALLEL_CRAFTERS") {
            config.parallel_crafters = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_u32("CRUCIBLE_FAILURE_THRESHOLD") {
            config.failure_threshold = v;
        }
        if let Some(v) = env_u32("CRUCIBLE_SUCCESS_THRESHOLD") {
            config.success_threshold = v;
        }
        if let Some(v) = env_u64("CRUCIBLE_TIMEOUT_MS") {
            config.timeout_ms = v;
        }
        if let Some(v) = env_u32("CRUCIBLE_VOLUME_THRESHOLD") {
            config.volume_threshold = v;
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.volume_threshold, 10);
        assert_eq!(config.replay_size, 32);
        assert_eq!(config.max_log_size, 500);
    }

    #[test]
    fn env_override_applies_on_top_of_defaults() {
        std::env::set_var("CRUCIBLE_MAX_ITERATIONS", "7");
        let config = ConfigLoader::load(None).unwrap();
        assert_eq!(config.max_iterations, 7);
        std::env::remove_var("CRUCIBLE_MAX_ITERATIONS");
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_iterations": 9}"#).unwrap();
        let config = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(config.max_iterations, 9);
    }
}
