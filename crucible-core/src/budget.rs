use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Iteration/token/wall-time/sub-agent-run accounting for one pipeline run
/// (§4.7's `maxIterations` loop, generalized to the other budget
/// dimensions). Stages update it through [`crate::stores`]-adjacent
/// call sites rather than a shared mutable counter; the coordinator only
/// reads `is_exceeded`/`usage_percentage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub max_iterations: u32,
    pub iterations_used: u32,
    pub max_tokens: u64,
    pub tokens_used: u64,
    pub max_wall_time_secs: u64,
    pub started_at: DateTime<Utc>,
    pub max_subagent_runs: u32,
    pub subagent_runs_used: u32,
    pub exceeded: bool,
    pub exceeded_reason: Option<String>,
}

impl Budget {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            iterations_used: 0,
            max_tokens: config.max_tokens,
            tokens_used: 0,
            max_wall_time_secs: config.max_wall_time_secs,
            started_at: Utc::now(),
            max_subagent_runs: config.max_subagent_runs,
            subagent_runs_used: 0,
            exceeded: false,
            exceeded_reason: None,
        }
    }

    pub fn record_iteration(&mut self) {
        self.iterations_used += 1;
    }

    pub fn record_tokens(&mut self, tokens: u64) {
        self.tokens_used += tokens;
    }

    pub fn record_subagent_run(&mut self) {
        self.subagent_runs_used += 1;
    }

    fn wall_time_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// True once any dimension has run out, or the run was flagged directly
    /// via [`Budget::exceeded`].
    pub fn is_exceeded(&self) -> bool {
        self.exceeded
            || self.iterations_used >= self.max_iterations
            || self.tokens_used >= self.max_tokens
            || self.wall_time_secs() >= self.max_wall_time_secs
            || self.subagent_runs_used >= self.max_subagent_runs
    }

    /// Fraction (0.0-1.0+) of the most-used dimension.
    pub fn usage_percentage(&self) -> f64 {
        let iter_pct = self.iterations_used as f64 / self.max_iterations.max(1) as f64;
        let token_pct = self.tokens_used as f64 / self.max_tokens.max(1) as f64;
        let time_pct = self.wall_time_secs() as f64 / self.max_wall_time_secs.max(1) as f64;
        let agent_pct = self.subagent_runs_used as f64 / self.max_subagent_runs.max(1) as f64;

        iter_pct.max(token_pct).max(time_pct).max(agent_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_exceeded_fresh() {
        let budget = Budget::from_config(&EngineConfig::default());
        assert!(!budget.is_exceeded());
        assert_eq!(budget.usage_percentage(), 0.0);
    }

    #[test]
    fn iterations_exhausted_marks_exceeded() {
        let mut budget = Budget::from_config(&EngineConfig::default());
        for _ in 0..budget.max_iterations {
            budget.record_iteration();
        }
        assert!(budget.is_exceeded());
        assert_eq!(budget.usage_percentage(), 1.0);
    }

    #[test]
    fn subagent_runs_tracked_independently_of_iterations() {
        let mut budget = Budget::from_config(&EngineConfig::default());
        budget.record_subagent_run();
        budget.record_tokens(10);
        assert!(!budget.is_exceeded());
        assert!(budget.usage_percentage() > 0.0);
    }
}
