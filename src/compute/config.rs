//! Evaluator configuration, deserializable and overridable from the environment.
use super::evaluator::Evaluator;
use super::parallel::ParallelEvaluator;
use super::serial::SerialEvaluator;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_STRATEGY: &str = "DATAFLOW_EVALUATOR";
pub const ENV_WORKERS: &str = "DATAFLOW_WORKERS";
pub const ENV_POLL_INTERVAL_MS: &str = "DATAFLOW_POLL_INTERVAL_MS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Serial,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub strategy: Strategy,
    /// Worker pool size for `Parallel`; `None` means one per CPU.
    pub workers: Option<usize>,
    /// Bound on each idle wait for completions, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Serial,
            workers: None,
            poll_interval_ms: 10,
        }
    }
}

impl EvaluatorConfig {
    pub fn serial() -> Self {
        Self::default()
    }

    pub fn parallel(workers: usize) -> Self {
        Self { strategy: Strategy::Parallel, workers: Some(workers), ..Self::default() }
    }

    /// Reads `DATAFLOW_EVALUATOR` (`serial` | `parallel`), `DATAFLOW_WORKERS`
    /// and `DATAFLOW_POLL_INTERVAL_MS`. Unset or unparsable values keep their
    /// defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_STRATEGY) {
            match raw.trim().to_lowercase().as_str() {
                "serial" => config.strategy = Strategy::Serial,
                "parallel" => config.strategy = Strategy::Parallel,
                other => tracing::warn!(key = ENV_STRATEGY, value = other, "ignoring unknown strategy"),
            }
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.workers = Some(n),
                Err(_) => tracing::warn!(key = ENV_WORKERS, value = %raw, "ignoring invalid worker count"),
            }
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.poll_interval_ms = ms,
                Err(_) => tracing::warn!(key = ENV_POLL_INTERVAL_MS, value = %raw, "ignoring invalid poll interval"),
            }
        }
        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Builds an unstarted evaluator.
    pub fn build(&self) -> Box<dyn Evaluator> {
        match self.strategy {
            Strategy::Serial => Box::new(SerialEvaluator::new()),
            Strategy::Parallel => Box::new(
                ParallelEvaluator::new(self.workers.unwrap_or(0)).with_poll_interval(self.poll_interval()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EvaluatorConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EvaluatorConfig::default());
        assert_eq!(config.build().name(), "serial");
    }

    #[test]
    fn test_env_overrides() {
        let config = EvaluatorConfig::from_lookup(lookup(&[
            (ENV_STRATEGY, "Parallel"),
            (ENV_WORKERS, "3"),
            (ENV_POLL_INTERVAL_MS, "oops"),
        ]));
        assert_eq!(config.strategy, Strategy::Parallel);
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.build().name(), "parallel");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EvaluatorConfig = serde_json::from_str(r#"{"strategy": "parallel"}"#).unwrap();
        assert_eq!(config.strategy, Strategy::Parallel);
        assert_eq!(config.workers, None);
        assert_eq!(config.poll_interval_ms, 10);
    }
}
