// Copyright 2025 Martin Pool

//! `swemutate.toml` configuration, overridden by `SWEMUTATE_*` environment
//! variables (spec §6's External Interfaces env-var list).
//!
//! Grounded on the teacher's own `config.rs`: a `#[serde(default,
//! deny_unknown_fields)]` struct read from TOML, so a typo'd key is a hard
//! error rather than a silently-ignored one.

use std::env;
use std::fs::read_to_string;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub model: ModelConfig,
    pub concurrency: ConcurrencyConfig,
    pub budgets: BudgetsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: ModelConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            budgets: BudgetsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model_id: String,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            endpoint: "https://api.openai.com/v1/completions".to_owned(),
            model_id: "gpt-4o-mini".to_owned(),
            max_retries: 3,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    pub exec_concurrency: usize,
    pub model_concurrency: usize,
    pub callgraph_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        ConcurrencyConfig {
            exec_concurrency: (num_cpus_estimate() / 2).max(1),
            model_concurrency: 16,
            callgraph_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetsConfig {
    pub max_iterations: usize,
    pub max_mutations: usize,
    pub max_cost: f64,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        BudgetsConfig {
            max_iterations: 200,
            max_mutations: 20,
            max_cost: 200.0,
        }
    }
}

impl Config {
    pub fn read_file(path: &Utf8Path) -> Result<Config> {
        let toml = read_to_string(path).with_context(|| format!("read config {path}"))?;
        toml::de::from_str(&toml).with_context(|| format!("parse toml from {path}"))
    }

    /// Read `path` if given and it exists, otherwise fall back to defaults;
    /// either way, environment variables take precedence over both.
    pub fn load(path: Option<&Utf8Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) if path.exists() => Config::read_file(path)?,
            _ => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = parse_env("SWEMUTATE_EXEC_CONCURRENCY") {
            self.concurrency.exec_concurrency = v;
        }
        if let Some(v) = parse_env("SWEMUTATE_MODEL_CONCURRENCY") {
            self.concurrency.model_concurrency = v;
        }
        if let Some(v) = parse_env("SWEMUTATE_CALLGRAPH_TIMEOUT_SECS") {
            self.concurrency.callgraph_timeout_secs = v;
        }
        if let Ok(v) = env::var("SWEMUTATE_MODEL_ID") {
            self.model.model_id = v;
        }
        if let Ok(v) = env::var("SWEMUTATE_MODEL_ENDPOINT") {
            self.model.endpoint = v;
        }
    }

    pub fn callgraph_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.callgraph_timeout_secs)
    }

    pub fn model_request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// A cheap fallback CPU-count estimate, used only to size the default exec
/// semaphore before any runtime is started. `std::thread::available_parallelism`
/// already does the right thing across platforms without adding a
/// dependency the teacher didn't already carry.
fn num_cpus_estimate() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_sections_fall_back_to_defaults() {
        let config = Config::default();
        let reparsed: Config = toml::de::from_str(
            r#"
            [model]
            [concurrency]
            [budgets]
            "#,
        )
        .unwrap();
        assert_eq!(reparsed.model.model_id, config.model.model_id);
    }

    #[test]
    fn unknown_field_is_a_hard_error() {
        let result: Result<Config, _> = toml::de::from_str("unknown_top_level = true");
        assert!(result.is_err());
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("SWEMUTATE_MODEL_ID", "test-override-model");
        let config = Config::load(None).unwrap();
        assert_eq!(config.model.model_id, "test-override-model");
        std::env::remove_var("SWEMUTATE_MODEL_ID");
    }
}
