use std::path::Path;

use anyhow::{Context, Result};
use rivulet::SchedulerConfig;
use serde::Deserialize;
use tracing::debug;

use crate::cli::SchedulerOverrides;

/// On-disk configuration.
///
/// ```toml
/// [scheduler]
/// max_concurrent_requests = 4
/// strategy = "aggressive-future"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Scheduler config with command-line overrides applied.
    pub fn scheduler_config(&self, overrides: &SchedulerOverrides) -> SchedulerConfig {
        let mut config = self.scheduler.clone();
        if let Some(max) = overrides.max_concurrent {
            config.max_concurrent_requests = max;
        }
        if let Some(retries) = overrides.max_retries {
            config.max_retry_attempts = retries;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(rate) = overrides.max_rate {
            config.max_requests_per_window = rate;
        }
        if let Some(window_ms) = overrides.rate_window_ms {
            config.rate_window_ms = window_ms;
        }
        if let Some(strategy) = overrides.strategy {
            config.set_strategy(strategy);
        }
        if let Some(window_ms) = overrides.window_ms {
            config.as_needed_window_ms = window_ms;
        }
        config.normalized()
    }
}
