use crate::error::{Error, Result};
use crate::policy::PolicyOverrides;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluationConfig {
    /// Trim over-long Ramadan meetings instead of blocking them.
    #[serde(default = "enabled")]
    pub allow_trimming: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            allow_trimming: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// Worker threads for rescans; 0 means one per available core.
    #[serde(default)]
    pub workers: usize,
}

impl BatchConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Deadline for a single prayer-time lookup.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    /// Per-category policy overrides for the organization.
    #[serde(default)]
    pub policies: PolicyOverrides,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.providers.timeout_ms == 0 {
            return Err(Error::Config("providers.timeout_ms must be positive".into()));
        }
        for (category, policy) in &self.policies {
            if policy.max_duration_mins == Some(0) {
                return Err(Error::Config(format!(
                    "policies.{}.max_duration_mins must be positive",
                    category
                )));
            }
        }
        Ok(())
    }
}

fn enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    2_000
}
