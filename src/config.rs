use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub pregeneration: PregenerationConfig,
    pub progression: ProgressionConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a pregenerated entry
    pub ttl_secs: u64,
    /// Period of the expired entry sweep, must be shorter than the ttl
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            cleanup_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PregenerationConfig {
    /// Upper bound for one generation call, background or synchronous
    pub timeout_secs: u64,
}

impl Default for PregenerationConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl PregenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Completed units between two memory compactions
    pub compaction_interval: usize,
    /// Minimum score of every quiz unit for a course to auto-complete
    pub passing_score: f64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            compaction_interval: 10,
            passing_score: 70.0,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: Option<String>,
    /// Model used for the pro tier, falls back to `model`
    pub pro_model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("pro_model", &self.pro_model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Config {
    /// Reads the TOML file if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(model) = dotenvy::var("AI_MODEL") {
            self.llm.model = Some(model);
        }
        if let Ok(model) = dotenvy::var("AI_MODEL_PRO") {
            self.llm.pro_model = Some(model);
        }
        if let Ok(key) = dotenvy::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(url) = dotenvy::var("OPENAI_BASE_URL") {
            self.llm.base_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.cache.ttl_secs == 0 {
            return Err(Error::Config("cache.ttl_secs must be positive".into()));
        }
        if self.cache.cleanup_interval_secs == 0
            || self.cache.cleanup_interval_secs >= self.cache.ttl_secs
        {
            return Err(Error::Config(format!(
                "cache.cleanup_interval_secs ({}) must be positive and below cache.ttl_secs ({})",
                self.cache.cleanup_interval_secs, self.cache.ttl_secs
            )));
        }
        if self.pregeneration.timeout_secs == 0 {
            return Err(Error::Config("pregeneration.timeout_secs must be positive".into()));
        }
        if self.progression.compaction_interval == 0 {
            return Err(Error::Config(
                "progression.compaction_interval must be positive".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.progression.passing_score) {
            return Err(Error::Config(format!(
                "progression.passing_score ({}) must be within 0..=100",
                self.progression.passing_score
            )));
        }
        Ok(())
    }
}
