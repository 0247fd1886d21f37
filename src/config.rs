//! Layered configuration
//!
//! Built-in defaults, then an optional TOML file, then `COMBATD_*`
//! environment variables (`__` separates nesting, e.g.
//! `COMBATD_COMBAT__TICK_INTERVAL_MS=250`).

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::SandboxConfig;
use crate::combat::HasteRule;

static NAMESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid namespace regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub combat: CombatConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    /// Shared loop period
    pub tick_interval_ms: u64,
    /// Default round time for started encounters; zero or negative means
    /// rounds are driven by the shared loop instead of per-instance timers
    pub round_time_ms: i64,
    pub haste_threshold: i32,
    pub max_extra_attacks: u32,
    /// Fixed seed for reproducible fights
    pub rng_seed: Option<u64>,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            round_time_ms: 3000,
            haste_threshold: 100,
            max_extra_attacks: 10,
            rng_seed: None,
        }
    }
}

impl CombatConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn round_time(&self) -> Option<Duration> {
        (self.round_time_ms > 0).then(|| Duration::from_millis(self.round_time_ms as u64))
    }

    pub fn haste_rule(&self) -> HasteRule {
        HasteRule {
            per_extra_attack: self.haste_threshold,
            max_extra: self.max_extra_attacks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub sweep_interval_ms: u64,
    /// Namespaces scripted behaviors may be registered under
    pub script_namespaces: Vec<String>,
    pub sandbox: SandboxSettings,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 2000,
            script_namespaces: vec!["ai".to_string()],
            sandbox: SandboxSettings::default(),
        }
    }
}

impl AiConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub max_instructions: u64,
    pub max_memory: usize,
    pub timeout_ms: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let defaults = SandboxConfig::default();
        Self {
            max_instructions: defaults.max_instructions,
            max_memory: defaults.max_memory,
            timeout_ms: defaults.timeout.as_millis() as u64,
        }
    }
}

impl From<&SandboxSettings> for SandboxConfig {
    fn from(settings: &SandboxSettings) -> Self {
        SandboxConfig {
            max_instructions: settings.max_instructions,
            max_memory: settings.max_memory,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

impl Config {
    /// The provider stack, exposed so hosts can merge in their own layers
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("COMBATD_").split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.combat.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "combat.tick_interval_ms must be positive".into(),
            ));
        }
        if self.combat.haste_threshold <= 0 {
            return Err(ConfigError::Invalid(
                "combat.haste_threshold must be positive".into(),
            ));
        }
        if self.ai.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "ai.sweep_interval_ms must be positive".into(),
            ));
        }
        if self.ai.script_namespaces.is_empty() {
            return Err(ConfigError::Invalid(
                "ai.script_namespaces must not be empty".into(),
            ));
        }
        if let Some(bad) = self
            .ai
            .script_namespaces
            .iter()
            .find(|ns| !NAMESPACE.is_match(ns))
        {
            return Err(ConfigError::Invalid(format!(
                "'{}' is not a valid script namespace",
                bad
            )));
        }
        Ok(())
    }
}
