//! # Configuration Module
//!
//! Shaping configuration loaded from YAML (or JSON) with environment variable
//! overrides and validation.
//!
//! ## Layout
//! ```yaml
//! defaults:
//!   num_classes: 8
//!   max_queue_depth: 1000
//!   base_quantum: 1500
//!   capacity: 1000
//!   refill_rate: 100
//! logging:
//!   level: info
//!   format: text
//! interfaces:
//!   eth0:
//!     algorithm: hybrid
//!     options:
//!       capacity: 64000
//!       rate: 8000
//!       weight_0: 4
//!     classifier:
//!       type: dscp
//! ```
//!
//! Interface options use the same string map accepted by
//! `TrafficShapingManager::configure_interface`; numeric YAML scalars are
//! converted to strings while loading.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::core::error::{ShapingError, ShapingResult};
use crate::observability::config::LogConfig;
use crate::traffic::scheduler::{
    DEFAULT_BASE_QUANTUM, DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_NUM_CLASSES,
};
use crate::traffic::{ClassifierConfig, ShaperSettings, ShapingAlgorithm};

/// Default bucket capacity in bytes
pub const DEFAULT_CAPACITY: u64 = 1000;

/// Default refill rate in bytes per second
pub const DEFAULT_REFILL_RATE: u64 = 100;

/// Top-level shaping configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapingConfig {
    /// Settings every new interface shaper starts from
    pub defaults: ShaperDefaults,

    pub logging: LogConfig,

    /// Interfaces registered and configured by `apply_config`
    pub interfaces: HashMap<String, InterfaceConfig>,
}

/// Starting point for a freshly registered shaper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaperDefaults {
    pub num_classes: usize,
    pub max_queue_depth: usize,

    /// Bytes of credit per round for a weight-1 class
    pub base_quantum: u64,

    /// Bucket capacity in bytes
    pub capacity: u64,

    /// Refill rate in bytes per second
    pub refill_rate: u64,

    /// Per-admission ceiling in bytes
    pub burst_size: Option<u64>,
}

impl Default for ShaperDefaults {
    fn default() -> Self {
        Self {
            num_classes: DEFAULT_NUM_CLASSES,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            base_quantum: DEFAULT_BASE_QUANTUM,
            capacity: DEFAULT_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            burst_size: None,
        }
    }
}

/// Declared shaping for one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default)]
    pub algorithm: ShapingAlgorithm,

    #[serde(default, deserialize_with = "deserialize_options")]
    pub options: HashMap<String, String>,

    /// How packets are mapped to classes; priority hint unless configured
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Whether the shaper stays enabled once configured
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            algorithm: ShapingAlgorithm::default(),
            options: HashMap::new(),
            classifier: ClassifierConfig::default(),
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn deserialize_options<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_yaml::Value;

    let raw = HashMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(<D::Error as de::Error>::custom(format!(
                        "option '{}' must be a scalar value",
                        key
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

impl ShapingConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ShapingResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> ShapingResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let mut config: ShapingConfig = serde_json::from_str(&content)
            .map_err(|e| ShapingError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without applying overrides or validation
    pub fn from_yaml_str(content: &str) -> ShapingResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides
    ///
    /// Recognized variables: `ROUTER_QOS_NUM_CLASSES`,
    /// `ROUTER_QOS_MAX_QUEUE_DEPTH`, `ROUTER_QOS_BASE_QUANTUM` and
    /// `ROUTER_QOS_LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) -> ShapingResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ShapingResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> ShapingResult<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e| ShapingError::config(format!("Invalid {}: {}", key, e)))
        }

        if let Some(value) = lookup("ROUTER_QOS_NUM_CLASSES") {
            self.defaults.num_classes = parse("ROUTER_QOS_NUM_CLASSES", &value)?;
        }

        if let Some(value) = lookup("ROUTER_QOS_MAX_QUEUE_DEPTH") {
            self.defaults.max_queue_depth = parse("ROUTER_QOS_MAX_QUEUE_DEPTH", &value)?;
        }

        if let Some(value) = lookup("ROUTER_QOS_BASE_QUANTUM") {
            self.defaults.base_quantum = parse("ROUTER_QOS_BASE_QUANTUM", &value)?;
        }

        if let Some(level) = lookup("ROUTER_QOS_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> ShapingResult<()> {
        let mut errors = Vec::new();

        if self.defaults.num_classes == 0 {
            errors.push("num_classes must be greater than 0".to_string());
        }
        if self.defaults.max_queue_depth == 0 {
            errors.push("max_queue_depth must be greater than 0".to_string());
        }
        if self.defaults.base_quantum == 0 {
            errors.push("base_quantum must be greater than 0".to_string());
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => errors.push(format!("Invalid log level: {}", other)),
        }

        for (name, interface) in &self.interfaces {
            if name.trim().is_empty() {
                errors.push("Interface names cannot be empty".to_string());
                continue;
            }
            if let Err(e) = ShaperSettings::from_options(
                interface.algorithm,
                &interface.options,
                self.defaults.num_classes,
            ) {
                errors.push(format!("Interface '{}': {}", name, e));
            }
            if let Err(e) = interface.classifier.validate(self.defaults.num_classes) {
                errors.push(format!("Interface '{}' classifier: {}", name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShapingError::config(format!(
                "Configuration validation failed: {}",
                errors.join(", ")
            )))
        }
    }
}
