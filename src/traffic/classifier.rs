//! # Packet Classification
//!
//! Maps packets to scheduler classes. The shaper owns one classifier and
//! reduces whatever it returns modulo the class count, so a classifier can
//! never address a class that does not exist.
//!
//! Three strategies ship with the crate:
//! - `PriorityClassifier` (default): the packet's priority hint
//! - `DscpClassifier`: the DiffServ class selector bits
//! - `RuleClassifier`: ordered match rules with a fallback strategy
//!
//! Any `Fn(&Packet, usize) -> usize` closure is a classifier as well.
//! Interfaces declared in configuration pick one of the three through
//! [`ClassifierConfig`].

use crate::core::error::{ShapingError, ShapingResult};
use crate::core::types::Packet;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Strategy that picks a class for a packet
pub trait PacketClassifier: Send + Sync {
    /// Return a class id for `packet`; values at or above `num_classes` wrap
    fn classify(&self, packet: &Packet, num_classes: usize) -> usize;
}

impl<F> PacketClassifier for F
where
    F: Fn(&Packet, usize) -> usize + Send + Sync,
{
    fn classify(&self, packet: &Packet, num_classes: usize) -> usize {
        self(packet, num_classes)
    }
}

/// Classify by priority hint
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityClassifier;

impl PacketClassifier for PriorityClassifier {
    fn classify(&self, packet: &Packet, num_classes: usize) -> usize {
        packet.priority as usize % num_classes.max(1)
    }
}

/// Classify by DSCP class selector (the top three bits of the code point)
#[derive(Debug, Clone, Copy, Default)]
pub struct DscpClassifier;

impl PacketClassifier for DscpClassifier {
    fn classify(&self, packet: &Packet, num_classes: usize) -> usize {
        usize::from(packet.dscp >> 3) % num_classes.max(1)
    }
}

/// Criteria for rule matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCriteria {
    /// Exact priority hint
    Priority(u32),

    /// Inclusive DSCP range
    DscpRange { min: u8, max: u8 },

    /// Inclusive size bounds in bytes; a missing bound is open
    Size {
        #[serde(default)]
        min: Option<u32>,
        #[serde(default)]
        max: Option<u32>,
    },

    /// Exact flow id
    Flow(u32),

    /// Every nested criterion matches
    All(Vec<MatchCriteria>),

    /// At least one nested criterion matches
    Any(Vec<MatchCriteria>),

    Not(Box<MatchCriteria>),
}

impl MatchCriteria {
    pub fn matches(&self, packet: &Packet) -> bool {
        match self {
            MatchCriteria::Priority(priority) => packet.priority == *priority,

            MatchCriteria::DscpRange { min, max } => (*min..=*max).contains(&packet.dscp),

            MatchCriteria::Size { min, max } => {
                min.map_or(true, |min| packet.size >= min)
                    && max.map_or(true, |max| packet.size <= max)
            }

            MatchCriteria::Flow(flow) => packet.flow_id == Some(*flow),

            MatchCriteria::All(criteria) => criteria.iter().all(|c| c.matches(packet)),

            MatchCriteria::Any(criteria) => criteria.iter().any(|c| c.matches(packet)),

            MatchCriteria::Not(criterion) => !criterion.matches(packet),
        }
    }
}

/// A classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRule {
    /// Rule name for identification
    pub name: String,

    pub criteria: MatchCriteria,

    /// Class assigned when the criteria match
    pub class_id: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ClassRule {
    pub fn new<S: Into<String>>(name: S, criteria: MatchCriteria, class_id: usize) -> Self {
        Self {
            name: name.into(),
            criteria,
            class_id,
            enabled: true,
        }
    }
}

/// Ordered rule list; the first enabled matching rule decides the class
pub struct RuleClassifier {
    rules: Vec<ClassRule>,
    fallback: Box<dyn PacketClassifier>,
}

impl RuleClassifier {
    /// Create a rule classifier falling back to [`PriorityClassifier`]
    pub fn new(rules: Vec<ClassRule>) -> Self {
        Self {
            rules,
            fallback: Box::new(PriorityClassifier),
        }
    }

    pub fn with_fallback<C>(mut self, fallback: C) -> Self
    where
        C: PacketClassifier + 'static,
    {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn rules(&self) -> &[ClassRule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: ClassRule) {
        debug!("Added classification rule '{}' -> class {}", rule.name, rule.class_id);
        self.rules.push(rule);
    }

    /// Remove a rule by name, returning whether it existed
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.name != name);
        self.rules.len() != before
    }

    /// Enable or disable a rule by name, returning whether it exists
    pub fn toggle_rule(&mut self, name: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|rule| rule.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

impl PacketClassifier for RuleClassifier {
    fn classify(&self, packet: &Packet, num_classes: usize) -> usize {
        self.rules
            .iter()
            .find(|rule| rule.enabled && rule.criteria.matches(packet))
            .map(|rule| rule.class_id)
            .unwrap_or_else(|| self.fallback.classify(packet, num_classes))
    }
}

impl fmt::Debug for RuleClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleClassifier")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Strategy a rule list falls back to when no rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackClassifier {
    #[default]
    Priority,
    Dscp,
}

/// Classifier selection as it appears in an interface's configuration
///
/// ```yaml
/// classifier:
///   type: rules
///   fallback: dscp
///   rules:
///     - name: voice
///       criteria: { dscp_range: { min: 46, max: 46 } }
///       class_id: 7
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierConfig {
    #[default]
    Priority,
    Dscp,
    Rules {
        rules: Vec<ClassRule>,
        #[serde(default)]
        fallback: FallbackClassifier,
    },
}

impl ClassifierConfig {
    /// Check that every rule targets a class below `num_classes`
    pub fn validate(&self, num_classes: usize) -> ShapingResult<()> {
        if let ClassifierConfig::Rules { rules, .. } = self {
            if let Some(rule) = rules.iter().find(|rule| rule.class_id >= num_classes) {
                return Err(ShapingError::ClassOutOfRange {
                    class_id: rule.class_id,
                    num_classes,
                });
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn PacketClassifier> {
        match self {
            ClassifierConfig::Priority => Box::new(PriorityClassifier),
            ClassifierConfig::Dscp => Box::new(DscpClassifier),
            ClassifierConfig::Rules { rules, fallback } => {
                let classifier = RuleClassifier::new(rules.clone());
                match fallback {
                    FallbackClassifier::Priority => Box::new(classifier),
                    FallbackClassifier::Dscp => Box::new(classifier.with_fallback(DscpClassifier)),
                }
            }
        }
    }
}
