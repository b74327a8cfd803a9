//! # Error Handling
//!
//! Error types for the traffic shaping engine, built with `thiserror`.
//!
//! Shaping drops (token bucket exhaustion, full class queues) are *not* errors:
//! they are expected backpressure and are reported as
//! [`ShapingOutcome::Dropped`](crate::traffic::ShapingOutcome). The variants here
//! cover the cases a caller has to act on: configuration mistakes, lookups of
//! interfaces or classes that do not exist, and scheduler bounds.

use thiserror::Error;

/// Result type used throughout the crate
pub type ShapingResult<T> = Result<T, ShapingError>;

/// Errors surfaced by the shaping engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapingError {
    /// Configuration file or settings are invalid
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A configuration option could not be interpreted
    #[error("Invalid value '{value}' for option '{key}': {reason}")]
    InvalidOption {
        key: String,
        value: String,
        reason: String,
    },

    /// No shaper is registered for the interface
    #[error("Unknown interface: {name}")]
    UnknownInterface { name: String },

    /// A shaper is already registered for the interface
    #[error("Interface already registered: {name}")]
    InterfaceExists { name: String },

    /// The class id lies outside the scheduler's fixed class range
    #[error("Class {class_id} out of range (scheduler has {num_classes} classes)")]
    ClassOutOfRange { class_id: usize, num_classes: usize },

    /// The class slot exists but no class is registered in it
    #[error("Unknown traffic class: {class_id}")]
    UnknownClass { class_id: usize },

    /// A class is already registered in the slot
    #[error("Traffic class already registered: {class_id}")]
    ClassExists { class_id: usize },

    /// Class weights must be at least 1
    #[error("Invalid weight {weight} for class {class_id}: weight must be at least 1")]
    InvalidWeight { class_id: usize, weight: u32 },

    /// The class queue is at its maximum depth
    #[error("Queue for class {class_id} is full ({depth} packets)")]
    QueueFull { class_id: usize, depth: usize },

    /// I/O errors while reading configuration files
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl ShapingError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid option error
    pub fn invalid_option<K, V, R>(key: K, value: V, reason: R) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        Self::InvalidOption {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown interface error
    pub fn unknown_interface<S: Into<String>>(name: S) -> Self {
        Self::UnknownInterface { name: name.into() }
    }

    /// Whether the error stems from configuration input rather than runtime state
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::InvalidOption { .. }
                | Self::InvalidWeight { .. }
                | Self::ClassOutOfRange { .. }
                | Self::Yaml { .. }
        )
    }
}

impl From<std::io::Error> for ShapingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ShapingError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}
