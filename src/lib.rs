//! # router-qos - Traffic Shaping Engine
//!
//! Per-interface traffic shaping for the router simulator. Each interface
//! gets a token bucket for admission control in front of a weighted fair
//! queueing scheduler (deficit round robin) that decides departure order
//! among traffic classes. A manager keeps one shaper per interface name.
//!
//! ## Example
//! ```rust
//! use std::collections::HashMap;
//! use router_qos::{Packet, ProcessResult, ShapingAlgorithm, TrafficShapingManager};
//!
//! let manager = TrafficShapingManager::default();
//! manager.add_interface("eth0").unwrap();
//!
//! let mut options = HashMap::new();
//! options.insert("capacity".to_string(), "64000".to_string());
//! options.insert("rate".to_string(), "8000".to_string());
//! options.insert("weight_1".to_string(), "2".to_string());
//! manager
//!     .configure_interface("eth0", ShapingAlgorithm::Hybrid, &options)
//!     .unwrap();
//!
//! let result = manager.process_packet("eth0", Packet::new(1, 1500).with_priority(1));
//! assert_eq!(result, ProcessResult::Queued);
//! assert_eq!(manager.dequeue_packet("eth0").unwrap().unwrap().id, 1);
//! ```

/// Core building blocks: errors, configuration and the packet type
pub mod core;

/// Logging setup and shaping metrics
pub mod observability;

/// Token bucket, fair scheduler, classifiers, shapers and the interface manager
pub mod traffic;

/// Main error type used throughout the crate
pub use crate::core::error::{ShapingError, ShapingResult};

/// Configuration loaded from YAML with environment overrides
pub use crate::core::config::{InterfaceConfig, ShaperDefaults, ShapingConfig};

pub use crate::core::types::Packet;

pub use traffic::{
    ClassRule, ClassifierConfig, DropReason, DscpClassifier, FairScheduler, GlobalStatistics, MatchCriteria,
    PacketClassifier, PriorityClassifier, ProcessResult, RateLimiter, RuleClassifier,
    ShaperSettings, ShaperStatistics, ShapingAlgorithm, ShapingOutcome, TokenBucket,
    TrafficShaper, TrafficShapingManager, UnlimitedRate, WfqScheduler,
};
