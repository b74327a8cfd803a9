//! # Traffic Shaping Module
//!
//! Components, leaf first:
//!
//! - `TokenBucket`: lazy-refill rate limiter behind the `RateLimiter` trait
//! - `WfqScheduler`: deficit round robin over fixed classes behind `FairScheduler`
//! - `PacketClassifier`: strategies mapping packets to classes
//! - `TrafficShaper`: one interface's admission, classification and queueing
//! - `TrafficShapingManager`: interface name to shaper registry

pub mod classifier;
pub mod manager;
pub mod scheduler;
pub mod shaper;
pub mod stats;
pub mod token_bucket;

pub use classifier::{
    ClassRule, ClassifierConfig, DscpClassifier, FallbackClassifier, MatchCriteria,
    PacketClassifier, PriorityClassifier, RuleClassifier,
};
pub use manager::{ProcessResult, TrafficShapingManager};
pub use scheduler::{FairScheduler, WfqScheduler};
pub use shaper::{DropReason, ShaperSettings, ShapingAlgorithm, ShapingOutcome, TrafficShaper};
pub use stats::{
    ClassStatistics, GlobalStatistics, LimiterStatistics, SchedulerStatistics, ShaperStatistics,
};
pub use token_bucket::{RateLimiter, TokenBucket, UnlimitedRate};
