//! # Per-Interface Traffic Shaper
//!
//! A shaper is the pipeline for one interface: a rate limiter decides whether
//! a packet is admitted, a classifier picks its class and the fair scheduler
//! holds it until a consumer dequeues it.
//!
//! The limiter and the scheduler sit behind their own `parking_lot` mutexes
//! and are always locked in that order. Counters are atomics so statistics
//! never block the packet path for long.

use super::classifier::{PacketClassifier, PriorityClassifier};
use super::scheduler::{FairScheduler, WfqScheduler};
use super::stats::ShaperStatistics;
use super::token_bucket::{RateLimiter, TokenBucket};
use crate::core::config::ShaperDefaults;
use crate::core::error::{ShapingError, ShapingResult};
use crate::core::types::Packet;
use crate::observability::metrics::ShapingMetrics;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Why a packet was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The token bucket could not cover the packet
    RateLimited,

    /// The packet's class queue was at its depth bound
    QueueFull,

    /// The packet mapped to a class slot with no registered class
    ClassUnavailable,

    /// The interface was removed while the packet was being admitted
    InterfaceRemoved,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::RateLimited => "rate_limited",
            DropReason::QueueFull => "queue_full",
            DropReason::ClassUnavailable => "class_unavailable",
            DropReason::InterfaceRemoved => "interface_removed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of offering a packet to a shaper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapingOutcome {
    /// Admitted and waiting in a class queue
    Queued,

    /// Shaper disabled; the packet is handed back untouched
    PassedThrough(Packet),

    Dropped(DropReason),
}

/// Which option group `configure_interface` applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapingAlgorithm {
    /// Bucket options only (`capacity`, `rate`, `burst_size`)
    #[serde(alias = "tbf")]
    TokenBucket,

    /// Class weights only (`weight_<N>`)
    #[serde(alias = "wfq")]
    WeightedFairQueue,

    /// Both groups
    #[default]
    Hybrid,
}

impl ShapingAlgorithm {
    fn applies_bucket(&self) -> bool {
        matches!(self, ShapingAlgorithm::TokenBucket | ShapingAlgorithm::Hybrid)
    }

    fn applies_weights(&self) -> bool {
        matches!(
            self,
            ShapingAlgorithm::WeightedFairQueue | ShapingAlgorithm::Hybrid
        )
    }
}

impl FromStr for ShapingAlgorithm {
    type Err = ShapingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token_bucket" | "tbf" => Ok(ShapingAlgorithm::TokenBucket),
            "weighted_fair_queue" | "wfq" => Ok(ShapingAlgorithm::WeightedFairQueue),
            "hybrid" => Ok(ShapingAlgorithm::Hybrid),
            other => Err(ShapingError::config(format!(
                "unknown shaping algorithm '{}'",
                other
            ))),
        }
    }
}

/// Parsed shaper configuration; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaperSettings {
    pub capacity: Option<u64>,
    pub refill_rate: Option<u64>,

    /// 0 clears the burst ceiling
    pub burst_size: Option<u64>,

    pub weights: BTreeMap<usize, u32>,
}

impl ShaperSettings {
    pub const CAPACITY: &'static str = "capacity";
    pub const RATE: &'static str = "rate";
    pub const BURST_SIZE: &'static str = "burst_size";
    pub const WEIGHT_PREFIX: &'static str = "weight_";

    /// Parse a string option map for a shaper with `num_classes` classes
    ///
    /// Every key is validated before anything is returned, so a bad entry
    /// anywhere rejects the whole map. Groups the algorithm does not select
    /// are parsed and then left out.
    pub fn from_options(
        algorithm: ShapingAlgorithm,
        options: &HashMap<String, String>,
        num_classes: usize,
    ) -> ShapingResult<Self> {
        let mut settings = Self::default();

        for (key, value) in options {
            match key.as_str() {
                Self::CAPACITY => settings.capacity = Some(parse_bytes(key, value)?),
                Self::RATE => settings.refill_rate = Some(parse_bytes(key, value)?),
                Self::BURST_SIZE => settings.burst_size = Some(parse_bytes(key, value)?),
                _ => {
                    if let Some(suffix) = key.strip_prefix(Self::WEIGHT_PREFIX) {
                        let (class_id, weight) = parse_weight(key, suffix, value, num_classes)?;
                        settings.weights.insert(class_id, weight);
                    } else {
                        warn!("Ignoring unrecognized shaping option '{}'", key);
                    }
                }
            }
        }

        if !algorithm.applies_bucket() {
            settings.capacity = None;
            settings.refill_rate = None;
            settings.burst_size = None;
        }
        if !algorithm.applies_weights() {
            settings.weights.clear();
        }

        Ok(settings)
    }

    pub fn is_empty(&self) -> bool {
        self.capacity.is_none()
            && self.refill_rate.is_none()
            && self.burst_size.is_none()
            && self.weights.is_empty()
    }
}

fn parse_bytes(key: &str, value: &str) -> ShapingResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ShapingError::invalid_option(key, value, e.to_string()))
}

fn parse_weight(
    key: &str,
    suffix: &str,
    value: &str,
    num_classes: usize,
) -> ShapingResult<(usize, u32)> {
    let class_id = suffix
        .parse::<usize>()
        .map_err(|_| ShapingError::invalid_option(key, value, "class suffix is not an integer"))?;
    if class_id >= num_classes {
        return Err(ShapingError::ClassOutOfRange {
            class_id,
            num_classes,
        });
    }

    let weight = value
        .trim()
        .parse::<u32>()
        .map_err(|e| ShapingError::invalid_option(key, value, e.to_string()))?;
    if weight == 0 {
        return Err(ShapingError::InvalidWeight { class_id, weight });
    }

    Ok((class_id, weight))
}

#[derive(Debug, Default)]
struct ShaperCounters {
    packets_processed: AtomicU64,
    bytes_processed: AtomicU64,
    packets_queued: AtomicU64,
    bytes_queued: AtomicU64,
    packets_passed_through: AtomicU64,
    bytes_passed_through: AtomicU64,
    dropped_rate_limited: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_class_unavailable: AtomicU64,
    dropped_interface_removed: AtomicU64,
    bytes_dropped: AtomicU64,
    packets_dequeued: AtomicU64,
    bytes_dequeued: AtomicU64,
    packets_discarded: AtomicU64,
}

impl ShaperCounters {
    fn reset(&self) {
        for counter in [
            &self.packets_processed,
            &self.bytes_processed,
            &self.packets_queued,
            &self.bytes_queued,
            &self.packets_passed_through,
            &self.bytes_passed_through,
            &self.dropped_rate_limited,
            &self.dropped_queue_full,
            &self.dropped_class_unavailable,
            &self.dropped_interface_removed,
            &self.bytes_dropped,
            &self.packets_dequeued,
            &self.bytes_dequeued,
            &self.packets_discarded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Token bucket admission in front of a fair scheduler, for one interface
pub struct TrafficShaper<L = TokenBucket, S = WfqScheduler> {
    name: String,
    limiter: Mutex<L>,
    scheduler: Mutex<S>,
    classifier: RwLock<Box<dyn PacketClassifier>>,
    enabled: AtomicBool,
    closed: AtomicBool,
    counters: ShaperCounters,
    metrics: ShapingMetrics,
}

impl TrafficShaper {
    /// Create a disabled shaper with a full bucket and empty queues
    pub fn new<N: Into<String>>(name: N, defaults: &ShaperDefaults) -> Self {
        let mut bucket = TokenBucket::new(defaults.capacity, defaults.refill_rate);
        if let Some(burst) = defaults.burst_size {
            bucket.set_burst_size(burst);
        }
        let scheduler = WfqScheduler::new(
            defaults.num_classes,
            defaults.max_queue_depth,
            defaults.base_quantum,
        );

        Self::with_parts(name, bucket, scheduler)
    }
}

impl<L, S> TrafficShaper<L, S>
where
    L: RateLimiter,
    S: FairScheduler,
{
    /// Assemble a disabled shaper from an explicit limiter and scheduler
    pub fn with_parts<N: Into<String>>(name: N, limiter: L, scheduler: S) -> Self {
        let name = name.into();
        let metrics = ShapingMetrics::new(&name);
        Self {
            name,
            limiter: Mutex::new(limiter),
            scheduler: Mutex::new(scheduler),
            classifier: RwLock::new(Box::new(PriorityClassifier)),
            enabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: ShaperCounters::default(),
            metrics,
        }
    }

    /// Replace the classifier
    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: PacketClassifier + 'static,
    {
        *self.classifier.get_mut() = Box::new(classifier);
        self
    }

    /// Swap the classifier of a running shaper; queued packets keep their class
    pub fn set_classifier<C>(&self, classifier: C)
    where
        C: PacketClassifier + 'static,
    {
        self.set_classifier_boxed(Box::new(classifier));
    }

    pub fn set_classifier_boxed(&self, classifier: Box<dyn PacketClassifier>) {
        *self.classifier.write() = classifier;
        debug!(interface = %self.name, "Replaced packet classifier");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable shaping
    ///
    /// Disabling leaves queued packets where they are; they are released
    /// again once the shaper is re-enabled, or removed with [`drain`](Self::drain).
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            info!(
                interface = %self.name,
                "Traffic shaper {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn num_classes(&self) -> usize {
        self.scheduler.lock().num_classes()
    }

    /// Offer a packet to the shaper
    pub fn process_packet(&self, packet: Packet) -> ShapingOutcome {
        let size = packet.len_bytes();
        self.counters.packets_processed.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_processed.fetch_add(size, Ordering::Relaxed);

        if !self.is_enabled() {
            self.counters.packets_passed_through.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes_passed_through.fetch_add(size, Ordering::Relaxed);
            self.metrics.record_passed_through();
            return ShapingOutcome::PassedThrough(packet);
        }

        if !self.limiter.lock().consume(size) {
            return self.record_drop(&packet, DropReason::RateLimited);
        }

        // Tokens spent here are not refunded if the queue turns the packet away
        let mut scheduler = self.scheduler.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(scheduler);
            return self.record_drop(&packet, DropReason::InterfaceRemoved);
        }
        let num_classes = scheduler.num_classes().max(1);
        let class_id = self.classifier.read().classify(&packet, num_classes) % num_classes;
        let packet_id = packet.id;
        let result = scheduler.enqueue(class_id, packet);
        drop(scheduler);

        match result {
            Ok(()) => {
                self.counters.packets_queued.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_queued.fetch_add(size, Ordering::Relaxed);
                self.metrics.record_queued(size);
                ShapingOutcome::Queued
            }
            Err(err) => {
                let reason = match err {
                    ShapingError::QueueFull { .. } => DropReason::QueueFull,
                    _ => DropReason::ClassUnavailable,
                };
                debug!(
                    interface = %self.name,
                    packet_id,
                    size,
                    class_id,
                    "Packet dropped: {}",
                    err
                );
                self.count_drop(size, reason);
                ShapingOutcome::Dropped(reason)
            }
        }
    }

    fn record_drop(&self, packet: &Packet, reason: DropReason) -> ShapingOutcome {
        debug!(
            interface = %self.name,
            packet_id = packet.id,
            size = packet.size,
            "Packet dropped: {}",
            reason
        );
        self.count_drop(packet.len_bytes(), reason);
        ShapingOutcome::Dropped(reason)
    }

    fn count_drop(&self, size: u64, reason: DropReason) {
        let counter = match reason {
            DropReason::RateLimited => &self.counters.dropped_rate_limited,
            DropReason::QueueFull => &self.counters.dropped_queue_full,
            DropReason::ClassUnavailable => &self.counters.dropped_class_unavailable,
            DropReason::InterfaceRemoved => &self.counters.dropped_interface_removed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_dropped.fetch_add(size, Ordering::Relaxed);
        self.metrics.record_dropped(reason, size);
    }

    /// Next packet in fairness order; `None` while disabled or when empty
    pub fn dequeue_packet(&self) -> Option<Packet> {
        if !self.is_enabled() {
            return None;
        }
        let packet = self.scheduler.lock().dequeue()?;
        self.count_dequeue(&packet);
        Some(packet)
    }

    fn count_dequeue(&self, packet: &Packet) {
        let size = packet.len_bytes();
        self.counters.packets_dequeued.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_dequeued.fetch_add(size, Ordering::Relaxed);
        self.metrics.record_dequeued(size);
    }

    /// Remove every queued packet in fairness order, enabled or not
    pub fn drain(&self) -> Vec<Packet> {
        let drained: Vec<Packet> = {
            let mut scheduler = self.scheduler.lock();
            std::iter::from_fn(|| scheduler.dequeue()).collect()
        };
        for packet in &drained {
            self.count_dequeue(packet);
        }
        if !drained.is_empty() {
            debug!(interface = %self.name, count = drained.len(), "Drained shaper queues");
        }
        drained
    }

    /// Refuse further admissions and discard every queued packet
    ///
    /// The closed flag is set under the scheduler lock, the same lock
    /// `process_packet` checks it under before enqueueing. Returns how many
    /// packets were thrown away.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut scheduler = self.scheduler.lock();
            self.closed.store(true, Ordering::Release);
            scheduler.clear()
        };
        self.count_discarded(discarded);
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn count_discarded(&self, discarded: usize) {
        if discarded > 0 {
            self.counters
                .packets_discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
            self.metrics.record_discarded(discarded as u64);
        }
    }

    pub fn add_class(&self, class_id: usize, weight: u32) -> ShapingResult<()> {
        self.scheduler.lock().add_class(class_id, weight)
    }

    /// Remove a class; packets still queued in it are discarded and counted
    pub fn remove_class(&self, class_id: usize) -> ShapingResult<usize> {
        let discarded = self.scheduler.lock().remove_class(class_id)?;
        self.count_discarded(discarded);
        Ok(discarded)
    }

    pub fn queue_len(&self, class_id: usize) -> usize {
        self.scheduler.lock().queue_len(class_id)
    }

    pub fn total_queued(&self) -> usize {
        self.scheduler.lock().total_queued()
    }

    pub fn available_tokens(&self) -> u64 {
        self.limiter.lock().available_tokens()
    }

    pub fn set_class_weight(&self, class_id: usize, weight: u32) -> ShapingResult<()> {
        self.scheduler.lock().set_class_weight(class_id, weight)
    }

    /// Apply parsed settings; either all of them take effect or none do
    pub fn configure(&self, settings: &ShaperSettings) -> ShapingResult<()> {
        let mut limiter = self.limiter.lock();
        let mut scheduler = self.scheduler.lock();

        let num_classes = scheduler.num_classes();
        for (&class_id, &weight) in &settings.weights {
            if class_id >= num_classes {
                return Err(ShapingError::ClassOutOfRange {
                    class_id,
                    num_classes,
                });
            }
            if weight == 0 {
                return Err(ShapingError::InvalidWeight { class_id, weight });
            }
            if !scheduler.has_class(class_id) {
                return Err(ShapingError::UnknownClass { class_id });
            }
        }

        if let Some(capacity) = settings.capacity {
            limiter.set_capacity(capacity);
        }
        if let Some(rate) = settings.refill_rate {
            limiter.set_refill_rate(rate);
        }
        if let Some(burst) = settings.burst_size {
            limiter.set_burst_size(burst);
        }
        for (&class_id, &weight) in &settings.weights {
            scheduler.set_class_weight(class_id, weight)?;
        }

        Ok(())
    }

    /// Refill the bucket, empty the queues and zero every counter
    ///
    /// Configuration and the enabled flag are kept.
    pub fn reset(&self) {
        let mut limiter = self.limiter.lock();
        let mut scheduler = self.scheduler.lock();
        limiter.reset();
        scheduler.reset();
        self.counters.reset();
    }

    pub fn statistics(&self) -> ShaperStatistics {
        let limiter = self.limiter.lock().statistics();
        let scheduler = self.scheduler.lock().statistics();
        let c = &self.counters;

        let dropped_rate_limited = c.dropped_rate_limited.load(Ordering::Relaxed);
        let dropped_queue_full = c.dropped_queue_full.load(Ordering::Relaxed);
        let dropped_class_unavailable = c.dropped_class_unavailable.load(Ordering::Relaxed);
        let dropped_interface_removed = c.dropped_interface_removed.load(Ordering::Relaxed);

        ShaperStatistics {
            enabled: self.is_enabled(),
            packets_processed: c.packets_processed.load(Ordering::Relaxed),
            bytes_processed: c.bytes_processed.load(Ordering::Relaxed),
            packets_queued: c.packets_queued.load(Ordering::Relaxed),
            bytes_queued: c.bytes_queued.load(Ordering::Relaxed),
            packets_passed_through: c.packets_passed_through.load(Ordering::Relaxed),
            bytes_passed_through: c.bytes_passed_through.load(Ordering::Relaxed),
            packets_dropped: dropped_rate_limited
                + dropped_queue_full
                + dropped_class_unavailable
                + dropped_interface_removed,
            bytes_dropped: c.bytes_dropped.load(Ordering::Relaxed),
            dropped_rate_limited,
            dropped_queue_full,
            dropped_class_unavailable,
            dropped_interface_removed,
            packets_dequeued: c.packets_dequeued.load(Ordering::Relaxed),
            bytes_dequeued: c.bytes_dequeued.load(Ordering::Relaxed),
            packets_discarded: c.packets_discarded.load(Ordering::Relaxed),
            limiter,
            scheduler,
        }
    }
}

impl<L, S> fmt::Debug for TrafficShaper<L, S>
where
    L: RateLimiter,
    S: FairScheduler,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficShaper")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .field("closed", &self.is_closed())
            .field("limiter", &*self.limiter.lock())
            .finish_non_exhaustive()
    }
}
