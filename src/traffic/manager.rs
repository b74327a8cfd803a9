//! # Traffic Shaping Manager
//!
//! Registry of per-interface shapers. The manager creates and destroys
//! shapers, applies configuration maps to them, routes packets by interface
//! name and keeps lifetime totals that survive interface removal.
//!
//! The registry is a sharded `DashMap`. Registration and removal lock one
//! shard for writing; the packet path only clones the shaper's `Arc` under a
//! shard read lock and then works against that shaper's own locks, so traffic
//! on different interfaces does not contend.

use super::classifier::PacketClassifier;
use super::shaper::{DropReason, ShaperSettings, ShapingAlgorithm, ShapingOutcome, TrafficShaper};
use super::stats::{GlobalStatistics, ShaperStatistics};
use crate::core::config::{ShaperDefaults, ShapingConfig};
use crate::core::error::{ShapingError, ShapingResult};
use crate::core::types::Packet;
use crate::observability::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of routing a packet through the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Admitted and queued on the interface
    Queued,

    /// The interface's shaper is disabled; the packet is handed back
    PassedThrough(Packet),

    Dropped(DropReason),

    /// No shaper is registered for the interface; the packet is handed back
    UnknownInterface(Packet),
}

impl ProcessResult {
    /// Whether the interface's shaper took the packet (queued or passed through)
    pub fn is_shaped(&self) -> bool {
        matches!(self, ProcessResult::Queued | ProcessResult::PassedThrough(_))
    }
}

impl From<ShapingOutcome> for ProcessResult {
    fn from(outcome: ShapingOutcome) -> Self {
        match outcome {
            ShapingOutcome::Queued => ProcessResult::Queued,
            ShapingOutcome::PassedThrough(packet) => ProcessResult::PassedThrough(packet),
            ShapingOutcome::Dropped(reason) => ProcessResult::Dropped(reason),
        }
    }
}

#[derive(Debug, Default)]
struct GlobalCounters {
    interfaces_added: AtomicU64,
    interfaces_removed: AtomicU64,
    packets_processed: AtomicU64,
    bytes_processed: AtomicU64,
    packets_queued: AtomicU64,
    packets_passed_through: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_dropped: AtomicU64,
    packets_dequeued: AtomicU64,
    bytes_dequeued: AtomicU64,
    packets_discarded: AtomicU64,
    unknown_interface_packets: AtomicU64,
}

impl GlobalCounters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn count_dequeued(&self, packet: &Packet) {
        Self::add(&self.packets_dequeued, 1);
        Self::add(&self.bytes_dequeued, packet.len_bytes());
    }
}

/// Interface name to shaper registry
pub struct TrafficShapingManager {
    shapers: DashMap<String, Arc<TrafficShaper>>,
    defaults: ShaperDefaults,
    global: GlobalCounters,
}

impl Default for TrafficShapingManager {
    fn default() -> Self {
        Self::new(ShaperDefaults::default())
    }
}

impl TrafficShapingManager {
    /// Create an empty manager; new shapers start from `defaults`
    pub fn new(defaults: ShaperDefaults) -> Self {
        metrics::describe_metrics();
        Self {
            shapers: DashMap::new(),
            defaults,
            global: GlobalCounters::default(),
        }
    }

    /// Create a manager from a loaded configuration and register its interfaces
    pub fn from_config(config: &ShapingConfig) -> ShapingResult<Self> {
        let manager = Self::new(config.defaults.clone());
        manager.apply_config(config)?;
        Ok(manager)
    }

    pub fn defaults(&self) -> &ShaperDefaults {
        &self.defaults
    }

    fn shaper(&self, name: &str) -> ShapingResult<Arc<TrafficShaper>> {
        self.shapers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ShapingError::unknown_interface(name))
    }

    fn update_gauge(&self) {
        metrics::active_interfaces_gauge().set(self.shapers.len() as f64);
    }

    /// Register a disabled shaper for `name`
    pub fn add_interface(&self, name: &str) -> ShapingResult<()> {
        self.insert_shaper(name, TrafficShaper::new(name, &self.defaults))
    }

    /// Register a disabled shaper for `name` that classifies with `classifier`
    pub fn add_interface_with_classifier<C>(&self, name: &str, classifier: C) -> ShapingResult<()>
    where
        C: PacketClassifier + 'static,
    {
        let shaper = TrafficShaper::new(name, &self.defaults).with_classifier(classifier);
        self.insert_shaper(name, shaper)
    }

    fn insert_shaper(&self, name: &str, shaper: TrafficShaper) -> ShapingResult<()> {
        match self.shapers.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(ShapingError::InterfaceExists {
                    name: name.to_string(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(shaper));
            }
        }

        GlobalCounters::add(&self.global.interfaces_added, 1);
        self.update_gauge();
        info!(interface = %name, "Added traffic shaping interface");
        Ok(())
    }

    /// Destroy the shaper for `name`, returning how many queued packets it held
    ///
    /// A packet that raced past the registry lookup before the removal is
    /// either among the discarded ones or dropped as
    /// [`DropReason::InterfaceRemoved`]; it is never left queued.
    pub fn remove_interface(&self, name: &str) -> ShapingResult<usize> {
        let (_, shaper) = self
            .shapers
            .remove(name)
            .ok_or_else(|| ShapingError::unknown_interface(name))?;

        let discarded = shaper.close();

        GlobalCounters::add(&self.global.interfaces_removed, 1);
        GlobalCounters::add(&self.global.packets_discarded, discarded as u64);
        self.update_gauge();

        if discarded > 0 {
            warn!(
                interface = %name,
                discarded,
                "Removed traffic shaping interface with queued packets"
            );
        } else {
            info!(interface = %name, "Removed traffic shaping interface");
        }
        Ok(discarded)
    }

    /// Apply an option map to an interface and enable its shaper
    ///
    /// Recognized keys are `capacity`, `rate`, `burst_size` and `weight_<N>`.
    /// The map is parsed in full before anything changes, so an invalid
    /// entry leaves the shaper exactly as it was. Keys that are absent keep
    /// their current values.
    pub fn configure_interface(
        &self,
        name: &str,
        algorithm: ShapingAlgorithm,
        options: &HashMap<String, String>,
    ) -> ShapingResult<()> {
        let shaper = self.shaper(name)?;
        let settings = ShaperSettings::from_options(algorithm, options, shaper.num_classes())?;

        shaper.configure(&settings)?;
        shaper.set_enabled(true);

        info!(
            interface = %name,
            ?algorithm,
            capacity = ?settings.capacity,
            rate = ?settings.refill_rate,
            burst_size = ?settings.burst_size,
            weights = ?settings.weights,
            "Configured traffic shaping"
        );
        Ok(())
    }

    /// Offer a packet to the shaper of `name`
    pub fn process_packet(&self, name: &str, packet: Packet) -> ProcessResult {
        let size = packet.len_bytes();

        let Ok(shaper) = self.shaper(name) else {
            GlobalCounters::add(&self.global.unknown_interface_packets, 1);
            metrics::record_unknown_interface(name);
            debug!(interface = %name, packet_id = packet.id, "Packet for unknown interface");
            return ProcessResult::UnknownInterface(packet);
        };

        GlobalCounters::add(&self.global.packets_processed, 1);
        GlobalCounters::add(&self.global.bytes_processed, size);

        let outcome = shaper.process_packet(packet);
        match &outcome {
            ShapingOutcome::Queued => GlobalCounters::add(&self.global.packets_queued, 1),
            ShapingOutcome::PassedThrough(_) => {
                GlobalCounters::add(&self.global.packets_passed_through, 1)
            }
            ShapingOutcome::Dropped(_) => {
                GlobalCounters::add(&self.global.packets_dropped, 1);
                GlobalCounters::add(&self.global.bytes_dropped, size);
            }
        }
        outcome.into()
    }

    /// Next packet for `name` in fairness order
    pub fn dequeue_packet(&self, name: &str) -> ShapingResult<Option<Packet>> {
        let packet = self.shaper(name)?.dequeue_packet();
        if let Some(packet) = &packet {
            self.global.count_dequeued(packet);
        }
        Ok(packet)
    }

    /// Remove every queued packet of `name` in fairness order
    pub fn drain_interface(&self, name: &str) -> ShapingResult<Vec<Packet>> {
        let drained = self.shaper(name)?.drain();
        for packet in &drained {
            self.global.count_dequeued(packet);
        }
        Ok(drained)
    }

    pub fn set_interface_enabled(&self, name: &str, enabled: bool) -> ShapingResult<()> {
        self.shaper(name)?.set_enabled(enabled);
        Ok(())
    }

    /// Reset the shaper of `name`; lifetime totals are unaffected
    pub fn reset_interface(&self, name: &str) -> ShapingResult<()> {
        self.shaper(name)?.reset();
        debug!(interface = %name, "Reset traffic shaper");
        Ok(())
    }

    pub fn set_class_weight(&self, name: &str, class_id: usize, weight: u32) -> ShapingResult<()> {
        self.shaper(name)?.set_class_weight(class_id, weight)
    }

    /// Register a class on `name` in a previously removed slot
    pub fn add_class(&self, name: &str, class_id: usize, weight: u32) -> ShapingResult<()> {
        self.shaper(name)?.add_class(class_id, weight)?;
        debug!(interface = %name, class_id, weight, "Added traffic class");
        Ok(())
    }

    /// Remove a class from `name`, returning how many queued packets it held
    pub fn remove_class(&self, name: &str, class_id: usize) -> ShapingResult<usize> {
        let discarded = self.shaper(name)?.remove_class(class_id)?;
        GlobalCounters::add(&self.global.packets_discarded, discarded as u64);
        debug!(interface = %name, class_id, discarded, "Removed traffic class");
        Ok(discarded)
    }

    /// Swap the classifier of `name`; packets already queued keep their class
    pub fn set_interface_classifier<C>(&self, name: &str, classifier: C) -> ShapingResult<()>
    where
        C: PacketClassifier + 'static,
    {
        self.shaper(name)?.set_classifier(classifier);
        Ok(())
    }

    /// Disable every shaper; queued packets stay where they are
    pub fn disable_all(&self) {
        for entry in self.shapers.iter() {
            entry.value().set_enabled(false);
        }
        info!(interfaces = self.shapers.len(), "Disabled all traffic shapers");
    }

    /// Register and configure the interfaces declared in `config`
    ///
    /// Interfaces that already exist are reconfigured in place. The
    /// configuration is validated first so a bad entry changes nothing.
    pub fn apply_config(&self, config: &ShapingConfig) -> ShapingResult<()> {
        config.validate()?;

        let mut names: Vec<&String> = config.interfaces.keys().collect();
        names.sort();

        for name in names {
            let interface = &config.interfaces[name];
            if !self.has_interface(name) {
                self.add_interface(name)?;
            }
            self.shaper(name)?
                .set_classifier_boxed(interface.classifier.build());
            self.configure_interface(name, interface.algorithm, &interface.options)?;
            if !interface.enabled {
                self.set_interface_enabled(name, false)?;
            }
        }
        Ok(())
    }

    /// Registered interface names, sorted
    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shapers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn has_interface(&self, name: &str) -> bool {
        self.shapers.contains_key(name)
    }

    pub fn interface_count(&self) -> usize {
        self.shapers.len()
    }

    pub fn statistics_for(&self, name: &str) -> ShapingResult<ShaperStatistics> {
        Ok(self.shaper(name)?.statistics())
    }

    /// Statistics of every registered interface
    pub fn interface_statistics(&self) -> BTreeMap<String, ShaperStatistics> {
        let shapers: Vec<(String, Arc<TrafficShaper>)> = self
            .shapers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        shapers
            .into_iter()
            .map(|(name, shaper)| (name, shaper.statistics()))
            .collect()
    }

    /// Lifetime totals, including interfaces that have since been removed
    pub fn global_statistics(&self) -> GlobalStatistics {
        let g = &self.global;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        GlobalStatistics {
            active_interfaces: self.shapers.len(),
            interfaces_added: load(&g.interfaces_added),
            interfaces_removed: load(&g.interfaces_removed),
            packets_processed: load(&g.packets_processed),
            bytes_processed: load(&g.bytes_processed),
            packets_queued: load(&g.packets_queued),
            packets_passed_through: load(&g.packets_passed_through),
            packets_dropped: load(&g.packets_dropped),
            bytes_dropped: load(&g.bytes_dropped),
            packets_dequeued: load(&g.packets_dequeued),
            bytes_dequeued: load(&g.bytes_dequeued),
            packets_discarded: load(&g.packets_discarded),
            unknown_interface_packets: load(&g.unknown_interface_packets),
        }
    }
}

impl std::fmt::Debug for TrafficShapingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficShapingManager")
            .field("interfaces", &self.interfaces())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
