//! # Shaping Metrics
//!
//! Counters recorded through the `metrics` facade. Handles are registered once
//! per interface with the interface name bound as a label, so the packet path
//! only increments pre-built handles.
//!
//! The crate installs no exporter. An application that wants the numbers
//! installs a recorder (for example a Prometheus exporter) before creating
//! its shapers; handles created earlier stay no-ops.

use metrics::{describe_counter, describe_gauge, Counter, Gauge, Unit};

use crate::traffic::DropReason;

pub const PACKETS_QUEUED: &str = "qos_packets_queued_total";
pub const BYTES_QUEUED: &str = "qos_bytes_queued_total";
pub const PACKETS_PASSED_THROUGH: &str = "qos_packets_passed_through_total";
pub const PACKETS_DROPPED: &str = "qos_packets_dropped_total";
pub const BYTES_DROPPED: &str = "qos_bytes_dropped_total";
pub const PACKETS_DEQUEUED: &str = "qos_packets_dequeued_total";
pub const BYTES_DEQUEUED: &str = "qos_bytes_dequeued_total";
pub const PACKETS_DISCARDED: &str = "qos_packets_discarded_total";
pub const UNKNOWN_INTERFACE_PACKETS: &str = "qos_unknown_interface_packets_total";
pub const ACTIVE_INTERFACES: &str = "qos_active_interfaces";

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(PACKETS_QUEUED, Unit::Count, "Packets admitted and queued");
    describe_counter!(BYTES_QUEUED, Unit::Bytes, "Bytes admitted and queued");
    describe_counter!(
        PACKETS_PASSED_THROUGH,
        Unit::Count,
        "Packets forwarded unshaped by a disabled shaper"
    );
    describe_counter!(PACKETS_DROPPED, Unit::Count, "Packets dropped, by reason");
    describe_counter!(BYTES_DROPPED, Unit::Bytes, "Bytes dropped, by reason");
    describe_counter!(PACKETS_DEQUEUED, Unit::Count, "Packets released by the scheduler");
    describe_counter!(BYTES_DEQUEUED, Unit::Bytes, "Bytes released by the scheduler");
    describe_counter!(
        PACKETS_DISCARDED,
        Unit::Count,
        "Queued packets thrown away by class or interface removal"
    );
    describe_counter!(
        UNKNOWN_INTERFACE_PACKETS,
        Unit::Count,
        "Packets addressed to an interface without a shaper"
    );
    describe_gauge!(ACTIVE_INTERFACES, Unit::Count, "Interfaces with a registered shaper");
}

/// Metric handles for one interface
#[derive(Clone)]
pub struct ShapingMetrics {
    packets_queued: Counter,
    bytes_queued: Counter,
    packets_passed_through: Counter,
    rate_limited_packets: Counter,
    rate_limited_bytes: Counter,
    queue_full_packets: Counter,
    queue_full_bytes: Counter,
    no_class_packets: Counter,
    no_class_bytes: Counter,
    removed_packets: Counter,
    removed_bytes: Counter,
    packets_dequeued: Counter,
    bytes_dequeued: Counter,
    packets_discarded: Counter,
}

impl ShapingMetrics {
    pub fn new(interface: &str) -> Self {
        let iface = interface.to_string();
        let dropped = |name: &'static str, reason: DropReason| {
            metrics::counter!(name, "interface" => iface.clone(), "reason" => reason.as_str())
        };

        Self {
            packets_queued: metrics::counter!(PACKETS_QUEUED, "interface" => iface.clone()),
            bytes_queued: metrics::counter!(BYTES_QUEUED, "interface" => iface.clone()),
            packets_passed_through: metrics::counter!(
                PACKETS_PASSED_THROUGH,
                "interface" => iface.clone()
            ),
            rate_limited_packets: dropped(PACKETS_DROPPED, DropReason::RateLimited),
            rate_limited_bytes: dropped(BYTES_DROPPED, DropReason::RateLimited),
            queue_full_packets: dropped(PACKETS_DROPPED, DropReason::QueueFull),
            queue_full_bytes: dropped(BYTES_DROPPED, DropReason::QueueFull),
            no_class_packets: dropped(PACKETS_DROPPED, DropReason::ClassUnavailable),
            no_class_bytes: dropped(BYTES_DROPPED, DropReason::ClassUnavailable),
            removed_packets: dropped(PACKETS_DROPPED, DropReason::InterfaceRemoved),
            removed_bytes: dropped(BYTES_DROPPED, DropReason::InterfaceRemoved),
            packets_dequeued: metrics::counter!(PACKETS_DEQUEUED, "interface" => iface.clone()),
            bytes_dequeued: metrics::counter!(BYTES_DEQUEUED, "interface" => iface.clone()),
            packets_discarded: metrics::counter!(PACKETS_DISCARDED, "interface" => iface),
        }
    }

    pub fn record_queued(&self, bytes: u64) {
        self.packets_queued.increment(1);
        self.bytes_queued.increment(bytes);
    }

    pub fn record_passed_through(&self) {
        self.packets_passed_through.increment(1);
    }

    pub fn record_dropped(&self, reason: DropReason, bytes: u64) {
        let (packets, total) = match reason {
            DropReason::RateLimited => (&self.rate_limited_packets, &self.rate_limited_bytes),
            DropReason::QueueFull => (&self.queue_full_packets, &self.queue_full_bytes),
            DropReason::ClassUnavailable => (&self.no_class_packets, &self.no_class_bytes),
            DropReason::InterfaceRemoved => (&self.removed_packets, &self.removed_bytes),
        };
        packets.increment(1);
        total.increment(bytes);
    }

    pub fn record_dequeued(&self, bytes: u64) {
        self.packets_dequeued.increment(1);
        self.bytes_dequeued.increment(bytes);
    }

    pub fn record_discarded(&self, packets: u64) {
        self.packets_discarded.increment(packets);
    }
}

impl std::fmt::Debug for ShapingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapingMetrics").finish_non_exhaustive()
    }
}

/// Count a packet addressed to an interface without a shaper
pub fn record_unknown_interface(interface: &str) {
    metrics::counter!(UNKNOWN_INTERFACE_PACKETS, "interface" => interface.to_string()).increment(1);
}

pub fn active_interfaces_gauge() -> Gauge {
    metrics::gauge!(ACTIVE_INTERFACES)
}
