//! # Shaping Statistics
//!
//! Point-in-time snapshots of limiter, scheduler, shaper and manager counters.
//! All snapshots are plain data and serialize with `serde` so a reporter can
//! render them as JSON or YAML.

use serde::{Deserialize, Serialize};

/// Snapshot of a rate limiter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStatistics {
    /// Bucket capacity in bytes
    pub capacity: u64,

    /// Refill rate in bytes per second
    pub refill_rate: u64,

    /// Per-admission ceiling, if one is configured
    pub burst_size: Option<u64>,

    /// Tokens available at the time of the snapshot
    pub available_tokens: u64,

    pub admitted_packets: u64,
    pub admitted_bytes: u64,
    pub rejected_packets: u64,
    pub rejected_bytes: u64,
}

/// Snapshot of one scheduler class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub class_id: usize,
    pub weight: u32,
    pub quantum: u64,
    pub deficit: u64,

    /// Packets currently waiting in the class queue
    pub queue_len: usize,

    /// Bytes currently waiting in the class queue
    pub queue_bytes: u64,

    /// Packets and bytes handed to `enqueue`
    pub offered_packets: u64,
    pub offered_bytes: u64,

    /// Packets and bytes that left through `dequeue`
    pub dequeued_packets: u64,
    pub dequeued_bytes: u64,

    /// Packets and bytes refused because the queue was full
    pub dropped_packets: u64,
    pub dropped_bytes: u64,

    /// Packets and bytes thrown away by `clear` or class removal
    pub discarded_packets: u64,
    pub discarded_bytes: u64,
}

impl ClassStatistics {
    /// Check that every offered packet and byte is accounted for
    pub fn is_conserved(&self) -> bool {
        let packets = self.dequeued_packets
            + self.dropped_packets
            + self.discarded_packets
            + self.queue_len as u64;
        let bytes =
            self.dequeued_bytes + self.dropped_bytes + self.discarded_bytes + self.queue_bytes;

        self.offered_packets == packets && self.offered_bytes == bytes
    }
}

/// Snapshot of a fair-queueing scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    pub num_classes: usize,
    pub total_queued: usize,
    pub total_queued_bytes: u64,

    /// Registered classes, in class id order
    pub classes: Vec<ClassStatistics>,
}

impl SchedulerStatistics {
    pub fn class(&self, class_id: usize) -> Option<&ClassStatistics> {
        self.classes.iter().find(|c| c.class_id == class_id)
    }

    pub fn is_conserved(&self) -> bool {
        self.classes.iter().all(ClassStatistics::is_conserved)
    }
}

/// Snapshot of one interface's shaper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaperStatistics {
    pub enabled: bool,

    /// Packets offered to `process_packet`
    pub packets_processed: u64,
    pub bytes_processed: u64,

    pub packets_queued: u64,
    pub bytes_queued: u64,

    /// Packets forwarded untouched while the shaper was disabled
    pub packets_passed_through: u64,
    pub bytes_passed_through: u64,

    /// Total drops across every [`DropReason`](super::DropReason)
    pub packets_dropped: u64,
    pub bytes_dropped: u64,

    pub dropped_rate_limited: u64,
    pub dropped_queue_full: u64,
    pub dropped_class_unavailable: u64,
    pub dropped_interface_removed: u64,

    pub packets_dequeued: u64,
    pub bytes_dequeued: u64,

    /// Queued packets thrown away by class removal or interface removal
    pub packets_discarded: u64,

    pub limiter: LimiterStatistics,
    pub scheduler: SchedulerStatistics,
}

/// Lifetime totals across every interface the manager has ever held
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    /// Interfaces currently registered
    pub active_interfaces: usize,

    pub interfaces_added: u64,
    pub interfaces_removed: u64,

    pub packets_processed: u64,
    pub bytes_processed: u64,
    pub packets_queued: u64,
    pub packets_passed_through: u64,
    pub packets_dropped: u64,
    pub bytes_dropped: u64,
    pub packets_dequeued: u64,
    pub bytes_dequeued: u64,

    /// Queued packets thrown away by class removal or interface removal
    pub packets_discarded: u64,

    /// Packets addressed to an interface with no shaper
    pub unknown_interface_packets: u64,
}
