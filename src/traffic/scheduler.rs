//! # Weighted Fair Queueing Scheduler
//!
//! Deficit round robin over a fixed number of traffic classes. Each class has
//! a bounded FIFO, a weight and a deficit counter measured in bytes. A class
//! earns `weight * base_quantum` bytes of credit per round and may send its
//! head packet once its deficit covers the packet size.
//!
//! `dequeue` is work conserving. When no backlogged class can afford its head
//! packet, the scheduler advances as many rounds as the closest class needs,
//! crediting every class. Idle classes bank at most one quantum so a class
//! that sat empty cannot burst past its share when traffic returns. Among the
//! classes that can send, the smallest deficit goes first and ties go to the
//! lowest class id, which keeps the output order deterministic.

use super::stats::{ClassStatistics, SchedulerStatistics};
use crate::core::error::{ShapingError, ShapingResult};
use crate::core::types::Packet;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, warn};

/// Number of classes a scheduler is built with unless configured otherwise
pub const DEFAULT_NUM_CLASSES: usize = 8;

/// Per-class queue bound in packets
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;

/// Bytes of credit per round for a weight-1 class
pub const DEFAULT_BASE_QUANTUM: u64 = 1500;

/// Scheduler seam used by [`TrafficShaper`](super::TrafficShaper)
pub trait FairScheduler: Send + fmt::Debug {
    fn num_classes(&self) -> usize;

    /// Register a class with `weight` in an empty slot
    fn add_class(&mut self, class_id: usize, weight: u32) -> ShapingResult<()>;

    /// Remove a class, returning how many queued packets it discarded
    fn remove_class(&mut self, class_id: usize) -> ShapingResult<usize>;

    fn has_class(&self, class_id: usize) -> bool;

    /// Append a packet to a class queue
    ///
    /// Fails with [`ShapingError::QueueFull`] when the class is at its depth
    /// bound; the refusal is counted on the class.
    fn enqueue(&mut self, class_id: usize, packet: Packet) -> ShapingResult<()>;

    /// Next packet in fairness order, `None` only when every queue is empty
    fn dequeue(&mut self) -> Option<Packet>;

    fn set_class_weight(&mut self, class_id: usize, weight: u32) -> ShapingResult<()>;

    fn queue_len(&self, class_id: usize) -> usize;

    fn total_queued(&self) -> usize;

    /// Discard every queued packet, returning how many were dropped
    fn clear(&mut self) -> usize;

    /// Empty all queues and zero counters and deficits, keeping weights
    fn reset(&mut self);

    fn statistics(&self) -> SchedulerStatistics;
}

#[derive(Debug)]
struct QueueClass {
    class_id: usize,
    weight: u32,
    quantum: u64,
    deficit: u64,
    queue: VecDeque<Packet>,
    queued_bytes: u64,
    offered_packets: u64,
    offered_bytes: u64,
    dequeued_packets: u64,
    dequeued_bytes: u64,
    dropped_packets: u64,
    dropped_bytes: u64,
    discarded_packets: u64,
    discarded_bytes: u64,
}

impl QueueClass {
    fn new(class_id: usize, weight: u32, base_quantum: u64) -> Self {
        Self {
            class_id,
            weight,
            quantum: u64::from(weight) * base_quantum,
            deficit: 0,
            queue: VecDeque::new(),
            queued_bytes: 0,
            offered_packets: 0,
            offered_bytes: 0,
            dequeued_packets: 0,
            dequeued_bytes: 0,
            dropped_packets: 0,
            dropped_bytes: 0,
            discarded_packets: 0,
            discarded_bytes: 0,
        }
    }

    fn head_size(&self) -> Option<u64> {
        self.queue.front().map(Packet::len_bytes)
    }

    fn can_send(&self) -> bool {
        self.head_size().map_or(false, |size| self.deficit >= size)
    }

    /// Rounds of credit needed before the head packet fits
    fn rounds_needed(&self) -> Option<u64> {
        let size = self.head_size()?;
        let missing = size.saturating_sub(self.deficit);
        Some(missing.div_ceil(self.quantum.max(1)))
    }

    fn advance(&mut self, rounds: u64) {
        let credit = self.quantum.saturating_mul(rounds);
        self.deficit = self.deficit.saturating_add(credit);
        if self.queue.is_empty() {
            self.deficit = self.deficit.min(self.quantum);
        }
    }

    fn discard_all(&mut self) -> usize {
        let count = self.queue.len();
        self.discarded_packets += count as u64;
        self.discarded_bytes += self.queued_bytes;
        self.queue.clear();
        self.queued_bytes = 0;
        count
    }

    fn snapshot(&self) -> ClassStatistics {
        ClassStatistics {
            class_id: self.class_id,
            weight: self.weight,
            quantum: self.quantum,
            deficit: self.deficit,
            queue_len: self.queue.len(),
            queue_bytes: self.queued_bytes,
            offered_packets: self.offered_packets,
            offered_bytes: self.offered_bytes,
            dequeued_packets: self.dequeued_packets,
            dequeued_bytes: self.dequeued_bytes,
            dropped_packets: self.dropped_packets,
            dropped_bytes: self.dropped_bytes,
            discarded_packets: self.discarded_packets,
            discarded_bytes: self.discarded_bytes,
        }
    }
}

/// Deficit round robin scheduler with a fixed class range
#[derive(Debug)]
pub struct WfqScheduler {
    classes: Vec<Option<QueueClass>>,
    max_queue_depth: usize,
    base_quantum: u64,
    total_queued: usize,
}

impl Default for WfqScheduler {
    fn default() -> Self {
        Self::new(
            DEFAULT_NUM_CLASSES,
            DEFAULT_MAX_QUEUE_DEPTH,
            DEFAULT_BASE_QUANTUM,
        )
    }
}

impl WfqScheduler {
    /// Create a scheduler with `num_classes` classes, all registered with weight 1
    pub fn new(num_classes: usize, max_queue_depth: usize, base_quantum: u64) -> Self {
        let base_quantum = base_quantum.max(1);
        let classes = (0..num_classes)
            .map(|id| Some(QueueClass::new(id, 1, base_quantum)))
            .collect();

        Self {
            classes,
            max_queue_depth,
            base_quantum,
            total_queued: 0,
        }
    }

    pub fn max_queue_depth(&self) -> usize {
        self.max_queue_depth
    }

    pub fn base_quantum(&self) -> u64 {
        self.base_quantum
    }

    fn slot(&self, class_id: usize) -> ShapingResult<&Option<QueueClass>> {
        self.classes.get(class_id).ok_or(ShapingError::ClassOutOfRange {
            class_id,
            num_classes: self.classes.len(),
        })
    }

    fn class(&self, class_id: usize) -> ShapingResult<&QueueClass> {
        self.slot(class_id)?
            .as_ref()
            .ok_or(ShapingError::UnknownClass { class_id })
    }

    fn class_mut(&mut self, class_id: usize) -> ShapingResult<&mut QueueClass> {
        let num_classes = self.classes.len();
        self.classes
            .get_mut(class_id)
            .ok_or(ShapingError::ClassOutOfRange {
                class_id,
                num_classes,
            })?
            .as_mut()
            .ok_or(ShapingError::UnknownClass { class_id })
    }

    pub fn weight(&self, class_id: usize) -> ShapingResult<u32> {
        Ok(self.class(class_id)?.weight)
    }

    pub fn deficit(&self, class_id: usize) -> ShapingResult<u64> {
        Ok(self.class(class_id)?.deficit)
    }

    pub fn queue_bytes(&self, class_id: usize) -> u64 {
        self.class(class_id).map_or(0, |c| c.queued_bytes)
    }

    pub fn class_statistics(&self, class_id: usize) -> ShapingResult<ClassStatistics> {
        Ok(self.class(class_id)?.snapshot())
    }

    fn advance_rounds(&mut self) {
        let rounds = self
            .classes
            .iter()
            .flatten()
            .filter_map(QueueClass::rounds_needed)
            .min()
            .unwrap_or(0);

        if rounds == 0 {
            return;
        }
        for class in self.classes.iter_mut().flatten() {
            class.advance(rounds);
        }
    }

    fn pick_class(&self) -> Option<usize> {
        self.classes
            .iter()
            .flatten()
            .filter(|c| c.can_send())
            .min_by_key(|c| (c.deficit, c.class_id))
            .map(|c| c.class_id)
    }
}

impl FairScheduler for WfqScheduler {
    fn num_classes(&self) -> usize {
        self.classes.len()
    }

    fn add_class(&mut self, class_id: usize, weight: u32) -> ShapingResult<()> {
        if weight == 0 {
            return Err(ShapingError::InvalidWeight { class_id, weight });
        }
        if self.slot(class_id)?.is_some() {
            return Err(ShapingError::ClassExists { class_id });
        }

        self.classes[class_id] = Some(QueueClass::new(class_id, weight, self.base_quantum));
        debug!("Registered traffic class {} with weight {}", class_id, weight);
        Ok(())
    }

    fn remove_class(&mut self, class_id: usize) -> ShapingResult<usize> {
        self.class(class_id)?;
        let Some(mut class) = self.classes[class_id].take() else {
            return Err(ShapingError::UnknownClass { class_id });
        };

        let discarded = class.discard_all();
        self.total_queued -= discarded;
        if discarded > 0 {
            warn!(
                "Removed traffic class {} with {} queued packets discarded",
                class_id, discarded
            );
        }
        Ok(discarded)
    }

    fn has_class(&self, class_id: usize) -> bool {
        self.class(class_id).is_ok()
    }

    fn enqueue(&mut self, class_id: usize, packet: Packet) -> ShapingResult<()> {
        let depth = self.max_queue_depth;
        let class = self.class_mut(class_id)?;
        let size = packet.len_bytes();

        class.offered_packets += 1;
        class.offered_bytes += size;

        if class.queue.len() >= depth {
            class.dropped_packets += 1;
            class.dropped_bytes += size;
            return Err(ShapingError::QueueFull { class_id, depth });
        }

        class.queue.push_back(packet);
        class.queued_bytes += size;
        self.total_queued += 1;
        Ok(())
    }

    fn dequeue(&mut self) -> Option<Packet> {
        if self.total_queued == 0 {
            return None;
        }

        if self.pick_class().is_none() {
            self.advance_rounds();
        }

        let class_id = self.pick_class()?;
        let class = self.classes[class_id].as_mut()?;
        let packet = class.queue.pop_front()?;
        let size = packet.len_bytes();

        class.deficit -= size;
        class.queued_bytes -= size;
        class.dequeued_packets += 1;
        class.dequeued_bytes += size;
        self.total_queued -= 1;
        Some(packet)
    }

    fn set_class_weight(&mut self, class_id: usize, weight: u32) -> ShapingResult<()> {
        if weight == 0 {
            return Err(ShapingError::InvalidWeight { class_id, weight });
        }
        let base_quantum = self.base_quantum;
        let class = self.class_mut(class_id)?;

        // The deficit is kept so the new share phases in over later rounds
        class.weight = weight;
        class.quantum = u64::from(weight) * base_quantum;
        debug!("Traffic class {} weight set to {}", class_id, weight);
        Ok(())
    }

    fn queue_len(&self, class_id: usize) -> usize {
        self.class(class_id).map_or(0, |c| c.queue.len())
    }

    fn total_queued(&self) -> usize {
        self.total_queued
    }

    fn clear(&mut self) -> usize {
        let mut discarded = 0;
        for class in self.classes.iter_mut().flatten() {
            discarded += class.discard_all();
            class.deficit = 0;
        }
        self.total_queued = 0;
        discarded
    }

    fn reset(&mut self) {
        let base_quantum = self.base_quantum;
        for class in self.classes.iter_mut().flatten() {
            *class = QueueClass::new(class.class_id, class.weight, base_quantum);
        }
        self.total_queued = 0;
    }

    fn statistics(&self) -> SchedulerStatistics {
        let classes: Vec<ClassStatistics> =
            self.classes.iter().flatten().map(QueueClass::snapshot).collect();

        SchedulerStatistics {
            num_classes: self.classes.len(),
            total_queued: self.total_queued,
            total_queued_bytes: classes.iter().map(|c| c.queue_bytes).sum(),
            classes,
        }
    }
}
