//! Property-based tests for the token bucket and the fair scheduler.

use std::time::Duration;

use proptest::prelude::*;
use quanta::Clock;
use router_qos::{FairScheduler, Packet, RateLimiter, TokenBucket, WfqScheduler};

const BASE_QUANTUM: u64 = 1500;

#[derive(Debug, Clone)]
enum Op {
    Enqueue { class: usize, size: u32 },
    Dequeue,
    SetWeight { class: usize, weight: u32 },
    Clear,
}

fn op_strategy(num_classes: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..num_classes, 1u32..=9000).prop_map(|(class, size)| Op::Enqueue { class, size }),
        4 => Just(Op::Dequeue),
        1 => (0..num_classes, 1u32..=8).prop_map(|(class, weight)| Op::SetWeight { class, weight }),
        1 => Just(Op::Clear),
    ]
}

// ─── Scheduler Fairness ─────────────────────────────────────────────────────

proptest! {
    /// Two backlogged classes with weights 1 and 2 split bytes 1:2, give or
    /// take one round's quanta and one packet.
    #[test]
    fn weights_one_to_two_split_bytes(
        low in prop::collection::vec(64u32..=1500, 300),
        high in prop::collection::vec(64u32..=1500, 300),
    ) {
        let mut scheduler = WfqScheduler::new(2, 1000, BASE_QUANTUM);
        scheduler.set_class_weight(1, 2).unwrap();

        for (i, size) in low.iter().enumerate() {
            scheduler.enqueue(0, Packet::new(i as u64, *size)).unwrap();
        }
        for (i, size) in high.iter().enumerate() {
            scheduler.enqueue(1, Packet::new(10_000 + i as u64, *size)).unwrap();
        }

        let mut bytes = [0u64; 2];
        while scheduler.queue_len(0) > 0 && scheduler.queue_len(1) > 0 {
            let packet = scheduler.dequeue().unwrap();
            let class = if packet.id >= 10_000 { 1 } else { 0 };
            bytes[class] += packet.len_bytes();
        }

        prop_assert!(bytes[0] > 0 && bytes[1] > 0);
        let skew = (2 * bytes[0]).abs_diff(bytes[1]);
        prop_assert!(
            skew <= 2 * (2 * BASE_QUANTUM + 1500),
            "low {} high {} skew {}", bytes[0], bytes[1], skew
        );
    }

    /// Packets within a class leave in arrival order.
    #[test]
    fn fifo_within_each_class(
        arrivals in prop::collection::vec((0usize..4, 1u32..=3000), 1..200),
    ) {
        let mut scheduler = WfqScheduler::new(4, 1000, BASE_QUANTUM);
        for (id, (class, size)) in arrivals.iter().enumerate() {
            scheduler.enqueue(*class, Packet::new(id as u64, *size)).unwrap();
        }

        let mut last_seen = [None::<u64>; 4];
        while let Some(packet) = scheduler.dequeue() {
            let class = arrivals[packet.id as usize].0;
            if let Some(previous) = last_seen[class] {
                prop_assert!(packet.id > previous);
            }
            last_seen[class] = Some(packet.id);
        }
    }

    /// Dequeue only comes back empty when every queue is empty.
    #[test]
    fn dequeue_is_work_conserving(
        arrivals in prop::collection::vec((0usize..8, 1u32..=65_000), 1..100),
        weights in prop::collection::vec(1u32..=16, 8),
    ) {
        let mut scheduler = WfqScheduler::default();
        for (class, weight) in weights.iter().enumerate() {
            scheduler.set_class_weight(class, *weight).unwrap();
        }
        for (id, (class, size)) in arrivals.iter().enumerate() {
            scheduler.enqueue(*class, Packet::new(id as u64, *size)).unwrap();
        }

        let mut released = 0;
        while scheduler.total_queued() > 0 {
            prop_assert!(scheduler.dequeue().is_some());
            released += 1;
        }
        prop_assert_eq!(released, arrivals.len());
        prop_assert!(scheduler.dequeue().is_none());
    }
}

// ─── Conservation ───────────────────────────────────────────────────────────

proptest! {
    /// Every offered packet and byte is dequeued, dropped, discarded or still queued.
    #[test]
    fn class_counters_are_conserved(
        ops in prop::collection::vec(op_strategy(4), 1..400),
        depth in 1usize..20,
    ) {
        let mut scheduler = WfqScheduler::new(4, depth, BASE_QUANTUM);
        let mut next_id = 0u64;

        for op in ops {
            match op {
                Op::Enqueue { class, size } => {
                    let _ = scheduler.enqueue(class, Packet::new(next_id, size));
                    next_id += 1;
                }
                Op::Dequeue => {
                    scheduler.dequeue();
                }
                Op::SetWeight { class, weight } => {
                    scheduler.set_class_weight(class, weight).unwrap();
                }
                Op::Clear => {
                    scheduler.clear();
                }
            }

            let stats = scheduler.statistics();
            prop_assert!(stats.is_conserved(), "{:?}", stats);
            prop_assert!(stats.classes.iter().all(|c| c.queue_len <= depth));
            let queued: usize = stats.classes.iter().map(|c| c.queue_len).sum();
            prop_assert_eq!(queued, stats.total_queued);
        }
    }
}

// ─── Token Bucket ───────────────────────────────────────────────────────────

proptest! {
    /// Tokens stay within `0..=capacity` and admissions never exceed what
    /// the bucket could have earned.
    #[test]
    fn bucket_stays_within_bounds(
        capacity in 1u64..100_000,
        rate in 0u64..50_000,
        steps in prop::collection::vec((0u64..2_000, 0u64..120_000), 1..200),
    ) {
        let (clock, mock) = Clock::mock();
        let mut bucket = TokenBucket::with_clock(capacity, rate, clock);
        let mut elapsed_ms = 0u64;
        let mut admitted = 0u64;

        for (advance_ms, request) in steps {
            mock.increment(Duration::from_millis(advance_ms));
            elapsed_ms += advance_ms;

            let before = bucket.available_tokens();
            prop_assert!(before <= capacity);

            if bucket.consume(request) {
                prop_assert!(request <= before);
                admitted += request;
                prop_assert_eq!(bucket.available_tokens(), before - request);
            } else {
                prop_assert!(request > before);
                prop_assert_eq!(bucket.available_tokens(), before);
            }
        }

        let earned = u128::from(rate) * u128::from(elapsed_ms) / 1000;
        prop_assert!(u128::from(admitted) <= u128::from(capacity) + earned);
    }
}
