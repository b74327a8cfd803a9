//! Concurrent producers and consumers against a shared manager.

use std::collections::HashMap;
use std::sync::Arc;

use router_qos::{Packet, ProcessResult, ShapingAlgorithm, TrafficShapingManager};
use tokio::task::JoinSet;

const INTERFACES: [&str; 4] = ["eth0", "eth1", "eth2", "wan0"];
const PACKETS_PER_PRODUCER: u64 = 500;

fn roomy_manager() -> Arc<TrafficShapingManager> {
    let manager = Arc::new(TrafficShapingManager::default());
    let options: HashMap<String, String> = [("capacity", "100000000"), ("rate", "1000000")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for name in INTERFACES {
        manager.add_interface(name).unwrap();
        manager
            .configure_interface(name, ShapingAlgorithm::Hybrid, &options)
            .unwrap();
    }
    manager
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_producers_keep_counters_consistent() {
    let manager = roomy_manager();
    let mut tasks = JoinSet::new();

    for name in INTERFACES {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let mut queued = 0u64;
            for id in 0..PACKETS_PER_PRODUCER {
                let packet = Packet::new(id, 64 + (id % 1400) as u32).with_priority((id % 8) as u32);
                if manager.process_packet(name, packet) == ProcessResult::Queued {
                    queued += 1;
                }
                if id % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            queued
        });
    }

    let mut total_queued = 0;
    while let Some(result) = tasks.join_next().await {
        total_queued += result.unwrap();
    }
    assert_eq!(total_queued, PACKETS_PER_PRODUCER * INTERFACES.len() as u64);

    for name in INTERFACES {
        let stats = manager.statistics_for(name).unwrap();
        assert_eq!(stats.packets_processed, PACKETS_PER_PRODUCER);
        assert_eq!(stats.packets_queued, PACKETS_PER_PRODUCER);
        assert_eq!(stats.scheduler.total_queued, PACKETS_PER_PRODUCER as usize);
        assert!(stats.scheduler.is_conserved());
    }

    let global = manager.global_statistics();
    assert_eq!(global.packets_processed, total_queued);
    assert_eq!(global.packets_queued, total_queued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_producer_and_consumer_on_same_interface() {
    let manager = roomy_manager();
    let mut tasks = JoinSet::new();

    {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            for id in 0..PACKETS_PER_PRODUCER {
                manager.process_packet("eth0", Packet::new(id, 512).with_priority((id % 4) as u32));
                if id % 32 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            0u64
        });
    }
    {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let mut dequeued = 0u64;
            for _ in 0..(PACKETS_PER_PRODUCER * 4) {
                if manager.dequeue_packet("eth0").unwrap().is_some() {
                    dequeued += 1;
                }
                tokio::task::yield_now().await;
            }
            dequeued
        });
    }

    let mut dequeued = 0;
    while let Some(result) = tasks.join_next().await {
        dequeued += result.unwrap();
    }

    let remaining = manager.drain_interface("eth0").unwrap();
    assert_eq!(dequeued + remaining.len() as u64, PACKETS_PER_PRODUCER);

    let stats = manager.statistics_for("eth0").unwrap();
    assert_eq!(stats.packets_dequeued, PACKETS_PER_PRODUCER);
    assert_eq!(stats.scheduler.total_queued, 0);
    assert!(stats.scheduler.is_conserved());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removal_races_with_traffic() {
    let manager = roomy_manager();
    let mut tasks = JoinSet::new();

    {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            for id in 0..PACKETS_PER_PRODUCER {
                manager.process_packet("wan0", Packet::new(id, 256));
                if id % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
    }
    {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            tokio::task::yield_now().await;
            manager.remove_interface("wan0").unwrap();
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let global = manager.global_statistics();
    assert!(!manager.has_interface("wan0"));
    assert_eq!(
        global.packets_processed + global.unknown_interface_packets,
        PACKETS_PER_PRODUCER
    );
    assert_eq!(global.interfaces_removed, 1);
    assert_eq!(global.active_interfaces, INTERFACES.len() - 1);

    // Nothing consumed, so every queued packet must have been discarded
    assert_eq!(global.packets_dequeued, 0);
    assert_eq!(global.packets_queued, global.packets_discarded);
    assert_eq!(
        global.packets_processed,
        global.packets_queued + global.packets_passed_through + global.packets_dropped
    );
}

#[test]
fn test_removal_never_strands_queued_packets() {
    const ROUNDS: usize = 200;
    const PACKETS: u64 = 2000;

    for round in 0..ROUNDS {
        let manager = roomy_manager();
        let producer = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                for id in 0..PACKETS {
                    manager.process_packet("wan0", Packet::new(id, 64).with_priority(id as u32));
                }
            })
        };
        let consumer = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                while let Ok(packet) = manager.dequeue_packet("wan0") {
                    if packet.is_none() {
                        std::thread::yield_now();
                    }
                }
            })
        };

        std::thread::yield_now();
        let discarded = manager.remove_interface("wan0").unwrap() as u64;
        producer.join().unwrap();
        consumer.join().unwrap();

        let global = manager.global_statistics();
        assert!(global.packets_discarded >= discarded, "round {round}");
        assert_eq!(
            global.packets_queued,
            global.packets_dequeued + global.packets_discarded,
            "round {round}: {global:?}"
        );
        assert_eq!(
            global.packets_processed,
            global.packets_queued + global.packets_passed_through + global.packets_dropped,
            "round {round}"
        );
        assert_eq!(global.packets_processed + global.unknown_interface_packets, PACKETS);
    }
}
