//! Timing and fairness scenarios for the transfer engine.
//!
//! These pin the bandwidth model: a single transfer saturates its path, two
//! concurrent transfers split a link evenly, and multi-hop transfers run at
//! the bottleneck link's rate.

use cloudsim_engine::{Controller, NodeOptions, ScalingConfig, SimConfig};
use cloudsim_types::{parse_bandwidth, parse_size};
use std::time::Duration;

const GBPS: u64 = 1_000_000_000;
const GB: u64 = 1_000_000_000;
const MB: u64 = 1_000_000;

/// Config with demand scaling off so topologies stay exactly as built.
fn quiet_config() -> SimConfig {
    SimConfig {
        scaling: ScalingConfig {
            enabled: false,
            ..ScalingConfig::default()
        },
        ..SimConfig::default()
    }
}

fn storage_node(sim: &mut Controller, name: &str) {
    sim.add_node(
        Some(name),
        NodeOptions {
            storage_bytes: Some(4 * GB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .expect("node admitted");
}

/// Single-hop transfer timing: 1 GB over 1 Gbps / 10 ms completes in about
/// 8.01 simulated seconds (transmission plus one trailing latency).
#[test]
fn single_hop_gigabyte_lands_near_eight_seconds() {
    let mut sim = Controller::new(quiet_config());
    storage_node(&mut sim, "a");
    storage_node(&mut sim, "b");
    // Shell-style shorthand parses to the same decimal units.
    let link_bw = parse_bandwidth("1Gbps").unwrap();
    assert_eq!(link_bw, GBPS);
    sim.connect(&["a", "b"], Some(link_bw), Some(Duration::from_millis(10)))
        .unwrap();

    let size = parse_size("1GB").unwrap();
    assert_eq!(size, GB);
    let id = sim
        .initiate_file_transfer("a", "b", "big.bin", size, Some(8 * MB))
        .expect("transfer admitted");
    sim.run_until_idle();

    let view = sim.transfer_view(id).expect("transfer exists");
    assert_eq!(view.state, "completed", "error: {:?}", view.error_code);
    let done = view.completed_at_secs.expect("completed");
    println!("1 GB single hop completed at {done:.4}s");
    assert!(
        (done - 8.01).abs() / 8.01 < 0.05,
        "expected ≈8.01s ±5%, got {done:.3}s"
    );

    let b = sim.inspect("b").unwrap();
    assert_eq!(b.usage.storage_used, GB, "destination committed the full file");
    assert_eq!(b.os.process_failures, 0, "no OS failures on the destination");
    let a = sim.inspect("a").unwrap();
    assert_eq!(a.os.process_failures, 0, "no OS failures on the source");
}

/// Fair sharing: two equal transfers on one link finish within 10% of each
/// other, and each takes at least 1.8x a solo run of the same size.
#[test]
fn concurrent_transfers_share_the_link_fairly() {
    let solo = {
        let mut sim = Controller::new(quiet_config());
        storage_node(&mut sim, "a");
        storage_node(&mut sim, "b");
        sim.connect(&["a", "b"], Some(GBPS), Some(Duration::from_millis(10)))
            .unwrap();
        let id = sim
            .initiate_file_transfer("a", "b", "solo.bin", 500 * MB, None)
            .unwrap();
        sim.run_until_idle();
        sim.transfer_view(id).unwrap().completed_at_secs.unwrap()
    };

    let mut sim = Controller::new(quiet_config());
    storage_node(&mut sim, "a");
    storage_node(&mut sim, "b");
    sim.connect(&["a", "b"], Some(GBPS), Some(Duration::from_millis(10)))
        .unwrap();
    let first = sim
        .initiate_file_transfer("a", "b", "p1.bin", 500 * MB, None)
        .unwrap();
    let second = sim
        .initiate_file_transfer("a", "b", "p2.bin", 500 * MB, None)
        .unwrap();
    sim.run_until_idle();

    let t1 = sim.transfer_view(first).unwrap().completed_at_secs.unwrap();
    let t2 = sim.transfer_view(second).unwrap().completed_at_secs.unwrap();
    println!("solo {solo:.3}s, shared {t1:.3}s / {t2:.3}s");

    let deviation = (t1 - t2).abs() / t1.max(t2);
    assert!(
        deviation < 0.10,
        "equal transfers should finish within 10%, deviation {deviation:.3}"
    );
    for t in [t1, t2] {
        assert!(
            t >= 1.8 * solo,
            "shared transfer ({t:.3}s) should take ≥1.8x the solo run ({solo:.3}s)"
        );
    }
}

/// A three-hop path runs at the bottleneck link's rate.
#[test]
fn multi_hop_throughput_matches_bottleneck() {
    let mut sim = Controller::new(quiet_config());
    for name in ["a", "b", "c", "d"] {
        storage_node(&mut sim, name);
    }
    sim.connect(&["a", "b"], Some(2 * GBPS), Some(Duration::from_millis(5)))
        .unwrap();
    sim.connect(&["b", "c"], Some(GBPS), Some(Duration::from_millis(5)))
        .unwrap();
    sim.connect(&["c", "d"], Some(2 * GBPS), Some(Duration::from_millis(5)))
        .unwrap();

    let id = sim
        .initiate_file_transfer("a", "d", "big.bin", GB, Some(8 * MB))
        .unwrap();
    sim.run_until_idle();

    let view = sim.transfer_view(id).unwrap();
    assert_eq!(view.state, "completed", "error: {:?}", view.error_code);
    let done = view.completed_at_secs.unwrap();
    let ideal = (8.0 * GB as f64) / GBPS as f64; // bottleneck is 1 Gbps
    println!("3-hop 1 GB completed at {done:.3}s (bottleneck ideal {ideal:.3}s)");
    assert!(
        (done - ideal) / ideal < 0.05,
        "throughput should match the bottleneck within 5%, got {done:.3}s vs {ideal:.3}s"
    );
}

/// The per-link invariant: total bytes delivered never exceed
/// bandwidth x elapsed time, even with several competing flows.
#[test]
fn link_capacity_is_never_exceeded() {
    let mut sim = Controller::new(quiet_config());
    storage_node(&mut sim, "a");
    storage_node(&mut sim, "b");
    sim.connect(&["a", "b"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    for i in 0..3 {
        sim.initiate_file_transfer("a", "b", &format!("f{i}.bin"), 100 * MB, None)
            .unwrap();
    }
    let report = sim.run_until_idle();

    let b = sim.inspect("b").unwrap();
    let delivered = b.usage.storage_used as f64;
    let capacity_bytes = (GBPS as f64 / 8.0) * report.now_secs;
    println!(
        "delivered {:.0} MB over {:.3}s (capacity {:.0} MB)",
        delivered / 1e6,
        report.now_secs,
        capacity_bytes / 1e6
    );
    assert!(
        delivered <= capacity_bytes,
        "link delivered more bytes than its bandwidth allows"
    );
    assert_eq!(b.usage.storage_used, 300 * MB as u64);
}
