//! OS backpressure: device concurrency limits, RAM admission, and disk
//! reservation admission.

use cloudsim_engine::{Controller, NodeOptions, ScalingConfig, SimConfig};
use std::time::Duration;

const GBPS: u64 = 1_000_000_000;
const MB: u64 = 1_000_000;

fn quiet_config() -> SimConfig {
    SimConfig {
        scaling: ScalingConfig {
            enabled: false,
            ..ScalingConfig::default()
        },
        ..SimConfig::default()
    }
}

/// NIC concurrency caps in-flight transmissions: with 2 slots and 4
/// concurrent transfers, at most 2 are ever on the wire, the rest are
/// blocked in the kernel, and all 4 eventually complete.
#[test]
fn nic_concurrency_blocks_excess_transfers() {
    let mut sim = Controller::new(quiet_config());
    sim.add_node(
        Some("s"),
        NodeOptions {
            storage_bytes: Some(1_000 * MB),
            nic_concurrency: Some(2),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.add_node(
        Some("t"),
        NodeOptions {
            storage_bytes: Some(1_000 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.connect(&["s", "t"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    let ids: Vec<_> = (0..4)
        .map(|i| {
            sim.initiate_file_transfer("s", "t", &format!("f{i}.bin"), MB, None)
                .expect("transfer admitted")
        })
        .collect();

    // Sample the kernel while the transfers drain.
    let mut max_inflight = 0usize;
    let mut saw_blocked = false;
    for _ in 0..2_000 {
        let report = sim.inspect("s").unwrap();
        max_inflight = max_inflight.max(report.os.nic_inflight);
        saw_blocked |= report.os.nic_blocked > 0;
        if sim.telemetry().active_transfers == 0 {
            break;
        }
        sim.step(0.002).unwrap();
    }
    sim.run_until_idle();

    assert!(
        max_inflight <= 2,
        "NIC concurrency 2 must cap in-flight transmissions, saw {max_inflight}"
    );
    assert!(saw_blocked, "excess work should have been observed blocked");
    for id in ids {
        assert_eq!(
            sim.transfer_view(id).unwrap().state,
            "completed",
            "every transfer eventually completes"
        );
    }
}

/// Disk reservations reject transfers that would overcommit, before any
/// bytes move.
#[test]
fn reservation_admission_rejects_overcommit() {
    let mut sim = Controller::new(quiet_config());
    sim.add_node(
        Some("a"),
        NodeOptions {
            storage_bytes: Some(100 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.add_node(
        Some("b"),
        NodeOptions {
            storage_bytes: Some(100 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.connect(&["a", "b"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    sim.initiate_file_transfer("a", "b", "first.bin", 70 * MB, None)
        .expect("first transfer fits");
    let err = sim
        .initiate_file_transfer("a", "b", "second.bin", 50 * MB, None)
        .expect_err("second transfer overcommits the reservation");
    assert_eq!(err.code(), "no_space");

    // The rejected call left no state behind; the first transfer finishes.
    sim.run_until_idle();
    assert_eq!(sim.locate_file("first.bin"), vec!["b".to_string()]);
    assert!(sim.locate_file("second.bin").is_empty());
}

/// RAM admission: a source without memory for its egress process fails the
/// transfer with `oom` at runtime.
#[test]
fn ram_exhaustion_fails_with_oom() {
    let mut sim = Controller::new(quiet_config());
    sim.add_node(
        Some("tiny"),
        NodeOptions {
            storage_bytes: Some(100 * MB),
            ram_bytes: Some(100_000),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.add_node(
        Some("b"),
        NodeOptions {
            storage_bytes: Some(100 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.connect(&["tiny", "b"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    // 512 KB chunks need more RAM than the node has.
    let id = sim
        .initiate_file_transfer("tiny", "b", "big.bin", MB, None)
        .expect("admission succeeds; the kernel failure comes later");
    sim.run_until_idle();

    let view = sim.transfer_view(id).unwrap();
    assert_eq!(view.state, "failed");
    assert_eq!(view.error_code, Some("oom"));
}

/// `step` bounds simulated progress and reports what it processed.
#[test]
fn step_is_bounded_and_reported() {
    let mut sim = Controller::new(quiet_config());
    sim.add_node(Some("a"), NodeOptions::default()).unwrap();
    sim.add_node(Some("b"), NodeOptions::default()).unwrap();
    sim.connect(&["a", "b"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();
    sim.initiate_file_transfer("a", "b", "f.bin", 100 * MB, None)
        .unwrap();

    let report = sim.step(0.25).unwrap();
    assert_eq!(report.duration_secs, 0.25);
    assert!(report.events_processed > 0);
    assert!((sim.now_secs() - 0.25).abs() < 1e-9, "clock lands on the bound");

    // An event cap stops dispatch without fast-forwarding the clock.
    let capped = sim.run(None, Some(5)).unwrap();
    assert!(capped.events_processed <= 5);

    assert!(sim.step(-1.0).is_err(), "negative steps are rejected");
    assert!(sim.run(Some(0.0), None).is_err(), "bounds cannot precede now");
}
