//! Failure injection: link loss mid-transfer, unreachable destinations,
//! node outages, and disk corruption.

use cloudsim_engine::{Controller, NodeOptions, ScalingConfig, SimConfig};
use cloudsim_network::RoutingStrategy;
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

fn storage_node(sim: &mut Controller, name: &str) {
    sim.add_node(
        Some(name),
        NodeOptions {
            storage_bytes: Some(2_000 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
}

/// Failing a link mid-transfer with an alternate path reroutes and
/// completes; the event log shows the failure, the recompute, and the
/// completion in order.
#[test]
fn link_failure_with_alternate_path_reroutes() {
    let mut sim = Controller::new(quiet_config());
    for name in ["a", "b", "c", "d", "e"] {
        storage_node(&mut sim, name);
    }
    // Primary path a-b-c-d; detour a-e-c costs more so it only wins once
    // b-c dies.
    sim.connect(&["a", "b", "c", "d"], Some(GBPS), Some(Duration::from_millis(10)))
        .unwrap();
    sim.connect(&["a", "e", "c"], Some(GBPS), Some(Duration::from_millis(15)))
        .unwrap();

    let id = sim
        .initiate_file_transfer("a", "d", "payload.bin", 100 * MB, None)
        .unwrap();
    sim.step(0.5).unwrap();
    sim.fail_link("b", "c").unwrap();
    sim.run_until_idle();

    let view = sim.transfer_view(id).unwrap();
    assert_eq!(
        view.state, "completed",
        "transfer should survive the reroute, error: {:?}",
        view.error_code
    );

    // Event ordering: link_failed, then route_recomputed, then completion.
    let events = sim.events(256);
    let failed_at = events
        .iter()
        .position(|e| e.kind.as_str() == "link_failed")
        .expect("link_failed logged");
    let recomputed_at = events
        .iter()
        .skip(failed_at)
        .position(|e| e.kind.as_str() == "route_recomputed")
        .expect("route_recomputed logged after the failure");
    let completed_at = events
        .iter()
        .position(|e| {
            e.kind.as_str() == "transfer_completed"
                && e.fields.iter().any(|(k, v)| k == "file" && v == "payload.bin")
        })
        .expect("transfer_completed logged");
    assert!(
        failed_at + recomputed_at < completed_at,
        "completion must come after the reroute"
    );
}

/// Failing the only path yields `route_lost` and a sticky failed state.
#[test]
fn link_failure_without_alternate_fails_with_route_lost() {
    let mut sim = Controller::new(quiet_config());
    for name in ["a", "b", "c"] {
        storage_node(&mut sim, name);
    }
    sim.connect(&["a", "b", "c"], Some(GBPS), Some(Duration::from_millis(10)))
        .unwrap();

    let id = sim
        .initiate_file_transfer("a", "c", "doomed.bin", 100 * MB, None)
        .unwrap();
    sim.step(0.2).unwrap();
    sim.fail_link("b", "c").unwrap();
    sim.run_until_idle();

    let view = sim.transfer_view(id).unwrap();
    assert_eq!(view.state, "failed");
    assert_eq!(view.error_code, Some("route_lost"));

    // Restoring the link later does not resurrect a terminal transfer.
    sim.restore_link("b", "c").unwrap();
    sim.run_until_idle();
    assert_eq!(sim.transfer_view(id).unwrap().state, "failed");
}

/// A destination node failure kills its transfers with `node_offline`;
/// siblings to other destinations keep running.
#[test]
fn node_failure_only_kills_its_own_transfers() {
    let mut sim = Controller::new(quiet_config());
    for name in ["src", "dst1", "dst2"] {
        storage_node(&mut sim, name);
    }
    sim.connect(&["dst1", "src", "dst2"], Some(GBPS), Some(Duration::from_millis(5)))
        .unwrap();

    let doomed = sim
        .initiate_file_transfer("src", "dst1", "doomed.bin", 50 * MB, None)
        .unwrap();
    let survivor = sim
        .initiate_file_transfer("src", "dst2", "fine.bin", 50 * MB, None)
        .unwrap();
    sim.step(0.1).unwrap();
    sim.fail_node("dst1").unwrap();
    sim.run_until_idle();

    assert_eq!(sim.transfer_view(doomed).unwrap().state, "failed");
    assert_eq!(
        sim.transfer_view(doomed).unwrap().error_code,
        Some("node_offline")
    );
    assert_eq!(
        sim.transfer_view(survivor).unwrap().state,
        "completed",
        "unrelated transfer must be unaffected"
    );

    // The failed node comes back with its committed data intact.
    sim.restore_node("dst1").unwrap();
    let report = sim.inspect("dst1").unwrap();
    assert!(report.online);
}

/// Corruption flips a chunk bad, the next read fails with
/// `checksum_mismatch`, and recovery restores read success.
#[test]
fn corruption_then_recovery_round_trips() {
    let mut sim = Controller::new(quiet_config());
    for name in ["a", "b"] {
        storage_node(&mut sim, name);
    }
    sim.connect(&["a", "b"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();
    sim.initiate_file_transfer("a", "b", "data.bin", 10 * MB, None)
        .unwrap();
    sim.run_until_idle();
    assert_eq!(sim.locate_file("data.bin"), vec!["b".to_string()]);

    sim.inject_corruption("b", "data.bin", 0).unwrap();

    // Replicating off the corrupt copy trips the checksum check.
    let bad = sim.initiate_replica_transfer("b", "a", "data.bin").unwrap();
    sim.run_until_idle();
    let view = sim.transfer_view(bad).unwrap();
    assert_eq!(view.state, "failed");
    assert_eq!(view.error_code, Some("checksum_mismatch"));
    // Release the partial residue the failed sync left on the target.
    sim.abort(bad).unwrap();

    // Recover, then the same replication succeeds.
    sim.recover_chunk("b", "data.bin", 0).unwrap();
    let good = sim.initiate_replica_transfer("b", "a", "data.bin").unwrap();
    sim.run_until_idle();
    assert_eq!(sim.transfer_view(good).unwrap().state, "completed");
    let mut holders = sim.locate_file("data.bin");
    holders.sort();
    assert_eq!(holders, vec!["a".to_string(), "b".to_string()]);
}

/// Distance-vector tables converge through periodic exchanges; routes exist
/// only after convergence and heal after a failure.
#[test]
fn distance_vector_converges_and_heals() {
    let mut sim = Controller::new(SimConfig {
        routing_strategy: RoutingStrategy::DistanceVector,
        scaling: ScalingConfig {
            enabled: false,
            ..ScalingConfig::default()
        },
        ..SimConfig::default()
    });
    for name in ["a", "b", "c"] {
        storage_node(&mut sim, name);
    }
    sim.connect(&["a", "b", "c"], Some(GBPS), Some(Duration::from_millis(5)))
        .unwrap();

    // Before any exchange round, a only knows its direct neighbor.
    let err = sim
        .initiate_file_transfer("a", "c", "early.bin", MB, None)
        .unwrap_err();
    assert_eq!(err.code(), "no_route");

    // Let exchange rounds run (one per dv_interval).
    sim.step(5.0).unwrap();
    let id = sim
        .initiate_file_transfer("a", "c", "later.bin", 10 * MB, None)
        .unwrap();
    sim.run_until_idle();
    assert_eq!(sim.transfer_view(id).unwrap().state, "completed");
}
