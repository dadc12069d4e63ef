//! Replica clusters: fan-out, backfill, demand-driven scaling, and the
//! push/fetch surface.

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

fn cluster_node(sim: &mut Controller, name: &str, root: Option<&str>) {
    sim.add_node(
        Some(name),
        NodeOptions {
            storage_bytes: Some(1_000 * MB),
            zone: Some("us-east-1a".into()),
            cluster_root: root.map(String::from),
            ..NodeOptions::default()
        },
    )
    .unwrap();
}

/// Replica fan-out: a write landing on one member ends up on every member,
/// with one primary completion plus one replica completion per sibling.
#[test]
fn completed_write_fans_out_to_cluster() {
    let mut sim = Controller::new(quiet_config());
    cluster_node(&mut sim, "a1", None);
    cluster_node(&mut sim, "a2", Some("a1"));
    cluster_node(&mut sim, "a3", Some("a1"));
    // One link; auto-wiring mirrors it across the cluster into a mesh.
    sim.connect(&["a1", "a2"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    let (target, _) = sim.push("a1", "doc.bin", 10 * MB, true).unwrap();
    assert_eq!(target, "a1");
    sim.run_until_idle();

    let mut holders = sim.locate_file("doc.bin");
    holders.sort();
    assert_eq!(
        holders,
        vec!["a1".to_string(), "a2".to_string(), "a3".to_string()],
        "every member must hold the file"
    );

    let completions = sim
        .events(256)
        .iter()
        .filter(|e| e.kind.as_str() == "transfer_completed")
        .count();
    assert_eq!(completions, 3, "one primary plus two replica completions");

    // Checksums agree across members: the snapshot carries every chunk
    // record, so compare them pairwise through it.
    let blob = sim.snapshot().unwrap();
    let json: serde_json::Value = serde_json::from_slice(&blob).unwrap();
    let nodes = json["nodes"].as_array().unwrap();
    let checksums_of = |name: &str| -> Vec<String> {
        let node = nodes
            .iter()
            .find(|n| n["name"] == name)
            .unwrap_or_else(|| panic!("{name} in snapshot"));
        let files = node["files"].as_array().unwrap();
        let doc = files.iter().find(|f| f["file"] == "doc.bin").unwrap();
        doc["chunks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["checksum"].as_str().unwrap().to_string())
            .collect()
    };
    let reference = checksums_of("a1");
    assert!(!reference.is_empty());
    assert_eq!(checksums_of("a2"), reference, "a2 checksums match the primary");
    assert_eq!(checksums_of("a3"), reference, "a3 checksums match the primary");
}

/// Fan-out correctness under failure: with all members but one down, the
/// survivor still has every file whose write ever completed.
#[test]
fn single_survivor_retains_every_file() {
    let mut sim = Controller::new(quiet_config());
    cluster_node(&mut sim, "a1", None);
    cluster_node(&mut sim, "a2", Some("a1"));
    cluster_node(&mut sim, "a3", Some("a1"));
    sim.connect(&["a1", "a2"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    for (node, file) in [("a1", "one.bin"), ("a2", "two.bin"), ("a3", "three.bin")] {
        sim.push(node, file, 5 * MB, true).unwrap();
        sim.run_until_idle();
    }

    sim.fail_node("a1").unwrap();
    sim.fail_node("a2").unwrap();
    sim.run_until_idle();

    for file in ["one.bin", "two.bin", "three.bin"] {
        assert!(
            sim.locate_file(file).contains(&"a3".to_string()),
            "survivor a3 must hold {file}"
        );
    }
}

/// Disk pressure past the threshold spawns exactly one replica, wired to
/// the parent, and backfills the stored data.
#[test]
fn storage_pressure_spawns_one_replica() {
    let mut sim = Controller::new(SimConfig::default());
    sim.add_node(
        Some("n"),
        NodeOptions {
            storage_bytes: Some(100 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();

    sim.push("n", "big.bin", 90 * MB, true).unwrap();
    sim.run_until_idle();

    let clusters = sim.clusters();
    let members = clusters.get("n").expect("n roots its cluster");
    assert_eq!(
        members,
        &vec!["n".to_string(), "n-r1".to_string()],
        "exactly one replica spawned"
    );

    let spawn_events = sim
        .events(256)
        .iter()
        .filter(|e| e.kind.as_str() == "replica_spawned")
        .count();
    assert_eq!(spawn_events, 1);

    let child = sim.inspect("n-r1").unwrap();
    assert!(
        child.neighbors.contains(&"n".to_string()),
        "replica links back to its parent"
    );
    assert_eq!(child.replica_parent.as_deref(), Some("n"));
    assert!(
        sim.locate_file("big.bin").contains(&"n-r1".to_string()),
        "replica backfills the stored file"
    );
}

/// `push` places a file on the roomiest reachable node; `fetch`
/// materializes it wherever the caller wants it.
#[test]
fn push_picks_capacity_and_fetch_materializes() {
    let mut sim = Controller::new(quiet_config());
    cluster_node(&mut sim, "small", None);
    sim.add_node(
        Some("big"),
        NodeOptions {
            storage_bytes: Some(10_000 * MB),
            zone: Some("us-east-1a".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    cluster_node(&mut sim, "edge", None);
    sim.connect(&["small", "big", "edge"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    let (target, _) = sim.push("small", "archive.bin", 50 * MB, false).unwrap();
    assert_eq!(target, "big", "push selects the node with the most free space");
    sim.run_until_idle();

    // Fetch onto a node that does not hold it.
    let fetched = sim.fetch("edge", "archive.bin").unwrap();
    assert!(fetched.is_some());
    sim.run_until_idle();
    assert!(sim.locate_file("archive.bin").contains(&"edge".to_string()));

    // Fetching again is a no-op: the copy is already local.
    assert!(sim.fetch("edge", "archive.bin").unwrap().is_none());
}

/// A replica sync failure is surfaced but leaves the primary intact.
#[test]
fn replica_sync_failure_does_not_roll_back_primary() {
    let mut sim = Controller::new(quiet_config());
    cluster_node(&mut sim, "a1", None);
    // Sibling too small to hold the file: the sync fails with no_space.
    sim.add_node(
        Some("a2"),
        NodeOptions {
            storage_bytes: Some(1 * MB),
            zone: Some("us-east-1a".into()),
            cluster_root: Some("a1".into()),
            ..NodeOptions::default()
        },
    )
    .unwrap();
    sim.connect(&["a1", "a2"], Some(GBPS), Some(Duration::from_millis(1)))
        .unwrap();

    sim.push("a1", "big.bin", 20 * MB, true).unwrap();
    sim.run_until_idle();

    assert!(
        sim.locate_file("big.bin").contains(&"a1".to_string()),
        "primary copy stays committed"
    );
    let sync_failures = sim
        .events(256)
        .iter()
        .filter(|e| e.kind.as_str() == "replica_sync_failed")
        .count();
    assert_eq!(sync_failures, 1, "the failed sync is surfaced exactly once");
    assert_eq!(sim.telemetry().counters.replica_syncs_failed, 1);
}
