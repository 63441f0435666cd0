//! Statistics aggregation and the boundary-surface cache.

mod fixtures;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use meshrow_core::{HistogramSpec, Machine, MachineOptions};

use fixtures::{MockLauncher, MockWorld};

async fn two_row_machine(world: &Arc<MockWorld>, dir: &Path) -> Machine {
    let mut machine = Machine::new(MachineOptions::new(dir), MockLauncher::new(world));
    machine
        .init_from_topology_init(
            &dir.join("fan.tginit"),
            &["igv".to_string(), "rotor".to_string()],
        )
        .await
        .unwrap();
    machine
}

#[tokio::test]
async fn surfaces_are_extracted_once_while_statistics_hold_still() {
    let dir = tempfile::tempdir().unwrap();
    let world = MockWorld::with_face_areas(&[]);
    let mut machine = two_row_machine(&world, dir.path()).await;

    let first = machine.boundary_surfaces().await.unwrap();
    assert_eq!(world.extract_calls.load(Ordering::SeqCst), 2);
    // one surface per row, concatenated in row order
    let names: Vec<&str> = first.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["igv/hub", "rotor/hub"]);

    let second = machine.boundary_surfaces().await.unwrap();
    assert_eq!(world.extract_calls.load(Ordering::SeqCst), 2);
    assert_eq!(second, first);
    machine.quit().await;
}

#[tokio::test]
async fn changed_statistics_invalidate_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let world = MockWorld::with_face_areas(&[]);
    let mut machine = two_row_machine(&world, dir.path()).await;

    machine.boundary_surfaces().await.unwrap();
    assert_eq!(world.extract_calls.load(Ordering::SeqCst), 2);

    // a sizing change moves the element counts, so the fingerprint moves
    machine.set_global_size_factor(0.5).await.unwrap();
    machine.boundary_surfaces().await.unwrap();
    assert_eq!(world.extract_calls.load(Ordering::SeqCst), 4);
    machine.quit().await;
}

#[tokio::test]
async fn a_failed_statistics_query_leaves_the_row_out_of_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let world = MockWorld::with_face_areas(&[]);
    world.fail_statistics.lock().push("rotor".to_string());
    let mut machine = two_row_machine(&world, dir.path()).await;

    let snapshot = machine.statistics_snapshot().await.unwrap();
    assert!(snapshot.rows.contains_key("igv"));
    assert!(!snapshot.rows.contains_key("rotor"));
    assert!(machine.errors()["rotor"]
        .iter()
        .any(|m| m.contains("Statistics query failed")));
    machine.quit().await;
}

#[tokio::test]
async fn histograms_come_back_per_row() {
    let dir = tempfile::tempdir().unwrap();
    let world = MockWorld::with_face_areas(&[]);
    let mut machine = two_row_machine(&world, dir.path()).await;

    let spec = HistogramSpec::new("Minimum Face Angle");
    let histograms = machine.histograms(&spec).await.unwrap();
    assert_eq!(histograms.len(), 2);
    let igv = &histograms["igv"];
    assert_eq!(igv.variable, "Minimum Face Angle");
    assert_eq!(igv.bin_edges.len(), igv.counts.len() + 1);
    machine.quit().await;
}

#[tokio::test]
async fn face_areas_and_size_factors_read_back_per_row() {
    let dir = tempfile::tempdir().unwrap();
    let world = MockWorld::with_face_areas(&[("igv", 0.0078), ("rotor", 0.00496)]);
    let mut machine = two_row_machine(&world, dir.path()).await;

    let areas = machine.average_base_face_areas().await.unwrap();
    assert_eq!(areas["igv"], 0.0078);
    assert_eq!(areas["rotor"], 0.00496);

    machine.set_global_size_factor(0.5).await.unwrap();
    let factors = machine.local_size_factors().await.unwrap();
    assert_eq!(factors["igv"], 0.5);
    machine.quit().await;
}

#[tokio::test]
async fn spanwise_counts_and_background_areas_read_back_per_row() {
    let dir = tempfile::tempdir().unwrap();
    let world = MockWorld::with_face_areas(&[("igv", 0.0078), ("rotor", 0.00496)]);
    let mut machine = two_row_machine(&world, dir.path()).await;

    // alternating default: first row stator, second rotor
    machine.set_spanwise_counts(30, 24, None).await.unwrap();
    let counts = machine.spanwise_element_counts().await.unwrap();
    assert_eq!(counts["igv"], 30);
    assert_eq!(counts["rotor"], 24);

    let backgrounds = machine.average_background_face_areas().await.unwrap();
    let bases = machine.average_base_face_areas().await.unwrap();
    for row in ["igv", "rotor"] {
        assert!(backgrounds[row] > bases[row]);
    }
    machine.quit().await;
}
