//! End-to-end phase statistics preservation.
//!
//! Runs a real three-phase plugin through the orchestrator, feeds the
//! event stream into a tab, and verifies that completed phase snapshots
//! survive later phases, PTY restarts, and collector replacement.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use upkeep_core::{Phase, PhaseCommand, PluginSpec, RunOptions, StreamEvent, event_channel};
use upkeep_runner::Orchestrator;
use upkeep_tui::TabState;

fn three_phase_plugin(name: &str, millis: u64) -> PluginSpec {
    let script = format!("sleep {}", millis as f64 / 1000.0);
    let phase = |s: &str| PhaseCommand::new(["/bin/sh", "-c", s]);
    let mut spec = PluginSpec::new(name)
        .phase(Phase::Check, phase(&script))
        .phase(Phase::Download, phase(&script))
        .phase(Phase::Execute, phase(&script))
        .with_separate_download();
    spec.skippable = vec![];
    spec
}

#[tokio::test]
async fn three_phase_run_leaves_three_distinct_snapshots() {
    let orchestrator = Orchestrator::new(
        vec![three_phase_plugin("multi", 150)],
        RunOptions::default(),
    );
    let (tx, mut rx) = event_channel(1024);

    let run = tokio::spawn(async move { orchestrator.run(tx).await });

    let mut tab = TabState::new("multi", 80, 24);
    let mut update_snapshot_at_download_start = None;
    while let Some(event) = rx.recv().await {
        // Capture the completed Update snapshot the moment the next
        // phase begins; it must already be final.
        if let StreamEvent::PhaseStart {
            phase: Phase::Download,
            ..
        } = &event
        {
            update_snapshot_at_download_start = tab.metrics().get_phase_snapshot("Update");
        }
        tab.apply(&event);
    }
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.successful, 1);

    let snapshots = tab.metrics().all_snapshots();
    assert_eq!(snapshots.len(), 3);
    for key in ["Update", "Download", "Upgrade"] {
        let snapshot = snapshots.get(key).unwrap();
        assert!(
            snapshot.wall_time >= Duration::from_millis(100),
            "{key} wall time too small: {:?}",
            snapshot.wall_time
        );
        assert!(snapshot.success);
    }

    // Each phase slept 150 ms, so the accumulated wall time covers all
    // three.
    let accumulated = tab.metrics().accumulated();
    assert!(accumulated.wall_time >= Duration::from_millis(450));

    // The Update snapshot read back mid-run is identical to the final
    // one: starting Download never mutated it.
    let early = update_snapshot_at_download_start.unwrap();
    let final_update = snapshots.get("Update").unwrap();
    assert_eq!(early, *final_update);
}

#[tokio::test]
async fn collector_replacement_between_phases_preserves_snapshots() {
    let orchestrator = Orchestrator::new(
        vec![three_phase_plugin("multi", 50)],
        RunOptions::default(),
    );
    let (tx, mut rx) = event_channel(1024);
    let run = tokio::spawn(async move { orchestrator.run(tx).await });

    let mut tab = TabState::new("multi", 80, 24);
    while let Some(event) = rx.recv().await {
        // A fresh PTY per phase: model the app recreating the collector
        // at every phase boundary, which must not clear the store.
        if matches!(event, StreamEvent::PhaseStart { .. }) {
            tab.replace_collector();
        }
        tab.apply(&event);
    }
    run.await.unwrap().unwrap();

    let snapshots = tab.metrics().all_snapshots();
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.values().all(|s| s.success));
}

#[tokio::test]
async fn skipped_phases_leave_no_snapshot() {
    // The check reports an empty update set, so Download and Execute
    // are skipped and only the Update snapshot exists.
    let check = r#"echo 'PROGRESS:{"phase":"check","items_total":0}'"#;
    let phase = |s: &str| PhaseCommand::new(["/bin/sh", "-c", s]);
    let mut spec = PluginSpec::new("idle")
        .phase(Phase::Check, phase(check))
        .phase(Phase::Download, phase("echo never"))
        .phase(Phase::Execute, phase("echo never"))
        .with_separate_download();
    spec.skippable = vec![Phase::Download, Phase::Execute];

    let orchestrator = Orchestrator::new(vec![spec], RunOptions::default());
    let (tx, mut rx) = event_channel(1024);
    let run = tokio::spawn(async move { orchestrator.run(tx).await });

    let mut tab = TabState::new("idle", 80, 24);
    while let Some(event) = rx.recv().await {
        tab.apply(&event);
    }
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.successful, 1);

    let snapshots = tab.metrics().all_snapshots();
    assert!(snapshots.contains_key("Update"));
    assert!(!snapshots.contains_key("Download"));
    assert!(!snapshots.contains_key("Upgrade"));
}
