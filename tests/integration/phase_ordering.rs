//! Phase barrier tests for `stop` and `start`.

use zoneops::model::{EventStatus, ZoneKind};
use zoneops::orchestration::OperationRequest;

use crate::fixtures::{collect, zone, Fleet, StubStager};

fn mixed_fleet() -> Fleet {
    Fleet::with_zones(
        vec![
            zone("c1", ZoneKind::Central, 1, "10.0.0.9"),
            zone("c1", ZoneKind::Game, 1, "10.0.0.1"),
            zone("c1", ZoneKind::Game, 2, "10.0.0.2"),
            zone("c1", ZoneKind::Play, 1, "10.0.0.8"),
            zone("c1", ZoneKind::Global, 1, "10.0.0.7"),
        ],
        &[
            ("Central", &[1]),
            ("Game", &[1, 2]),
            ("Play", &[1]),
            ("Global", &[1]),
        ],
    )
}

/// Index of the first log line starting with any of `dirs`.
fn first(calls: &[String], marker: &str, dirs: &[&str]) -> usize {
    calls
        .iter()
        .position(|l| dirs.iter().any(|d| *l == format!("{} {}", d, marker)))
        .unwrap()
}

fn last(calls: &[String], marker: &str, dirs: &[&str]) -> usize {
    calls
        .iter()
        .rposition(|l| dirs.iter().any(|d| *l == format!("{} {}", d, marker)))
        .unwrap()
}

const CENTRAL: &[&str] = &["/data/sh_central"];
const PLAY: &[&str] = &["/data/sh_play1"];
const GLOBAL: &[&str] = &["/data/sh_global"];
const GAME: &[&str] = &["/data/sh_1", "/data/sh_2"];

/// Given zones {Central:1, Game:1, Game:2, Play:1, Global:1}
/// When `stop` runs
/// Then phases run Central, Play, Global, Game, each after the previous ends
#[tokio::test]
async fn test_stop_phase_barriers() {
    let fleet = mixed_fleet();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("stop"))).await;
    assert!(session.done);

    let calls = fleet.calls();
    assert_eq!(calls.len(), 10, "five zones, begin and end each: {:?}", calls);
    assert!(last(&calls, "end", CENTRAL) < first(&calls, "begin", PLAY));
    assert!(last(&calls, "end", PLAY) < first(&calls, "begin", GLOBAL));
    assert!(last(&calls, "end", GLOBAL) < first(&calls, "begin", GAME));

    // The same barrier is visible on the stream.
    let central_done = session
        .position(|e| {
            e.task_id.as_deref() == Some("c1_Central_1") && e.status.is_terminal()
        })
        .unwrap();
    let play_start = session
        .position(|e| e.task_id.as_deref() == Some("c1_Play_1") && e.status == EventStatus::Start)
        .unwrap();
    assert!(central_done < play_start);
}

#[tokio::test]
async fn test_start_phase_order() {
    let fleet = mixed_fleet();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("start"))).await;
    assert!(session.done);

    let calls = fleet.calls();
    assert!(last(&calls, "end", CENTRAL) < first(&calls, "begin", GAME));
    assert!(last(&calls, "end", GAME) < first(&calls, "begin", PLAY));
    assert!(last(&calls, "end", PLAY) < first(&calls, "begin", GLOBAL));
}

#[tokio::test]
async fn test_game_zones_within_a_phase_run_concurrently() {
    let fleet = mixed_fleet();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    collect(orchestrator.run(OperationRequest::new("stop"))).await;

    // Both Game zones begin before either ends.
    let calls = fleet.calls();
    assert!(last(&calls, "begin", GAME) < first(&calls, "end", GAME));
}
