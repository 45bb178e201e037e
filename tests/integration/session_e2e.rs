//! End-to-end session tests.
//!
//! Each test starts one operation session and consumes its whole stream.

use futures::StreamExt;

use zoneops::model::{EventStatus, ZoneKind};
use zoneops::orchestration::{OperationRequest, SyncMode};

use crate::fixtures::{collect, serve_ok, zone, Fleet, StubStager};

fn two_game_zones() -> Fleet {
    Fleet::with_zones(
        vec![
            zone("c1", ZoneKind::Game, 1, "10.0.0.1"),
            zone("c1", ZoneKind::Game, 2, "10.0.0.2"),
        ],
        &[("Game", &[1, 2])],
    )
}

/// Given manifest {"c1": {"Game": [1, 2]}}
/// When `status` runs
/// Then both zone tasks run and the session ends with statistics and completed
#[tokio::test]
async fn test_status_session_end_to_end() {
    let fleet = two_game_zones();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("status"))).await;
    assert!(session.done, "session should end with the terminal marker");

    for id in ["c1_Game_1", "c1_Game_2"] {
        let events = session.for_task(id);
        assert_eq!(events.first().unwrap().status, EventStatus::Start);
        assert!(events
            .iter()
            .any(|e| e.status == EventStatus::Running && e.message.contains("(status)")));
        assert_eq!(events.last().unwrap().status, EventStatus::Success);
        let terminal = events.iter().filter(|e| e.status.is_terminal()).count();
        assert_eq!(terminal, 1, "exactly one terminal event for {}", id);
    }

    let stats = session.events.last().unwrap();
    assert_eq!(stats.status, EventStatus::Statistics);
    let data = stats.data.as_ref().unwrap();
    assert_eq!(data["total_executions"], 2);
    assert_eq!(data["total_failures"], 0);
    assert_eq!(data["per_task"]["c1_Game_1"]["executions"], 1);
}

#[tokio::test]
async fn test_status_frames_end_with_completed() {
    let fleet = two_game_zones();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let frames: Vec<String> = orchestrator
        .run(OperationRequest::new("status_game"))
        .into_frames()
        .collect()
        .await;

    assert!(frames.iter().all(|f| f.starts_with("data: {") && f.ends_with("}\n\n")));
    assert!(frames[frames.len() - 2].contains("\"status\": \"statistics\""));
    assert_eq!(
        frames.last().unwrap(),
        "data: {\"status\": \"completed\", \"message\": \"all tasks finished\"}\n\n"
    );
}

#[tokio::test]
async fn test_unknown_operation_yields_single_error_frame() {
    let fleet = two_game_zones();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let frames: Vec<String> = orchestrator
        .run(OperationRequest::new("explode"))
        .into_frames()
        .collect()
        .await;

    assert_eq!(frames.len(), 1);
    assert!(frames[0].contains("\"status\": \"error\""));
    assert!(frames[0].contains("explode"));
    assert!(fleet.calls().is_empty(), "no task may run");
}

#[tokio::test]
async fn test_failing_zone_does_not_stop_siblings() {
    let mut broken = zone("c1", ZoneKind::Game, 2, "10.0.0.2");
    broken.dir_name = "/data/sh_2_fail".to_string();
    let fleet = Fleet::with_zones(
        vec![zone("c1", ZoneKind::Game, 1, "10.0.0.1"), broken],
        &[("Game", &[1, 2])],
    );
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("update"))).await;
    assert!(session.done);

    let failed = session.for_task("c1_Game_2");
    let last = failed.last().unwrap();
    assert_eq!(last.status, EventStatus::Failed);
    assert_eq!(last.message, "task failed (exit code 3)");
    // stderr is streamed like stdout.
    assert!(failed.iter().any(|e| e.message == "broken zone"));

    assert_eq!(
        session.for_task("c1_Game_1").last().unwrap().status,
        EventStatus::Success
    );
    let data = session.events.last().unwrap().data.clone().unwrap();
    assert_eq!(data["total_executions"], 2);
    assert_eq!(data["total_failures"], 1);
}

#[tokio::test]
async fn test_missing_zone_is_reported_and_skipped() {
    let fleet = Fleet::with_zones(
        vec![zone("c1", ZoneKind::Game, 1, "10.0.0.1")],
        &[("Game", &[1, 7])],
    );
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("status"))).await;
    assert!(session.done);
    assert!(session
        .events
        .iter()
        .any(|e| e.status == EventStatus::Warning && e.message.contains("zone=7")));
    assert_eq!(
        session.events.last().unwrap().data.as_ref().unwrap()["total_executions"],
        1
    );
}

#[tokio::test]
async fn test_rsync_dispatches_one_task_per_host() {
    let fleet = Fleet::with_zones(
        vec![
            zone("c1", ZoneKind::Game, 1, "10.0.0.1"),
            zone("c1", ZoneKind::Game, 2, "10.0.0.2"),
            zone("c1", ZoneKind::Game, 3, "10.0.0.1"),
        ],
        &[("Game", &[1, 2, 3])],
    );
    let orchestrator = fleet.orchestrator(StubStager::Revision("873"));

    let request = OperationRequest::new("rsync").with_sync_mode(SyncMode::Battle);
    let session = collect(orchestrator.run(request)).await;
    assert!(session.done);
    assert!(session
        .events
        .iter()
        .any(|e| e.message == "package svn revision: 873"));

    let mut ids: Vec<&str> = session
        .events
        .iter()
        .filter(|e| e.status == EventStatus::Start)
        .filter_map(|e| e.task_id.as_deref())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["RSYNC_c1_10.0.0.1", "RSYNC_c1_10.0.0.2"]);

    // The script saw the sync marker as its third argument.
    let calls = fleet.calls();
    assert_eq!(calls.iter().filter(|l| *l == "rsync begin").count(), 2);
}

#[tokio::test]
async fn test_rsync_staging_failure_runs_nothing() {
    let fleet = two_game_zones();
    let orchestrator = fleet.orchestrator(StubStager::Fail("svn update failed: conflict"));

    let request = OperationRequest::new("rsync").with_sync_mode(SyncMode::Update);
    let session = collect(orchestrator.run(request)).await;

    assert!(!session.done);
    assert_eq!(session.events.len(), 1);
    assert_eq!(session.events[0].status, EventStatus::Error);
    assert!(session.events[0].message.contains("svn update failed: conflict"));
    assert!(fleet.calls().is_empty());
}

/// Given a Central zone with an HTTP port and two Game zones
/// When `reload` runs
/// Then base tasks run first, then the trigger URL, then the status URL
#[tokio::test]
async fn test_reload_issues_trigger_then_status() {
    let (port, server) = serve_ok(2).await;
    let mut central = zone("c1", ZoneKind::Central, 1, "127.0.0.1");
    central.http_port = Some(port);
    let fleet = Fleet::with_zones(
        vec![
            central,
            zone("c1", ZoneKind::Game, 1, "10.0.0.1"),
            zone("c1", ZoneKind::Game, 2, "10.0.0.2"),
        ],
        &[("Game", &[1, 2])],
    );
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("reload"))).await;
    assert!(session.done);

    // Central is reloaded alongside the listed Game zones.
    assert!(!session.for_task("c1_Central_1").is_empty());

    let requests = server.await.unwrap();
    assert_eq!(
        requests,
        vec![
            "GET /reload?zones=101_102 HTTP/1.1".to_string(),
            "GET /reload/status HTTP/1.1".to_string(),
        ]
    );

    let last_task_event = session
        .events
        .iter()
        .rposition(|e| e.task_id.is_some())
        .unwrap();
    let trigger_ok = session
        .position(|e| e.status == EventStatus::Success && e.message.starts_with("reload trigger"))
        .unwrap();
    let status_ok = session
        .position(|e| {
            e.status == EventStatus::Success && e.message.starts_with("reload status check")
        })
        .unwrap();
    assert!(last_task_event < trigger_ok);
    assert!(trigger_ok < status_ok);

    let n = session.events.len();
    assert_eq!(session.events[n - 2].message, "reload flow finished");
}

#[tokio::test]
async fn test_deploy_passes_lock_flags_to_script() {
    let fleet = two_game_zones();
    let orchestrator = fleet.orchestrator(StubStager::Revision("1"));

    let session = collect(orchestrator.run(OperationRequest::new("initial"))).await;
    assert!(session.done);

    // Deploy parameters shift the working directory to the fourth slot,
    // so the script's third argument is the zone kind.
    let calls = fleet.calls();
    assert_eq!(calls.iter().filter(|l| *l == "Game begin").count(), 2);
    assert!(session
        .events
        .iter()
        .any(|e| e.status == EventStatus::Running && e.message.contains("(/data/sh_1)")));
}
