//! Placement through a file-backed inventory.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_test::assert_ok;

use zoneops::model::ZoneKind;
use zoneops::placement::{PlacementEngine, PlacementRequest, PlacementStatus};
use zoneops::store::{ChannelEntry, DataAccess, HostEntry, Inventory, InventoryStore};

use crate::fixtures::{game_host, zone};

fn inventory(hosts: Vec<HostEntry>) -> Inventory {
    let mut channels = BTreeMap::new();
    channels.insert(
        "c1".to_string(),
        ChannelEntry {
            db_host: Some("10.0.0.50".to_string()),
            http_ports: [(ZoneKind::Global, 8200)].into_iter().collect(),
            ..ChannelEntry::default()
        },
    );
    Inventory {
        channels,
        hosts,
        zones: vec![zone("c1", ZoneKind::Game, 1, "10.0.0.1")],
        ..Inventory::default()
    }
}

fn request(kind: ZoneKind, count: u32) -> PlacementRequest {
    PlacementRequest {
        channel: "c1".to_string(),
        kind,
        count,
        max_zone: None,
    }
}

/// Given a file-backed inventory with three Game hosts and zone 1 on host A
/// When four Game zones are placed
/// Then consecutive zones never share a host and the file holds the rows
#[tokio::test]
async fn test_game_placement_persists_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");
    let hosts = vec![
        game_host("c1", "10.0.0.1"),
        game_host("c1", "10.0.0.2"),
        game_host("c1", "10.0.0.3"),
    ];
    std::fs::write(&path, serde_json::to_string(&inventory(hosts)).unwrap()).unwrap();

    let store = Arc::new(assert_ok!(InventoryStore::open(&path)));
    let outcome = PlacementEngine::new(store.clone())
        .place(&request(ZoneKind::Game, 4))
        .await;
    assert_eq!(outcome.status, PlacementStatus::Success, "{}", outcome.message);

    let numbers: Vec<u32> = outcome.assignments.iter().map(|a| a.zone_number).collect();
    assert_eq!(numbers, vec![2, 3, 4, 5]);

    let reopened = assert_ok!(InventoryStore::open(&path));
    let zones = assert_ok!(reopened.list_zones().await);
    let mut by_number: Vec<(u32, String)> = zones
        .iter()
        .map(|z| (z.zone_number, z.host.internal_ip.clone()))
        .collect();
    by_number.sort();
    assert_eq!(by_number.len(), 5);
    for pair in by_number.windows(2) {
        assert_ne!(pair[0].1, pair[1].1, "zones {} and {}", pair[0].0, pair[1].0);
    }

    let active = assert_ok!(reopened.active_manifest().await);
    assert_eq!(active.zones("c1", ZoneKind::Game), &[2, 3, 4, 5]);
}

#[tokio::test]
async fn test_single_host_pool_fails_without_writes() {
    let store = Arc::new(InventoryStore::new(inventory(vec![game_host("c1", "10.0.0.1")])));
    let outcome = PlacementEngine::new(store.clone())
        .place(&request(ZoneKind::Game, 1))
        .await;

    assert_eq!(outcome.status, PlacementStatus::Error);
    assert!(outcome.message.contains("no eligible host for zone 2"));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_second_global_is_refused() {
    let mut hosts = vec![game_host("c1", "10.0.0.1")];
    hosts.push(HostEntry {
        kinds: vec![ZoneKind::Global],
        ..game_host("c1", "10.0.0.7")
    });
    let store = Arc::new(InventoryStore::new(inventory(hosts)));
    let engine = PlacementEngine::new(store.clone());

    let first = engine.place(&request(ZoneKind::Global, 1)).await;
    assert!(first.is_success(), "{}", first.message);
    assert_eq!(first.assignments[0].http_port, Some(8200));
    assert_eq!(first.assignments[0].db_name, "c1_sh_global");
    let writes = store.write_count();

    let second = engine.place(&request(ZoneKind::Global, 1)).await;
    assert_eq!(second.status, PlacementStatus::Error);
    assert!(second.message.contains("at most 1"));
    assert_eq!(store.write_count(), writes, "refusal must not write");
}
