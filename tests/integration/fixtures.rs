//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - An in-memory fleet inventory with a recording task script
//! - Draining a session's event stream
//! - A canned HTTP endpoint for reload triggers

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use zoneops::backend::{HttpTrigger, ScriptExecutor};
use zoneops::model::{Host, ProgressEvent, ZoneKind, ZoneManifest, ZoneRecord};
use zoneops::orchestration::{ArtifactLayout, ArtifactStager, Orchestrator, SessionSettings};
use zoneops::stats::StatsAggregator;
use zoneops::store::{ChannelEntry, HostEntry, Inventory, InventoryStore, ReloadEndpoints};
use zoneops::stream::{EventReceiver, EventSender, StreamItem};
use zoneops::{Error, Result};

/// Zone row on `ip`, working directory `sh_<n>` unless overridden.
pub fn zone(channel: &str, kind: ZoneKind, n: u32, ip: &str) -> ZoneRecord {
    ZoneRecord {
        channel: channel.to_string(),
        kind,
        zone_number: n,
        dir_name: format!("/data/{}", kind.dir_name(n)),
        host: Host::new(ip, None),
        http_port: None,
        status: 0,
    }
}

pub fn game_host(channel: &str, ip: &str) -> HostEntry {
    HostEntry {
        channel: channel.to_string(),
        internal_ip: ip.to_string(),
        external_ip: None,
        kinds: vec![ZoneKind::Game],
    }
}

/// A fleet inventory plus a task script that records every invocation.
///
/// The script appends `<dir> begin` and `<dir> end` to the log file, prints
/// one line, and exits 3 when the working directory contains `fail`.
pub struct Fleet {
    pub dir: TempDir,
    pub log: PathBuf,
    pub store: Arc<InventoryStore>,
    scripts: HashMap<String, PathBuf>,
}

impl Fleet {
    pub fn new(inventory: Inventory) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let log = dir.path().join("calls.log");
        let script = dir.path().join("operation_game.sh");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/bash
echo "$3 begin" >> '{log}'
echo "working on $3 ($4)"
sleep 0.3
case "$3" in
  *fail*) echo "broken zone" >&2; echo "$3 end" >> '{log}'; exit 3 ;;
esac
echo "$3 end" >> '{log}'
"#,
                log = log.display()
            ),
        )
        .expect("Failed to write script");

        let mut scripts = HashMap::new();
        scripts.insert("default".to_string(), script);
        Self {
            dir,
            log,
            store: Arc::new(InventoryStore::new(inventory)),
            scripts,
        }
    }

    /// Inventory for channel `c1` with `zones` and `active` selected.
    pub fn with_zones(zones: Vec<ZoneRecord>, active: &[(&str, &[u32])]) -> Self {
        let mut manifest = ZoneManifest::new();
        for (kind, numbers) in active {
            for n in *numbers {
                manifest.insert("c1", kind, *n);
            }
        }
        let mut channels = BTreeMap::new();
        channels.insert(
            "c1".to_string(),
            ChannelEntry {
                initial_id: 100,
                db_host: Some("10.0.0.50".to_string()),
                ..ChannelEntry::default()
            },
        );
        Self::new(Inventory {
            channels,
            zones,
            active: manifest,
            reload_endpoints: ReloadEndpoints {
                game: "/reload?zones=".to_string(),
                status: "/reload/status".to_string(),
                other: "/reload/other".to_string(),
            },
            ..Inventory::default()
        })
    }

    pub fn orchestrator(&self, stager: StubStager) -> Orchestrator {
        let settings = SessionSettings {
            max_workers: 4,
            layout: ArtifactLayout::new(self.dir.path().join("artifacts")),
            ..SessionSettings::default()
        }
        .immediate();
        Orchestrator::new(
            self.store.clone(),
            Arc::new(ScriptExecutor::new(self.scripts.clone(), Some(Duration::from_secs(10)))),
            Arc::new(stager),
            HttpTrigger::new(Duration::from_secs(2)).expect("Failed to build http client"),
        )
        .with_settings(settings)
    }

    /// Lines the task script appended, in write order.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }
}

/// Stager that succeeds with a fixed revision or fails with a message.
pub enum StubStager {
    Revision(&'static str),
    Fail(&'static str),
}

#[async_trait]
impl ArtifactStager for StubStager {
    async fn stage(
        &self,
        _manifest: &ZoneManifest,
        events: &EventSender,
        _stats: &Arc<StatsAggregator>,
    ) -> Result<String> {
        match self {
            StubStager::Revision(rev) => {
                events.send(ProgressEvent::info(format!("package svn revision: {}", rev)));
                Ok(rev.to_string())
            }
            StubStager::Fail(message) => Err(Error::Staging(message.to_string())),
        }
    }
}

/// Everything a session emitted.
pub struct Collected {
    pub events: Vec<ProgressEvent>,
    /// Whether the terminal marker arrived.
    pub done: bool,
}

impl Collected {
    pub fn for_task(&self, task_id: &str) -> Vec<&ProgressEvent> {
        self.events
            .iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .collect()
    }

    /// Position of the first event matching `pred`.
    pub fn position<F: Fn(&ProgressEvent) -> bool>(&self, pred: F) -> Option<usize> {
        self.events.iter().position(pred)
    }
}

pub async fn collect(mut rx: EventReceiver) -> Collected {
    let mut events = Vec::new();
    let mut done = false;
    while let Some(item) = rx.recv().await {
        match item {
            StreamItem::Event(event) => events.push(event),
            StreamItem::Done => done = true,
        }
    }
    Collected { events, done }
}

/// Answer `count` HTTP requests with `200 ok`. The handle yields each
/// request line in arrival order.
pub async fn serve_ok(count: usize) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let port = listener.local_addr().expect("Failed to read address").port();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..count {
            let (mut socket, _) = listener.accept().await.expect("accept failed");
            let mut buf = [0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            seen.push(request.lines().next().unwrap_or_default().to_string());
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await;
        }
        seen
    });
    (port, handle)
}
