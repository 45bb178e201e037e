//! JSON inventory backing the data-access seam.
//!
//! The whole inventory is held in memory behind a `RwLock`. When opened from
//! a file, every write is flushed back to that file by writing a sibling
//! temp file and renaming it over the original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DataAccess, ReloadEndpoint};
use crate::error::{Error, Result};
use crate::model::zone::STATUS_EXCLUDED_FROM_MAX;
use crate::model::{Host, ZoneAssignment, ZoneKind, ZoneManifest, ZoneRecord};
use crate::olog_debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelEntry {
    /// Reach zones through external addresses.
    pub external: bool,
    pub initial_id: u32,
    pub db_host: Option<String>,
    /// Central/Global: the zone's port. Play: base port, zone number added.
    pub http_ports: BTreeMap<ZoneKind, u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub channel: String,
    pub internal_ip: String,
    #[serde(default)]
    pub external_ip: Option<String>,
    /// Zone kinds this host is designated for.
    #[serde(default)]
    pub kinds: Vec<ZoneKind>,
}

impl HostEntry {
    pub fn host(&self) -> Host {
        Host {
            internal_ip: self.internal_ip.clone(),
            external_ip: self.external_ip.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadEndpoints {
    pub game: String,
    pub status: String,
    pub other: String,
}

/// Everything the inventory file holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub channels: BTreeMap<String, ChannelEntry>,
    pub hosts: Vec<HostEntry>,
    pub zones: Vec<ZoneRecord>,
    pub reload_endpoints: ReloadEndpoints,
    pub active: ZoneManifest,
}

#[derive(Debug, Default)]
pub struct InventoryStore {
    inner: RwLock<Inventory>,
    path: Option<PathBuf>,
    writes: AtomicUsize,
    /// Held from snapshot to rename, so flushes land in snapshot order.
    flush_lock: tokio::sync::Mutex<()>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Store("inventory lock poisoned".to_string())
}

impl InventoryStore {
    /// In-memory store; writes are kept but never flushed.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inner: RwLock::new(inventory),
            path: None,
            writes: AtomicUsize::new(0),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        olog_debug!("InventoryStore::open path={}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let inventory: Inventory = serde_json::from_str(&raw)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            ..Self::new(inventory)
        })
    }

    /// Number of mutating calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Owned copy of the current inventory.
    pub fn snapshot(&self) -> Result<Inventory> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inventory>> {
        self.inner.read().map_err(poison_err)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inventory>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write().map_err(poison_err)
    }

    fn channel(&self, channel: &str) -> Result<ChannelEntry> {
        self.read()?
            .channels
            .get(channel)
            .cloned()
            .ok_or_else(|| Error::Lookup(format!("unknown channel: {}", channel)))
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _flushing = self.flush_lock.lock().await;
        let json = serde_json::to_string_pretty(&*self.read()?)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn push_zone(inventory: &mut Inventory, assignment: &ZoneAssignment) -> Result<()> {
        let exists = inventory.zones.iter().any(|z| {
            z.channel == assignment.channel
                && z.kind == assignment.zone_kind
                && z.zone_number == assignment.zone_number
        });
        if exists {
            return Err(Error::Store(format!(
                "zone {} {} {} already exists",
                assignment.channel, assignment.zone_kind, assignment.zone_number
            )));
        }
        inventory.zones.push(assignment.to_record());
        Ok(())
    }
}

/// `.<name>.tmp` next to `path`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "inventory".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

#[async_trait]
impl DataAccess for InventoryStore {
    async fn active_manifest(&self) -> Result<ZoneManifest> {
        Ok(self.read()?.active.clone())
    }

    async fn write_active_manifest(&self, manifest: &ZoneManifest) -> Result<()> {
        self.write()?.active = manifest.clone();
        self.flush().await
    }

    async fn zone_record(
        &self,
        channel: &str,
        kind: ZoneKind,
        zone: u32,
    ) -> Result<Option<ZoneRecord>> {
        Ok(self
            .read()?
            .zones
            .iter()
            .find(|z| z.channel == channel && z.kind == kind && z.zone_number == zone)
            .cloned())
    }

    async fn network_switch(&self, channel: &str) -> Result<bool> {
        // Channels without an entry default to internal addressing.
        Ok(self
            .read()?
            .channels
            .get(channel)
            .map(|c| c.external)
            .unwrap_or(false))
    }

    async fn external_address(&self, internal: &str) -> Result<Option<String>> {
        Ok(self
            .read()?
            .hosts
            .iter()
            .find(|h| h.internal_ip == internal)
            .and_then(|h| h.external_ip.clone()))
    }

    async fn reload_endpoint(&self, endpoint: ReloadEndpoint) -> Result<String> {
        let inventory = self.read()?;
        let endpoints = &inventory.reload_endpoints;
        Ok(match endpoint {
            ReloadEndpoint::Game => endpoints.game.clone(),
            ReloadEndpoint::Status => endpoints.status.clone(),
            ReloadEndpoint::Other => endpoints.other.clone(),
        })
    }

    async fn channel_initial_id(&self, channel: &str) -> Result<u32> {
        Ok(self.channel(channel)?.initial_id)
    }

    async fn hosts_for_kind(&self, channel: &str, kind: ZoneKind) -> Result<Vec<Host>> {
        Ok(self
            .read()?
            .hosts
            .iter()
            .filter(|h| h.channel == channel && h.kinds.contains(&kind))
            .map(HostEntry::host)
            .collect())
    }

    async fn db_host(&self, channel: &str) -> Result<Option<String>> {
        Ok(self
            .read()?
            .channels
            .get(channel)
            .and_then(|c| c.db_host.clone()))
    }

    async fn http_port_base(&self, channel: &str, kind: ZoneKind) -> Result<Option<u16>> {
        Ok(self
            .read()?
            .channels
            .get(channel)
            .and_then(|c| c.http_ports.get(&kind).copied()))
    }

    async fn max_zone(&self, channel: &str, kind: ZoneKind) -> Result<Option<u32>> {
        Ok(self
            .read()?
            .zones
            .iter()
            .filter(|z| z.channel == channel && z.kind == kind)
            .filter(|z| z.status != STATUS_EXCLUDED_FROM_MAX)
            .map(|z| z.zone_number)
            .max())
    }

    async fn list_zones(&self) -> Result<Vec<ZoneRecord>> {
        Ok(self.read()?.zones.clone())
    }

    async fn insert_zone(&self, assignment: &ZoneAssignment) -> Result<()> {
        {
            let mut inventory = self.write()?;
            Self::push_zone(&mut inventory, assignment)?;
        }
        self.flush().await
    }

    async fn write_zone_assignments(&self, batch: &[ZoneAssignment]) -> Result<()> {
        {
            let mut inventory = self.write()?;
            // Validate the whole batch before touching the zone list.
            let mut staged = inventory.clone();
            for assignment in batch {
                Self::push_zone(&mut staged, assignment)?;
            }
            *inventory = staged;
        }
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::zone::STATUS_PENDING_INSTALL;

    fn record(kind: ZoneKind, n: u32, ip: &str, status: i32) -> ZoneRecord {
        ZoneRecord {
            channel: "c1".to_string(),
            kind,
            zone_number: n,
            dir_name: kind.dir_name(n),
            host: Host::new(ip, None),
            http_port: None,
            status,
        }
    }

    fn assignment(n: u32, ip: &str) -> ZoneAssignment {
        ZoneAssignment {
            channel: "c1".to_string(),
            zone_kind: ZoneKind::Game,
            zone_number: n,
            host: Host::new(ip, None),
            db_host: "10.0.0.50".to_string(),
            db_name: format!("c1_sh_{}", n),
            http_port: None,
            dir_name: format!("sh_{}", n),
            status: STATUS_PENDING_INSTALL,
        }
    }

    fn inventory() -> Inventory {
        let mut channels = BTreeMap::new();
        channels.insert(
            "c1".to_string(),
            ChannelEntry {
                external: true,
                initial_id: 100,
                db_host: Some("10.0.0.50".to_string()),
                http_ports: [(ZoneKind::Central, 8100), (ZoneKind::Play, 8300)]
                    .into_iter()
                    .collect(),
            },
        );
        Inventory {
            channels,
            hosts: vec![
                HostEntry {
                    channel: "c1".to_string(),
                    internal_ip: "10.0.0.1".to_string(),
                    external_ip: Some("203.0.113.1".to_string()),
                    kinds: vec![ZoneKind::Game],
                },
                HostEntry {
                    channel: "c1".to_string(),
                    internal_ip: "10.0.0.9".to_string(),
                    external_ip: None,
                    kinds: vec![ZoneKind::Central, ZoneKind::Global],
                },
            ],
            zones: vec![
                record(ZoneKind::Game, 1, "10.0.0.1", 0),
                record(ZoneKind::Game, 2, "10.0.0.2", 0),
                record(ZoneKind::Game, 3, "10.0.0.1", STATUS_EXCLUDED_FROM_MAX),
            ],
            ..Inventory::default()
        }
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = InventoryStore::new(inventory());
        assert!(store.network_switch("c1").await.unwrap());
        assert!(!store.network_switch("nope").await.unwrap());
        assert_eq!(store.channel_initial_id("c1").await.unwrap(), 100);
        assert!(matches!(
            store.channel_initial_id("nope").await,
            Err(Error::Lookup(_))
        ));
        assert_eq!(
            store.external_address("10.0.0.1").await.unwrap().as_deref(),
            Some("203.0.113.1")
        );
        assert_eq!(
            store.http_port_base("c1", ZoneKind::Play).await.unwrap(),
            Some(8300)
        );
        assert_eq!(store.http_port_base("c1", ZoneKind::Global).await.unwrap(), None);

        let central = store.hosts_for_kind("c1", ZoneKind::Central).await.unwrap();
        assert_eq!(central, vec![Host::new("10.0.0.9", None)]);
        assert_eq!(store.hosts_for_kind("c1", ZoneKind::Game).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_zone_skips_excluded_status() {
        let store = InventoryStore::new(inventory());
        assert_eq!(store.max_zone("c1", ZoneKind::Game).await.unwrap(), Some(2));
        assert_eq!(store.max_zone("c1", ZoneKind::Play).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_previous_zone_host_default_method() {
        let store = InventoryStore::new(inventory());
        let host = store
            .previous_zone_host("c1", ZoneKind::Game, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host.internal_ip, "10.0.0.2");
        assert!(store
            .previous_zone_host("c1", ZoneKind::Game, 40)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_write_is_all_or_nothing() {
        let store = InventoryStore::new(inventory());
        let batch = vec![assignment(4, "10.0.0.1"), assignment(2, "10.0.0.2")];
        assert!(store.write_zone_assignments(&batch).await.is_err());
        assert_eq!(store.list_zones().await.unwrap().len(), 3);

        store
            .write_zone_assignments(&[assignment(4, "10.0.0.1")])
            .await
            .unwrap();
        assert_eq!(store.max_zone("c1", ZoneKind::Game).await.unwrap(), Some(4));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_file_roundtrip_flushes_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, serde_json::to_string(&inventory()).unwrap()).unwrap();

        let store = InventoryStore::open(&path).unwrap();
        let mut manifest = ZoneManifest::new();
        manifest.insert("c1", "Game", 1);
        store.write_active_manifest(&manifest).await.unwrap();

        let reopened = InventoryStore::open(&path).unwrap();
        assert_eq!(reopened.active_manifest().await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_insert_zone_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, serde_json::to_string(&inventory()).unwrap()).unwrap();

        let store = InventoryStore::open(&path).unwrap();
        store.insert_zone(&assignment(4, "10.0.0.1")).await.unwrap();
        assert!(matches!(
            store.insert_zone(&assignment(4, "10.0.0.2")).await,
            Err(Error::Store(_))
        ));

        let reopened = InventoryStore::open(&path).unwrap();
        assert_eq!(reopened.max_zone("c1", ZoneKind::Game).await.unwrap(), Some(4));
        assert!(!dir.path().join(".inventory.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_concurrent_writes_leave_latest_state_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, serde_json::to_string(&inventory()).unwrap()).unwrap();
        let store = std::sync::Arc::new(InventoryStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for n in 1..=16u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut manifest = ZoneManifest::new();
                manifest.insert("c1", "Game", n);
                store.write_active_manifest(&manifest).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk = InventoryStore::open(&path).unwrap().snapshot().unwrap();
        assert_eq!(on_disk, store.snapshot().unwrap());
        assert!(!dir.path().join(".inventory.json.tmp").exists());
    }

    #[test]
    fn test_inventory_json_shape() {
        let inventory: Inventory = serde_json::from_str(
            r#"{
                "channels": {"c1": {"initial_id": 7, "http_ports": {"Central": 8100}}},
                "hosts": [{"channel": "c1", "internal_ip": "10.0.0.1", "kinds": ["Game"]}],
                "reload_endpoints": {"game": "/reload?zones=", "status": "/status"},
                "active": {"c1": {"Game": [1]}}
            }"#,
        )
        .unwrap();
        assert_eq!(inventory.channels["c1"].initial_id, 7);
        assert!(!inventory.channels["c1"].external);
        assert_eq!(inventory.channels["c1"].http_ports[&ZoneKind::Central], 8100);
        assert_eq!(inventory.reload_endpoints.other, "");
        assert_eq!(inventory.active.zone_count(), 1);
    }
}
