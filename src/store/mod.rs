//! Data-access seam for channel, host and zone metadata.
//!
//! The orchestrator and the placement engine only read and write through
//! [`DataAccess`]. [`InventoryStore`] is the bundled implementation backed by
//! a JSON inventory file.

mod inventory;

pub use inventory::{ChannelEntry, HostEntry, Inventory, InventoryStore, ReloadEndpoints};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Host, ZoneAssignment, ZoneKind, ZoneManifest, ZoneRecord};

/// Which reload path to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadEndpoint {
    /// Game-zone reload trigger, suffixed with a compact zone list.
    Game,
    /// Reload status check on the central host.
    Status,
    /// Reload trigger for non-Game zones.
    Other,
}

/// Reads channel/host/zone metadata and receives placement writes.
///
/// All methods are `Send + Sync` so one store can be shared by every
/// session running in the process.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Zones currently selected for operation.
    async fn active_manifest(&self) -> Result<ZoneManifest>;

    /// Replace the active manifest.
    async fn write_active_manifest(&self, manifest: &ZoneManifest) -> Result<()>;

    async fn zone_record(
        &self,
        channel: &str,
        kind: ZoneKind,
        zone: u32,
    ) -> Result<Option<ZoneRecord>>;

    /// Whether zones of `channel` are reached via their external address.
    async fn network_switch(&self, channel: &str) -> Result<bool>;

    /// External address registered for a host's internal address.
    async fn external_address(&self, internal: &str) -> Result<Option<String>>;

    async fn reload_endpoint(&self, endpoint: ReloadEndpoint) -> Result<String>;

    /// Offset added to Game zone numbers to obtain global zone ids.
    async fn channel_initial_id(&self, channel: &str) -> Result<u32>;

    /// Hosts designated for zones of `kind` in `channel`.
    async fn hosts_for_kind(&self, channel: &str, kind: ZoneKind) -> Result<Vec<Host>>;

    /// Database host assigned to `channel`.
    async fn db_host(&self, channel: &str) -> Result<Option<String>>;

    /// Configured HTTP port for Central/Global zones, or the base port for Play zones.
    async fn http_port_base(&self, channel: &str, kind: ZoneKind) -> Result<Option<u16>>;

    /// Highest zone number of `kind` in `channel`, ignoring excluded statuses.
    async fn max_zone(&self, channel: &str, kind: ZoneKind) -> Result<Option<u32>>;

    async fn list_zones(&self) -> Result<Vec<ZoneRecord>>;

    /// Insert one zone row immediately.
    async fn insert_zone(&self, assignment: &ZoneAssignment) -> Result<()>;

    /// Persist a whole placement batch at once.
    async fn write_zone_assignments(&self, batch: &[ZoneAssignment]) -> Result<()>;

    /// Host of zone `zone`, if that zone exists.
    async fn previous_zone_host(
        &self,
        channel: &str,
        kind: ZoneKind,
        zone: u32,
    ) -> Result<Option<Host>> {
        Ok(self
            .zone_record(channel, kind, zone)
            .await?
            .map(|record| record.host))
    }
}
