//! Active-manifest selection.
//!
//! Picks the zones the next operation session will act on and stores them
//! as the active manifest.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::zone::SELECTABLE_STATUSES;
use crate::model::{ZoneKind, ZoneManifest, ZoneRecord};
use crate::orchestration::SyncMode;
use crate::store::DataAccess;
use crate::util::{parse_zone_spec, ZoneSpec};
use crate::{olog, olog_debug};

/// Zone number that a hot reload never touches.
pub const RESERVED_ZONE: u32 = 9999;

/// Filters for [`select`]. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    pub channels: Vec<String>,
    pub kinds: Vec<ZoneKind>,
    /// Zone spec such as `"1,3,4_5"`.
    pub zones: Option<String>,
    pub mode: Option<SyncMode>,
}

impl SelectionCriteria {
    fn zone_filter(&self) -> Result<Option<ZoneSpec>> {
        let Some(spec) = self.zones.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        let zones = parse_zone_spec(spec);
        if zones.is_empty() {
            return Err(Error::Validation(format!("malformed zone spec: {}", spec)));
        }
        Ok(Some(zones))
    }

    fn matches(&self, record: &ZoneRecord, zones: Option<&ZoneSpec>) -> bool {
        SELECTABLE_STATUSES.contains(&record.status)
            && (self.channels.is_empty() || self.channels.contains(&record.channel))
            && (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && zones.map_or(true, |z| z.contains(record.zone_number))
            && !(self.mode == Some(SyncMode::Reload) && record.zone_number == RESERVED_ZONE)
    }
}

/// Select zones matching `criteria` and write them as the active manifest.
///
/// An empty selection is returned without replacing the stored manifest.
pub async fn select(store: &dyn DataAccess, criteria: &SelectionCriteria) -> Result<ZoneManifest> {
    let zones = criteria.zone_filter()?;
    let mut manifest = ZoneManifest::new();
    for record in store.list_zones().await? {
        if criteria.matches(&record, zones.as_ref()) {
            manifest.insert(&record.channel, record.kind.as_str(), record.zone_number);
        }
    }

    if manifest.is_empty() {
        olog_debug!("selection matched no zones: {:?}", criteria);
        return Ok(manifest);
    }
    store.write_active_manifest(&manifest).await?;
    olog!("active manifest replaced: {} zone(s)", manifest.zone_count());
    Ok(manifest)
}
