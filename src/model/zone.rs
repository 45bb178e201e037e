//! Zones, hosts and the active-zone manifest.
//!
//! A zone is one deployed game-server instance identified by
//! channel + kind + number. Hosts are the physical machines zones run on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Status written for freshly placed zones that still need installing.
pub const STATUS_PENDING_INSTALL: i32 = 3;

/// Zones in these states can be selected for operations.
pub const SELECTABLE_STATUSES: [i32; 2] = [0, 1];

/// Zones in this state are ignored when looking up the highest zone number.
pub const STATUS_EXCLUDED_FROM_MAX: i32 = 1;

/// The role of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZoneKind {
    Game,
    Central,
    Global,
    Play,
}

impl ZoneKind {
    pub const ALL: [ZoneKind; 4] = [
        ZoneKind::Game,
        ZoneKind::Central,
        ZoneKind::Global,
        ZoneKind::Play,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Game => "Game",
            ZoneKind::Central => "Central",
            ZoneKind::Global => "Global",
            ZoneKind::Play => "Play",
        }
    }

    /// Maximum number of zones of this kind per channel, if capped.
    pub fn capacity(&self) -> Option<u32> {
        match self {
            ZoneKind::Global | ZoneKind::Central => Some(1),
            ZoneKind::Play => Some(2),
            ZoneKind::Game => None,
        }
    }

    /// Working directory name for zone `number` of this kind.
    pub fn dir_name(&self, number: u32) -> String {
        match self {
            ZoneKind::Game => format!("sh_{}", number),
            ZoneKind::Central => "sh_central".to_string(),
            ZoneKind::Global => "sh_global".to_string(),
            ZoneKind::Play => format!("sh_play{}", number),
        }
    }
}

impl std::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ZoneKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ZoneKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown zone kind: {}", s)))
    }
}

/// A physical machine that can run zones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub internal_ip: String,
    #[serde(default)]
    pub external_ip: Option<String>,
}

impl Host {
    pub fn new(internal_ip: impl Into<String>, external_ip: Option<&str>) -> Self {
        Self {
            internal_ip: internal_ip.into(),
            external_ip: external_ip.map(String::from),
        }
    }
}

/// One zone row as known to the data-access collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub channel: String,
    pub kind: ZoneKind,
    pub zone_number: u32,
    pub dir_name: String,
    pub host: Host,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub status: i32,
}

/// Output of the placement engine: one row per allocated zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAssignment {
    pub channel: String,
    pub zone_kind: ZoneKind,
    pub zone_number: u32,
    pub host: Host,
    pub db_host: String,
    pub db_name: String,
    pub http_port: Option<u16>,
    pub dir_name: String,
    pub status: i32,
}

impl ZoneAssignment {
    pub fn to_record(&self) -> ZoneRecord {
        ZoneRecord {
            channel: self.channel.clone(),
            kind: self.zone_kind,
            zone_number: self.zone_number,
            dir_name: self.dir_name.clone(),
            host: self.host.clone(),
            http_port: self.http_port,
            status: self.status,
        }
    }
}

/// Zones currently selected for operation: channel → kind → zone numbers.
///
/// Kinds stay as raw strings so an unknown kind can be reported per zone
/// instead of failing the whole manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneManifest(pub BTreeMap<String, BTreeMap<String, Vec<u32>>>);

impl ZoneManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: &str, kind: &str, zone: u32) {
        let zones = self
            .0
            .entry(channel.to_string())
            .or_default()
            .entry(kind.to_string())
            .or_default();
        if !zones.contains(&zone) {
            zones.push(zone);
            zones.sort_unstable();
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn kinds(&self, channel: &str) -> impl Iterator<Item = (&str, &[u32])> {
        self.0
            .get(channel)
            .into_iter()
            .flat_map(|kinds| kinds.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
    }

    pub fn zones(&self, channel: &str, kind: ZoneKind) -> &[u32] {
        self.0
            .get(channel)
            .and_then(|kinds| kinds.get(kind.as_str()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_kind(&self, channel: &str, kind: ZoneKind) -> bool {
        self.0
            .get(channel)
            .map(|kinds| kinds.contains_key(kind.as_str()))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|kinds| kinds.values().all(Vec::is_empty))
    }

    pub fn zone_count(&self) -> usize {
        self.0
            .values()
            .flat_map(|kinds| kinds.values())
            .map(Vec::len)
            .sum()
    }
}
