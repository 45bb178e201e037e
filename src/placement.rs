//! Placement of new zones onto hosts.
//!
//! Game zones follow an adjacency anti-affinity rule: zone `n` never lands on
//! the host of zone `n - 1`. Global and Central are singletons per channel and
//! Play is capped at two.
//!
//! Write boundaries differ by kind. Game assignments are persisted in one
//! batch once every zone has a host. Other kinds insert their row as soon as
//! it is decided, so a failure on a later zone leaves earlier rows in place.
//! Concurrent placements for the same channel and kind are not serialized.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::zone::STATUS_PENDING_INSTALL;
use crate::model::{Host, ZoneAssignment, ZoneKind, ZoneManifest};
use crate::store::DataAccess;
use crate::{olog, olog_debug, olog_error};

/// Scans over the candidate pool before a Game zone is declared unplaceable.
pub const MAX_PASSES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub channel: String,
    pub kind: ZoneKind,
    pub count: u32,
    /// Highest existing zone number; looked up when absent.
    pub max_zone: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStatus {
    Success,
    Error,
}

/// User-facing result of a placement call. Placement never returns `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementOutcome {
    pub status: PlacementStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<ZoneAssignment>,
}

impl PlacementOutcome {
    pub fn is_success(&self) -> bool {
        self.status == PlacementStatus::Success
    }
}

pub struct PlacementEngine {
    store: Arc<dyn DataAccess>,
}

impl PlacementEngine {
    pub fn new(store: Arc<dyn DataAccess>) -> Self {
        Self { store }
    }

    pub async fn place(&self, request: &PlacementRequest) -> PlacementOutcome {
        olog!(
            "placement start: channel={} kind={} count={} max_zone={:?}",
            request.channel,
            request.kind,
            request.count,
            request.max_zone
        );
        match self.try_place(request).await {
            Ok(assignments) => {
                let numbers: Vec<String> = assignments
                    .iter()
                    .map(|a| a.zone_number.to_string())
                    .collect();
                let message = format!(
                    "channel ({}) kind ({}): placed {} zone(s): {}",
                    request.channel,
                    request.kind,
                    assignments.len(),
                    numbers.join(",")
                );
                olog!("{}", message);
                PlacementOutcome {
                    status: PlacementStatus::Success,
                    message,
                    assignments,
                }
            }
            Err(e) => {
                olog_error!("placement failed: {}", e);
                PlacementOutcome {
                    status: PlacementStatus::Error,
                    message: e.to_string(),
                    assignments: Vec::new(),
                }
            }
        }
    }

    async fn try_place(&self, request: &PlacementRequest) -> Result<Vec<ZoneAssignment>> {
        let channel = request.channel.trim();
        if channel.is_empty() {
            return Err(Error::Validation("channel is required".to_string()));
        }
        if request.count == 0 {
            return Err(Error::Validation(
                "zone count must be a positive integer".to_string(),
            ));
        }

        let kind = request.kind;
        let max_zone = match request.max_zone {
            Some(max) => max,
            None => self.store.max_zone(channel, kind).await?.unwrap_or(0),
        };
        let last = max_zone
            .checked_add(request.count)
            .ok_or_else(|| Error::Validation("zone number out of range".to_string()))?;
        if let Some(cap) = kind.capacity() {
            if request.count > cap || last > cap {
                return Err(Error::Validation(format!(
                    "{} allows at most {} zone(s) per channel ({} exist)",
                    kind, cap, max_zone
                )));
            }
        }

        let db_host = self
            .store
            .db_host(channel)
            .await?
            .ok_or_else(|| Error::Placement(format!("channel ({}) has no database host", channel)))?;
        let numbers: Vec<u32> = (max_zone + 1..=last).collect();

        let assignments = if kind == ZoneKind::Game {
            self.place_game(channel, &db_host, &numbers).await?
        } else {
            self.place_single_host(channel, kind, &db_host, &numbers)
                .await?
        };

        let mut manifest = ZoneManifest::new();
        for n in &numbers {
            manifest.insert(channel, kind.as_str(), *n);
        }
        self.store.write_active_manifest(&manifest).await?;
        Ok(assignments)
    }

    async fn place_game(
        &self,
        channel: &str,
        db_host: &str,
        numbers: &[u32],
    ) -> Result<Vec<ZoneAssignment>> {
        let mut pool = self.store.hosts_for_kind(channel, ZoneKind::Game).await?;
        if pool.is_empty() {
            return Err(Error::Placement(format!(
                "channel ({}) has no hosts for kind (Game)",
                channel
            )));
        }

        let mut placed: Vec<ZoneAssignment> = Vec::with_capacity(numbers.len());
        for &n in numbers {
            if pool.is_empty() {
                olog_debug!("Game host pool exhausted, refilling for zone {}", n);
                pool = self.store.hosts_for_kind(channel, ZoneKind::Game).await?;
            }
            let previous = self.previous_host(channel, n, &placed).await?;

            let mut chosen = None;
            for pass in 1..=MAX_PASSES {
                chosen = pool.iter().position(|candidate| match &previous {
                    Some(prev) => prev.internal_ip != candidate.internal_ip,
                    None => true,
                });
                if chosen.is_some() {
                    break;
                }
                olog_debug!("zone {}: pass {} found no eligible host", n, pass);
            }
            let Some(index) = chosen else {
                return Err(Error::Placement(format!(
                    "no eligible host for zone {} after {} passes",
                    n, MAX_PASSES
                )));
            };

            let host = pool.remove(index);
            olog_debug!("zone {} -> {}", n, host.internal_ip);
            placed.push(self.assignment(channel, ZoneKind::Game, n, host, db_host).await?);
        }

        self.store.write_zone_assignments(&placed).await?;
        Ok(placed)
    }

    /// Host of zone `n - 1`: this session's decision first, then the store.
    async fn previous_host(
        &self,
        channel: &str,
        n: u32,
        placed: &[ZoneAssignment],
    ) -> Result<Option<Host>> {
        let Some(prev) = n.checked_sub(1) else {
            return Ok(None);
        };
        if let Some(a) = placed.iter().find(|a| a.zone_number == prev) {
            return Ok(Some(a.host.clone()));
        }
        self.store
            .previous_zone_host(channel, ZoneKind::Game, prev)
            .await
    }

    async fn place_single_host(
        &self,
        channel: &str,
        kind: ZoneKind,
        db_host: &str,
        numbers: &[u32],
    ) -> Result<Vec<ZoneAssignment>> {
        let mut placed = Vec::with_capacity(numbers.len());
        for &n in numbers {
            let mut hosts = self.store.hosts_for_kind(channel, kind).await?;
            let host = match hosts.len() {
                0 => {
                    return Err(Error::Placement(format!(
                        "channel ({}) has no hosts for kind ({})",
                        channel, kind
                    )))
                }
                1 => hosts.remove(0),
                _ => {
                    return Err(Error::Placement(format!(
                        "channel ({}) has too many hosts for kind ({})",
                        channel, kind
                    )))
                }
            };
            let assignment = self.assignment(channel, kind, n, host, db_host).await?;
            // Inserted immediately, outside any batch.
            self.store.insert_zone(&assignment).await?;
            olog!("channel ({}) kind ({}): inserted zone {}", channel, kind, n);
            placed.push(assignment);
        }
        Ok(placed)
    }

    async fn assignment(
        &self,
        channel: &str,
        kind: ZoneKind,
        n: u32,
        host: Host,
        db_host: &str,
    ) -> Result<ZoneAssignment> {
        let http_port = match kind {
            ZoneKind::Game => None,
            ZoneKind::Central | ZoneKind::Global | ZoneKind::Play => {
                let base = self
                    .store
                    .http_port_base(channel, kind)
                    .await?
                    .ok_or_else(|| {
                        Error::Lookup(format!(
                            "channel ({}) has no http port for kind ({})",
                            channel, kind
                        ))
                    })?;
                let port = if kind == ZoneKind::Play {
                    u16::try_from(u32::from(base) + n).map_err(|_| {
                        Error::Validation(format!("http port out of range for zone {}", n))
                    })?
                } else {
                    base
                };
                Some(port)
            }
        };
        let dir_name = kind.dir_name(n);
        Ok(ZoneAssignment {
            channel: channel.to_string(),
            zone_kind: kind,
            zone_number: n,
            host,
            db_host: db_host.to_string(),
            db_name: format!("{}_{}", channel, dir_name),
            http_port,
            dir_name,
            status: STATUS_PENDING_INSTALL,
        })
    }
}
