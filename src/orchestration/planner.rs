//! Expansion of an operation request into tasks.
//!
//! The planner walks the active manifest channel by channel and kind by
//! kind, resolves each zone's address and working directory through the
//! data-access seam, and builds one task per zone. Zones whose metadata
//! cannot be resolved are reported on the stream and skipped.

use std::collections::BTreeSet;

use super::operation::{OperationCode, SyncMode};
use super::staging::ArtifactLayout;
use crate::error::{Error, Result};
use crate::model::task::describe_zone_task;
use crate::model::{ProgressEvent, Task, ZoneKind, ZoneManifest, ZoneRecord};
use crate::store::{DataAccess, ReloadEndpoint};
use crate::stream::EventSender;
use crate::util::compact_ranges;
use crate::{olog_debug, olog_error, olog_warn};

/// Zone number of the channel's central zone.
const CENTRAL_ZONE: u32 = 1;

/// Parameter passed to the first deploy task only.
pub const FIRST_DEPLOY_FLAG: &str = "no_lock";
pub const DEPLOY_LOCK_FLAG: &str = "lock";

pub const RELOAD_TRIGGER_ACTION: &str = "reload trigger";
pub const RELOAD_STATUS_ACTION: &str = "reload status check";

/// Everything a session dispatches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub reload_triggers: BTreeSet<String>,
    pub reload_status: BTreeSet<String>,
    /// Distinct `(channel, address)` pairs touched by the plan.
    pub sync_targets: BTreeSet<(String, String)>,
}

impl Plan {
    /// One sync task per distinct host, pushing the package for `mode`.
    pub fn sync_tasks(&self, layout: &ArtifactLayout, mode: SyncMode) -> Vec<Task> {
        self.sync_targets
            .iter()
            .map(|(channel, address)| {
                let package = layout.package(channel, mode);
                Task::sync(channel, address, &package.display().to_string())
            })
            .collect()
    }

    /// HTTP tasks for the reload trigger URLs, in URL order.
    pub fn trigger_tasks(&self) -> Vec<Task> {
        http_tasks(&self.reload_triggers, RELOAD_TRIGGER_ACTION)
    }

    /// HTTP tasks for the reload status URLs, in URL order.
    pub fn status_tasks(&self) -> Vec<Task> {
        http_tasks(&self.reload_status, RELOAD_STATUS_ACTION)
    }

    /// Tasks grouped by phase, in `order`. Kinds without tasks are omitted.
    pub fn phases(&self, order: &[ZoneKind]) -> Vec<(ZoneKind, Vec<Task>)> {
        order
            .iter()
            .filter_map(|kind| {
                let tasks: Vec<Task> = self
                    .tasks
                    .iter()
                    .filter(|t| t.phase_group == Some(*kind))
                    .cloned()
                    .collect();
                (!tasks.is_empty()).then_some((*kind, tasks))
            })
            .collect()
    }
}

fn http_tasks(urls: &BTreeSet<String>, action: &str) -> Vec<Task> {
    urls.iter().map(|url| Task::http(url, action)).collect()
}

pub struct Planner<'a> {
    store: &'a dyn DataAccess,
    events: &'a EventSender,
    operation: OperationCode,
    sync_mode: Option<SyncMode>,
    deploy_lock_taken: bool,
}

impl<'a> Planner<'a> {
    pub fn new(
        store: &'a dyn DataAccess,
        events: &'a EventSender,
        operation: OperationCode,
        sync_mode: Option<SyncMode>,
    ) -> Self {
        Self {
            store,
            events,
            operation,
            sync_mode,
            deploy_lock_taken: false,
        }
    }

    fn reload_mode(&self) -> bool {
        self.operation == OperationCode::Reload || self.sync_mode == Some(SyncMode::Reload)
    }

    fn battle_mode(&self) -> bool {
        self.operation == OperationCode::Battle || self.sync_mode == Some(SyncMode::Battle)
    }

    pub async fn plan(mut self, manifest: &ZoneManifest) -> Plan {
        let mut plan = Plan::default();
        for channel in manifest.channels() {
            let external = match self.store.network_switch(channel).await {
                Ok(external) => external,
                Err(e) => {
                    self.error(format!("channel ({}) lookup failed: {}", channel, e));
                    continue;
                }
            };

            for (kind_name, zones) in manifest.kinds(channel) {
                let kind = match kind_name.parse::<ZoneKind>() {
                    Ok(kind) => kind,
                    Err(_) => {
                        self.warn(format!(
                            "unknown zone kind ({}) in channel ({}), skipped",
                            kind_name, channel
                        ));
                        continue;
                    }
                };

                if self.reload_mode() && kind == ZoneKind::Game {
                    if let Err(e) = self
                        .plan_central_reload(&mut plan, manifest, channel, external, zones)
                        .await
                    {
                        self.error(format!(
                            "reload setup failed: channel={}, error={}",
                            channel, e
                        ));
                    }
                } else if self.battle_mode() && kind != ZoneKind::Game {
                    continue;
                }

                for &zone in zones {
                    match self.plan_zone(&mut plan, channel, kind, zone, external).await {
                        Ok(Some(task)) => plan.tasks.push(task),
                        Ok(None) => {}
                        Err(e) => self.error(format!(
                            "zone processing failed: channel={}, kind={}, zone={}, error={}",
                            channel, kind, zone, e
                        )),
                    }
                }
            }
        }
        olog_debug!(
            "planned {} task(s), {} trigger url(s), {} status url(s), {} host(s)",
            plan.tasks.len(),
            plan.reload_triggers.len(),
            plan.reload_status.len(),
            plan.sync_targets.len()
        );
        plan
    }

    /// Resolve the central host of `channel` and collect its reload URLs.
    async fn plan_central_reload(
        &mut self,
        plan: &mut Plan,
        manifest: &ZoneManifest,
        channel: &str,
        external: bool,
        game_zones: &[u32],
    ) -> Result<()> {
        let Some(central) = self
            .store
            .zone_record(channel, ZoneKind::Central, CENTRAL_ZONE)
            .await?
        else {
            self.warn(format!("central zone not found: channel={}", channel));
            return Ok(());
        };
        let Some(address) = self.resolve_address(&central, external).await? else {
            return Ok(());
        };

        if !manifest.contains_kind(channel, ZoneKind::Central) {
            let task = self.zone_task(channel, ZoneKind::Central, CENTRAL_ZONE, &address, &central);
            plan.tasks.push(task);
        }

        let port = central.http_port.ok_or_else(|| {
            Error::Lookup(format!("central zone of channel ({}) has no http port", channel))
        })?;
        let initial_id = self.store.channel_initial_id(channel).await?;
        let game_path = self.store.reload_endpoint(ReloadEndpoint::Game).await?;
        let status_path = self.store.reload_endpoint(ReloadEndpoint::Status).await?;

        plan.reload_triggers.insert(format!(
            "http://{}:{}{}{}",
            address,
            port,
            game_path,
            compact_ranges(game_zones, initial_id)
        ));
        plan.reload_status
            .insert(format!("http://{}:{}{}", address, port, status_path));
        plan.sync_targets.insert((channel.to_string(), address));
        Ok(())
    }

    async fn plan_zone(
        &mut self,
        plan: &mut Plan,
        channel: &str,
        kind: ZoneKind,
        zone: u32,
        external: bool,
    ) -> Result<Option<Task>> {
        let Some(record) = self.store.zone_record(channel, kind, zone).await? else {
            self.warn(format!(
                "zone info not found: channel={}, kind={}, zone={}",
                channel, kind, zone
            ));
            return Ok(None);
        };
        let Some(address) = self.resolve_address(&record, external).await? else {
            return Ok(None);
        };

        if self.operation == OperationCode::Reload && kind != ZoneKind::Game {
            if let Some(port) = record.http_port {
                let path = self.store.reload_endpoint(ReloadEndpoint::Other).await?;
                plan.reload_triggers
                    .insert(format!("http://{}:{}{}", address, port, path));
            }
        }
        plan.sync_targets.insert((channel.to_string(), address.clone()));

        Ok(Some(self.zone_task(channel, kind, zone, &address, &record)))
    }

    /// Address used to reach a zone's host, or `None` after a warning.
    async fn resolve_address(&self, record: &ZoneRecord, external: bool) -> Result<Option<String>> {
        if !external {
            return Ok(Some(record.host.internal_ip.clone()));
        }
        let found = match &record.host.external_ip {
            Some(ip) => Some(ip.clone()),
            None => self.store.external_address(&record.host.internal_ip).await?,
        };
        if found.is_none() {
            self.warn(format!(
                "host info not found: internal address={}",
                record.host.internal_ip
            ));
        }
        Ok(found)
    }

    fn zone_task(
        &mut self,
        channel: &str,
        kind: ZoneKind,
        zone: u32,
        address: &str,
        record: &ZoneRecord,
    ) -> Task {
        let op = self.operation.as_str().to_string();
        let parameters = if self.operation == OperationCode::Deploy {
            let flag = if self.deploy_lock_taken {
                DEPLOY_LOCK_FLAG
            } else {
                self.deploy_lock_taken = true;
                FIRST_DEPLOY_FLAG
            };
            vec![
                channel.to_string(),
                address.to_string(),
                kind.to_string(),
                record.dir_name.clone(),
                zone.to_string(),
                flag.to_string(),
                op,
            ]
        } else {
            vec![
                channel.to_string(),
                address.to_string(),
                record.dir_name.clone(),
                op,
            ]
        };
        Task::zone(
            channel,
            kind,
            zone,
            self.operation.script_key(),
            parameters,
            describe_zone_task(channel, kind, zone, address, self.operation.label()),
        )
    }

    fn warn(&self, message: String) {
        olog_warn!("{}", message);
        self.events.send(ProgressEvent::warning(message));
    }

    fn error(&self, message: String) {
        olog_error!("{}", message);
        self.events.send(ProgressEvent::error(message));
    }
}
