//! Task records produced by the planner and consumed by the worker pool.
//!
//! Task ids are derived from what the task operates on, so resubmitting the
//! same request yields the same names. The id doubles as the per-task key in
//! the stats aggregator.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::zone::ZoneKind;
use crate::util::shell_join;

/// How a task is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Operation script run locally with streamed output.
    Script,
    /// Plain HTTP GET issued during reload post-processing.
    Http,
    /// Artifact sync script targeting one host.
    Rsync,
}

/// Id of a zone-scoped task: `{channel}_{kind}_{zone}`.
pub fn zone_task_id(channel: &str, kind: ZoneKind, zone: u32) -> String {
    format!("{}_{}_{}", channel, kind, zone)
}

/// Id of an artifact sync task: `RSYNC_{channel}_{host}`.
pub fn sync_task_id(channel: &str, host: &str) -> String {
    format!("RSYNC_{}_{}", channel, host)
}

/// One independent unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// Zone kind the task belongs to, used by ordered operations.
    pub phase_group: Option<ZoneKind>,
    /// Script key looked up in the configured script table.
    pub script: String,
    pub parameters: Vec<String>,
    pub description: String,
}

impl Task {
    /// Task operating on a single zone.
    pub fn zone(
        channel: &str,
        kind: ZoneKind,
        zone: u32,
        script: &str,
        parameters: Vec<String>,
        description: String,
    ) -> Self {
        Self {
            id: zone_task_id(channel, kind, zone),
            kind: TaskKind::Script,
            phase_group: Some(kind),
            script: script.to_string(),
            parameters,
            description,
        }
    }

    /// Task pushing a release package to one host.
    pub fn sync(channel: &str, host: &str, package: &str) -> Self {
        Self {
            id: sync_task_id(channel, host),
            kind: TaskKind::Rsync,
            phase_group: None,
            script: "rsync".to_string(),
            parameters: vec![
                channel.to_string(),
                host.to_string(),
                "rsync".to_string(),
                package.to_string(),
            ],
            description: format!("host ({}) artifact sync", host),
        }
    }

    /// HTTP call; `parameters[0]` holds the URL and `description` the action.
    pub fn http(url: &str, action: &str) -> Self {
        Self {
            id: url.to_string(),
            kind: TaskKind::Http,
            phase_group: None,
            script: String::new(),
            parameters: vec![url.to_string()],
            description: action.to_string(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self.kind {
            TaskKind::Http => self.parameters.first().map(String::as_str),
            _ => None,
        }
    }

    /// Shell command line running `script` with this task's parameters.
    pub fn command_line(&self, script: &Path) -> String {
        let script = script.display().to_string();
        shell_join(
            ["bash", script.as_str()]
                .into_iter()
                .chain(self.parameters.iter().map(String::as_str)),
        )
    }
}

/// Description attached to the `start` event of a zone task.
pub fn describe_zone_task(
    channel: &str,
    kind: ZoneKind,
    zone: u32,
    address: &str,
    action: &str,
) -> String {
    format!(
        "operation: address={}, channel={}, kind={}, zone={}, action={}",
        address, channel, kind, zone, action
    )
}
