//! Operation vocabulary and dispatch families.
//!
//! Codes are parsed once at the boundary into [`OperationCode`]; everything
//! downstream matches on the enum instead of comparing strings.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ZoneKind;

/// Phase order for `stop`.
pub const STOP_ORDER: [ZoneKind; 4] = [
    ZoneKind::Central,
    ZoneKind::Play,
    ZoneKind::Global,
    ZoneKind::Game,
];

/// Phase order for `start`.
pub const START_ORDER: [ZoneKind; 4] = [
    ZoneKind::Central,
    ZoneKind::Game,
    ZoneKind::Play,
    ZoneKind::Global,
];

/// Legacy suffix still accepted on operation codes (`status_game`).
const LEGACY_SUFFIX: &str = "_game";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationCode {
    Status,
    Stop,
    Start,
    Update,
    Battle,
    Reload,
    Rsync,
    Deploy,
}

/// How an operation's tasks are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Phases by zone kind, each awaited before the next.
    Ordered(&'static [ZoneKind]),
    /// Artifact staging first, then one sync task per host.
    Sync,
    /// Unordered base tasks followed by HTTP triggers.
    Reload,
    /// Unordered, no post-processing.
    Default,
}

impl OperationCode {
    pub const ALL: [OperationCode; 8] = [
        OperationCode::Status,
        OperationCode::Stop,
        OperationCode::Start,
        OperationCode::Update,
        OperationCode::Battle,
        OperationCode::Reload,
        OperationCode::Rsync,
        OperationCode::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCode::Status => "status",
            OperationCode::Stop => "stop",
            OperationCode::Start => "start",
            OperationCode::Update => "update",
            OperationCode::Battle => "battle",
            OperationCode::Reload => "reload",
            OperationCode::Rsync => "rsync",
            OperationCode::Deploy => "deploy",
        }
    }

    /// Human-readable label used in task descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            OperationCode::Status => "check server status",
            OperationCode::Stop => "stop server",
            OperationCode::Start => "start server",
            OperationCode::Update => "update",
            OperationCode::Battle => "update battle replays",
            OperationCode::Reload => "hot reload",
            OperationCode::Rsync => "sync code",
            OperationCode::Deploy => "deploy",
        }
    }

    pub fn family(&self) -> Family {
        match self {
            OperationCode::Stop => Family::Ordered(&STOP_ORDER),
            OperationCode::Start => Family::Ordered(&START_ORDER),
            OperationCode::Rsync => Family::Sync,
            OperationCode::Reload => Family::Reload,
            OperationCode::Status
            | OperationCode::Update
            | OperationCode::Battle
            | OperationCode::Deploy => Family::Default,
        }
    }

    /// Key looked up in the configured script table.
    pub fn script_key(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for OperationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = trimmed.strip_suffix(LEGACY_SUFFIX).unwrap_or(trimmed);
        if code == "initial" {
            return Ok(OperationCode::Deploy);
        }
        OperationCode::ALL
            .into_iter()
            .find(|op| op.as_str() == code)
            .ok_or_else(|| Error::UnknownOperation(s.to_string()))
    }
}

/// Which release package a sync session pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Update,
    Reload,
    Battle,
}

impl SyncMode {
    pub const ALL: [SyncMode; 3] = [SyncMode::Update, SyncMode::Reload, SyncMode::Battle];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Update => "update",
            SyncMode::Reload => "reload",
            SyncMode::Battle => "battle",
        }
    }

    /// Package path inside a channel's artifact directory.
    pub fn package_path(&self, channel_dir: &Path) -> PathBuf {
        match self {
            SyncMode::Update => channel_dir.join("codeUpdate").join("bin.tar.gz"),
            SyncMode::Reload => channel_dir.join("hotUpdate").join("newfile.zip"),
            SyncMode::Battle => channel_dir.join("battleReportUpdate").join("tryOut.tar"),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SyncMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| Error::Validation(format!("unknown sync mode: {}", s)))
    }
}

/// One request for an operation session. The code stays raw so that an
/// unknown code surfaces on the session's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub code: String,
    #[serde(default)]
    pub sync_mode: Option<SyncMode>,
}

impl OperationRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            sync_mode: None,
        }
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = Some(mode);
        self
    }
}
