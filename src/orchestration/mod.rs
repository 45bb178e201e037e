//! Operation orchestration.
//!
//! An operation request is parsed into an [`OperationCode`], expanded into
//! tasks by the [`Planner`], and dispatched through a bounded
//! [`WorkerPool`] by the [`Orchestrator`] according to the operation's
//! [`Family`]. Sync sessions stage artifacts first through an
//! [`ArtifactStager`].

mod client;
mod operation;
mod orchestrator;
mod planner;
mod pool;
mod staging;

pub use client::ClientUpdater;
pub use operation::{
    Family, OperationCode, OperationRequest, SyncMode, START_ORDER, STOP_ORDER,
};
pub use orchestrator::{Orchestrator, SessionSettings};
pub use planner::{Plan, Planner, DEPLOY_LOCK_FLAG, FIRST_DEPLOY_FLAG};
pub use pool::WorkerPool;
pub use staging::{parse_revision, ArtifactLayout, ArtifactStager, SvnStager};
