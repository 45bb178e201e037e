//! Data model shared by the planner, backends, placement engine and stream.

pub mod event;
pub mod task;
pub mod zone;

pub use event::{EventStatus, ProgressEvent};
pub use task::{sync_task_id, zone_task_id, Task, TaskKind};
pub use zone::{Host, ZoneAssignment, ZoneKind, ZoneManifest, ZoneRecord};
