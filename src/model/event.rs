//! Progress events and their text framing.
//!
//! Each event is framed as `data: <json>\n\n`. The JSON uses `", "` and
//! `": "` separators, which is what existing stream consumers parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

/// Lifecycle status carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Running,
    Success,
    Failed,
    Error,
    Info,
    Warning,
    Statistics,
    Heartbeat,
    Completed,
}

impl EventStatus {
    /// Whether this status ends a task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Success | EventStatus::Failed | EventStatus::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: EventStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProgressEvent {
    pub fn new(status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            status,
            message: message.into(),
            data: None,
        }
    }

    pub fn for_task(task_id: &str, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            ..Self::new(status, message)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Error, message)
    }

    pub fn heartbeat(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Heartbeat, message)
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::new(EventStatus::Completed, message)
    }

    /// Render as a `data: <json>\n\n` frame.
    pub fn to_frame(&self) -> String {
        frame(self)
    }
}

/// Frame any serializable payload the way events are framed.
pub fn frame<T: Serialize>(value: &T) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    match value.serialize(&mut ser) {
        Ok(()) => format!("data: {}\n\n", String::from_utf8_lossy(&buf)),
        Err(e) => format!(
            "data: {{\"status\": \"error\", \"message\": \"event encoding failed: {}\"}}\n\n",
            e
        ),
    }
}

/// Compact JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
