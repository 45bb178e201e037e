//! Execution backends.
//!
//! - [`BatchExecutor`]: run a shell command, buffer all output, enforce a timeout
//! - [`ScriptExecutor`]: run a task script and stream each output line as an event
//! - [`RemoteExecutor`]: run a command on a remote host over `ssh`
//! - [`HttpTrigger`]: issue reload/status GET calls
//!
//! Every backend reports through the event stream and the stats aggregator
//! and never raises task-level failures to its caller.

mod batch;
mod http;
mod remote;
mod script;

pub use batch::BatchExecutor;
pub use http::HttpTrigger;
pub use remote::{RemoteAuth, RemoteExecutor, RemoteTarget};
pub use script::{ScriptExecutor, ScriptProcess};

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};

use crate::model::Task;
use crate::stats::StatsAggregator;
use crate::stream::EventSender;

/// Why a command did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Exceeded its timeout and was killed.
    Timeout,
    /// Could not be started.
    Launch,
    /// Ran to completion with a non-zero exit code.
    NonZeroExit,
    /// Failed while waiting on the process.
    Io,
}

/// Outcome of one batched command. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn exited(code: Option<i32>, stdout: String, stderr: String) -> Self {
        let success = code == Some(0);
        Self {
            success,
            exit_code: code,
            stdout,
            stderr,
            error: None,
            failure: (!success).then_some(FailureKind::NonZeroExit),
        }
    }

    pub fn failed(kind: FailureKind, error: String, stdout: String, stderr: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout,
            stderr,
            error: Some(error),
            failure: Some(kind),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

/// Seam between the orchestrator's worker pool and whatever runs a task.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run `task` to a terminal state: one `start` event, any number of
    /// `running` events, then exactly one terminal event.
    async fn run_task(&self, task: &Task, events: &EventSender, stats: &StatsAggregator);
}

/// Split a pipe into trimmed, non-empty lines. Invalid UTF-8 is replaced.
pub(crate) fn output_lines<R>(reader: R) -> impl Stream<Item = String> + Send
where
    R: AsyncRead + Send + Unpin,
{
    FramedRead::new(reader, AnyDelimiterCodec::new(b"\n".to_vec(), b"\n".to_vec()))
        .take_while(|chunk| futures::future::ready(chunk.is_ok()))
        .filter_map(|chunk| async move {
            let chunk = chunk.ok()?;
            let line = String::from_utf8_lossy(&chunk).trim().to_string();
            (!line.is_empty()).then_some(line)
        })
}
