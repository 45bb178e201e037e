//! Streaming script execution.
//!
//! A task script runs as `bash <script> <params...>`. Stdout and stderr are
//! merged line by line and every non-empty line becomes a `running` event
//! tagged with the task id. When the process exits exactly one terminal
//! event is emitted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tokio::process::{Child, Command};

use super::{output_lines, TaskRunner};
use crate::config::{Config, DEFAULT_SCRIPT_KEY};
use crate::model::{EventStatus, ProgressEvent, Task, TaskKind};
use crate::stats::StatsAggregator;
use crate::stream::EventSender;
use crate::{olog, olog_error, olog_trace, olog_warn, Error, Result};

/// A spawned shell command with its merged output lines.
pub struct ScriptProcess {
    child: Child,
    lines: Pin<Box<dyn Stream<Item = String> + Send>>,
}

impl ScriptProcess {
    /// Spawn `command` through `sh -c`; the child is killed when dropped.
    pub fn spawn(command: &str) -> Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Execution("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Execution("stderr not captured".to_string()))?;
        let lines = stream::select(output_lines(stdout), output_lines(stderr)).boxed();
        Ok(Self { child, lines })
    }

    /// Feed every line to `on_line`, then wait for exit.
    ///
    /// Returns the exit code, or -1 when the process was killed by a signal.
    pub async fn drive<F>(&mut self, mut on_line: F) -> Result<i32>
    where
        F: FnMut(String),
    {
        while let Some(line) = self.lines.next().await {
            on_line(line);
        }
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Runs script and rsync tasks by looking their script up in a table.
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor {
    scripts: HashMap<String, PathBuf>,
    timeout: Option<Duration>,
}

impl ScriptExecutor {
    pub fn new(scripts: HashMap<String, PathBuf>, timeout: Option<Duration>) -> Self {
        Self { scripts, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        let scripts = config
            .scripts
            .keys()
            .filter_map(|key| config.script_for(key).map(|path| (key.clone(), path)))
            .collect();
        Self::new(scripts, config.script_timeout())
    }

    fn script_for(&self, key: &str) -> Option<&PathBuf> {
        self.scripts
            .get(key)
            .or_else(|| self.scripts.get(DEFAULT_SCRIPT_KEY))
    }

    /// Run a command, streaming each output line to `on_line`.
    pub async fn run_streaming<F>(&self, command: &str, on_line: F) -> Result<i32>
    where
        F: FnMut(String) + Send,
    {
        let mut process = ScriptProcess::spawn(command)?;
        match self.timeout {
            // Dropping the process on timeout kills the child.
            Some(limit) => tokio::time::timeout(limit, process.drive(on_line))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => process.drive(on_line).await,
        }
    }

    async fn stream_task(&self, task: &Task, events: &EventSender) -> Result<i32> {
        if task.kind == TaskKind::Http {
            return Err(Error::Execution(format!(
                "task {} is an HTTP call, not a script",
                task.id
            )));
        }
        let script = self.script_for(&task.script).ok_or_else(|| {
            Error::Execution(format!("no script configured for '{}'", task.script))
        })?;
        let command = task.command_line(script);
        olog!("[task {}] {}", task.id, command);
        self.run_streaming(&command, |line| {
            olog_trace!("[task {}] {}", task.id, line);
            events.send(ProgressEvent::for_task(&task.id, EventStatus::Running, line));
        })
        .await
    }
}

#[async_trait]
impl TaskRunner for ScriptExecutor {
    async fn run_task(&self, task: &Task, events: &EventSender, stats: &StatsAggregator) {
        stats.record_execution(Some(&task.id), false);
        events.send(ProgressEvent::for_task(
            &task.id,
            EventStatus::Start,
            task.description.clone(),
        ));

        match self.stream_task(task, events).await {
            Ok(0) => {
                olog!("[task {}] finished", task.id);
                events.send(ProgressEvent::for_task(
                    &task.id,
                    EventStatus::Success,
                    "task finished (exit code 0)",
                ));
            }
            Ok(code) => {
                olog_warn!("[task {}] exit code {}", task.id, code);
                stats.record_failure(Some(&task.id), false);
                events.send(ProgressEvent::for_task(
                    &task.id,
                    EventStatus::Failed,
                    format!("task failed (exit code {})", code),
                ));
            }
            Err(e) => {
                olog_error!("[task {}] {}", task.id, e);
                stats.record_failure(Some(&task.id), false);
                events.send(ProgressEvent::for_task(
                    &task.id,
                    EventStatus::Error,
                    format!("execution error: {}", e),
                ));
            }
        }
    }
}
