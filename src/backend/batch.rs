//! Buffered command execution with a hard timeout.
//!
//! Output is read by background tasks into shared buffers while the process
//! runs, so a timed-out command still reports whatever it printed before it
//! was killed.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{ExecutionResult, FailureKind};
use crate::model::ProgressEvent;
use crate::stats::StatsAggregator;
use crate::stream::EventSender;
use crate::{olog, olog_debug, olog_warn};

/// Time granted to the pipe readers after a timed-out child is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Runs one shell command at a time and returns its full output.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    default_timeout: Option<Duration>,
    events: Option<EventSender>,
    stats: Option<Arc<StatsAggregator>>,
    display: bool,
}

impl BatchExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout: Some(default_timeout),
            ..Self::default()
        }
    }

    /// Report stderr lines (and stdout lines when `display` is set) as events.
    pub fn with_events(mut self, events: EventSender, display: bool) -> Self {
        self.events = Some(events);
        self.display = display;
        self
    }

    /// Count every command in the shared command counters.
    pub fn with_stats(mut self, stats: Arc<StatsAggregator>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Run `command` through `sh -c`. `timeout` overrides the default.
    pub async fn run(&self, command: &str, timeout: Option<Duration>) -> ExecutionResult {
        self.run_with_env(command, &[], timeout).await
    }

    /// Like [`run`](Self::run), with extra environment variables for the
    /// child. Values are never logged, so secrets belong here rather than in
    /// `command`.
    pub async fn run_with_env(
        &self,
        command: &str,
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let timeout = timeout.or(self.default_timeout);
        olog!(
            "[command start] {} | timeout: {}",
            command,
            timeout
                .map(|t| format!("{}s", t.as_secs()))
                .unwrap_or_else(|| "none".to_string())
        );
        if let Some(stats) = &self.stats {
            stats.record_execution(None, true);
        }

        let result = execute(command, env, timeout).await;

        if let Some(stats) = &self.stats {
            if !result.success {
                stats.record_failure(None, true);
            }
        }
        self.report(&result);
        result
    }

    fn report(&self, result: &ExecutionResult) {
        match &result.error {
            Some(err) => olog_warn!("[command failed] {}", err),
            None => olog!("[command finish] exit code: {:?}", result.exit_code),
        }
        let Some(events) = &self.events else {
            return;
        };
        if self.display || result.timed_out() {
            for line in non_empty_lines(&result.stdout) {
                events.send(ProgressEvent::info(line));
            }
        }
        for line in non_empty_lines(&result.stderr) {
            events.send(ProgressEvent::error(line));
        }
        if let Some(err) = &result.error {
            events.send(ProgressEvent::error(err.clone()));
        }
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

async fn execute(
    command: &str,
    env: &[(&str, &str)],
    timeout: Option<Duration>,
) -> ExecutionResult {
    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let msg = if e.kind() == std::io::ErrorKind::NotFound {
                "command not found: sh".to_string()
            } else {
                format!("failed to launch command: {}", e)
            };
            return ExecutionResult::failed(FailureKind::Launch, msg, String::new(), String::new());
        }
    };

    let stdout_buf = SharedBuf::default();
    let stderr_buf = SharedBuf::default();
    let mut readers = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        readers.push(spawn_reader(pipe, Arc::clone(&stdout_buf)));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(spawn_reader(pipe, Arc::clone(&stderr_buf)));
    }

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    match waited {
        Some(Ok(status)) => {
            for reader in readers {
                let _ = reader.await;
            }
            ExecutionResult::exited(status.code(), take(&stdout_buf), take(&stderr_buf))
        }
        Some(Err(e)) => {
            abort_all(readers);
            ExecutionResult::failed(
                FailureKind::Io,
                format!("failed waiting for command: {}", e),
                take(&stdout_buf),
                take(&stderr_buf),
            )
        }
        None => {
            let limit = timeout.unwrap_or_default();
            if let Err(e) = child.kill().await {
                olog_warn!("failed to kill timed-out command: {}", e);
            }
            // Grandchildren may still hold the pipes open; stop waiting after the grace period.
            let drain = futures::future::join_all(readers.iter_mut());
            if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                olog_debug!("pipe readers still busy after kill, aborting them");
            }
            abort_all(readers);
            ExecutionResult::failed(
                FailureKind::Timeout,
                format!("command timed out after {}s", limit.as_secs()),
                take(&stdout_buf),
                take(&stderr_buf),
            )
        }
    }
}

fn spawn_reader<R>(mut pipe: R, buf: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => lock(&buf).extend_from_slice(&chunk[..n]),
            }
        }
    })
}

fn abort_all(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        reader.abort();
    }
}

fn lock(buf: &SharedBuf) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take(buf: &SharedBuf) -> String {
    let bytes = std::mem::take(&mut *lock(buf));
    String::from_utf8_lossy(&bytes).trim().to_string()
}
