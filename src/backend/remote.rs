//! Remote command execution over the system `ssh` client.
//!
//! Key authentication runs `ssh` in batch mode. Password authentication goes
//! through `sshpass -e` with the secret passed in the environment, never on
//! the command line.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{output_lines, ExecutionResult, FailureKind};
use crate::config::RemoteConfig;
use crate::model::{EventStatus, ProgressEvent};
use crate::stream::EventSender;
use crate::{olog, olog_debug, olog_error, Error, Result};

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAuth {
    /// Private key file; `None` uses the ssh agent or default identities.
    Key(Option<PathBuf>),
    Password(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: RemoteAuth,
}

impl RemoteTarget {
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| Error::Validation("remote host is not configured".to_string()))?;
        let auth = match (&config.password, &config.key_path) {
            (Some(password), None) => RemoteAuth::Password(password.clone()),
            (_, key) => RemoteAuth::Key(key.as_ref().map(PathBuf::from)),
        };
        Ok(Self {
            host,
            port: config.port,
            user: config.user.clone(),
            auth,
        })
    }

    /// Program and arguments that run `command` on this target.
    pub fn invocation(&self, command: &str) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = match &self.auth {
            RemoteAuth::Password(_) => {
                args.extend(["-e".to_string(), "ssh".to_string()]);
                "sshpass"
            }
            RemoteAuth::Key(_) => "ssh",
        };
        args.extend(["-p".to_string(), self.port.to_string()]);
        match &self.auth {
            RemoteAuth::Key(Some(key)) => {
                args.extend(["-i".to_string(), key.display().to_string()]);
                args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
            RemoteAuth::Key(None) => {
                args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
            RemoteAuth::Password(_) => {
                args.extend(["-o".to_string(), "PubkeyAuthentication=no".to_string()]);
            }
        }
        args.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            format!("{}@{}", self.user, self.host),
            command.to_string(),
        ]);
        (program.to_string(), args)
    }
}

/// Runs one command per call on a fixed remote host.
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    target: RemoteTarget,
    timeout: Option<Duration>,
}

impl RemoteExecutor {
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            target,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Run `command` remotely. Stdout lines stream as `running` events;
    /// any stderr output produces an `error` event, otherwise `success`.
    pub async fn run(&self, command: &str, events: &EventSender) -> ExecutionResult {
        olog!(
            "[remote {}@{}] {}",
            self.target.user,
            self.target.host,
            command
        );
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute(command, events)).await {
                Ok(result) => result,
                Err(_) => ExecutionResult::failed(
                    FailureKind::Timeout,
                    format!("remote command timed out after {}s", limit.as_secs()),
                    String::new(),
                    String::new(),
                ),
            },
            None => self.execute(command, events).await,
        };

        if let Some(err) = &result.error {
            olog_error!("[remote {}] {}", self.target.host, err);
            events.send(ProgressEvent::error(err.clone()));
        } else if !result.stderr.is_empty() {
            olog_error!("[remote {}] stderr: {}", self.target.host, result.stderr);
            events.send(ProgressEvent::error(format!(
                "remote command error: {}",
                result.stderr
            )));
        } else {
            events.send(ProgressEvent::new(
                EventStatus::Success,
                "remote command finished",
            ));
        }
        result
    }

    async fn execute(&self, command: &str, events: &EventSender) -> ExecutionResult {
        let (program, args) = self.target.invocation(command);
        if let Err(e) = which::which(&program) {
            return ExecutionResult::failed(
                FailureKind::Launch,
                format!("remote connection failed: {} not available ({})", program, e),
                String::new(),
                String::new(),
            );
        }

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let RemoteAuth::Password(password) = &self.target.auth {
            cmd.env("SSHPASS", password);
        }
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::failed(
                    FailureKind::Launch,
                    format!("remote connection failed: {}", e),
                    String::new(),
                    String::new(),
                )
            }
        };

        let stderr_reader = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).trim().to_string()
            })
        });

        let mut stdout = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            let mut lines = output_lines(pipe).boxed();
            while let Some(line) = lines.next().await {
                events.send(ProgressEvent::new(EventStatus::Running, line.clone()));
                stdout.push(line);
            }
        }

        let stderr = match stderr_reader {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        match child.wait().await {
            // ssh reserves 255 for its own connection errors.
            Ok(status) if status.code() == Some(255) => ExecutionResult::failed(
                FailureKind::Launch,
                format!("remote connection failed: {}", stderr),
                stdout.join("\n"),
                stderr,
            ),
            Ok(status) => {
                olog_debug!("[remote {}] exit {:?}", self.target.host, status.code());
                // Remote success is decided by stderr output, not the exit status.
                let mut result = ExecutionResult::exited(status.code(), stdout.join("\n"), stderr);
                result.success = result.stderr.is_empty();
                if result.success {
                    result.failure = None;
                }
                result
            }
            Err(e) => ExecutionResult::failed(
                FailureKind::Io,
                format!("failed waiting for remote command: {}", e),
                stdout.join("\n"),
                stderr,
            ),
        }
    }
}
