//! Client update sessions.
//!
//! A client update runs one configured command on the client web host and
//! streams its output. It shares the event stream with operation sessions
//! but has no tasks, phases or statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::backend::{RemoteExecutor, RemoteTarget};
use crate::config::{Config, RemoteConfig};
use crate::model::ProgressEvent;
use crate::stream::{self, EventReceiver, EventSender, DEFAULT_HEARTBEAT};
use crate::{olog, olog_warn};

#[derive(Debug, Clone)]
pub struct ClientUpdater {
    /// Target name → command run on the remote host.
    commands: BTreeMap<String, String>,
    remote: RemoteConfig,
    timeout: Option<Duration>,
    heartbeat: Duration,
}

impl ClientUpdater {
    pub fn new(commands: BTreeMap<String, String>, remote: RemoteConfig) -> Self {
        Self {
            commands,
            remote,
            timeout: None,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let commands = config
            .client_updates
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            timeout: Some(config.default_timeout()),
            heartbeat: config.heartbeat(),
            ..Self::new(commands, config.remote.clone())
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Known targets in sorted order.
    pub fn targets(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    /// Start a client update for `target` and return its event stream.
    pub fn run(&self, target: &str) -> EventReceiver {
        let (tx, rx) = stream::channel();
        let updater = self.clone();
        let target = target.to_string();
        tokio::spawn(async move { updater.update(&target, tx).await });
        rx.with_heartbeat(self.heartbeat)
    }

    async fn update(&self, target: &str, events: EventSender) {
        let Some(command) = self.commands.get(target) else {
            let message = format!(
                "unsupported client update target: {} (supported: {})",
                target,
                self.targets().join(", ")
            );
            olog_warn!("[client] {}", message);
            events.send(ProgressEvent::error(message));
            return;
        };

        let remote = match RemoteTarget::from_config(&self.remote) {
            Ok(remote) => remote,
            Err(e) => {
                olog_warn!("[client] {}", e);
                events.send(ProgressEvent::error(e.to_string()));
                return;
            }
        };

        olog!("[client] updating {} on {}", target, remote.host);
        events.send(ProgressEvent::info(format!(
            "connecting to {} for client update ({})",
            remote.host, target
        )));

        let mut executor = RemoteExecutor::new(remote);
        if let Some(timeout) = self.timeout {
            executor = executor.with_timeout(timeout);
        }
        let result = executor.run(command, &events).await;
        olog!("[client] {} finished: success={}", target, result.success);
        events.finish();
    }
}
