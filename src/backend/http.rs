//! HTTP reload and status triggers.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::model::{EventStatus, ProgressEvent, Task};
use crate::stream::EventSender;
use crate::{olog, olog_warn, Error, Result};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues plain GET calls and reports each one on the event stream.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: Client,
    timeout: Duration,
}

impl HttpTrigger {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// GET `url`, streaming an `info` event before the call and a `success`
    /// or `error` event after it. Never fails past this call.
    pub async fn trigger(&self, url: &str, action: &str, events: &EventSender) -> bool {
        olog!("[http] {} -> {}", action, url);
        events.send(
            ProgressEvent::info(format!("issuing {}: {}", action, url)).with_data(json!({ "url": url })),
        );

        match self.get(url).await {
            Ok(body) => {
                olog!("[http] {} ok: {}", url, body);
                events.send(
                    ProgressEvent::new(EventStatus::Success, format!("{} succeeded: {}", action, body))
                        .with_data(json!({ "url": url, "body": body })),
                );
                true
            }
            Err(e) => {
                let message = match &e {
                    Error::Http(err) if err.is_timeout() => format!(
                        "{} timed out after {}s: {}",
                        action,
                        self.timeout.as_secs(),
                        url
                    ),
                    _ => format!("{} failed: {}", action, e),
                };
                olog_warn!("[http] {}", message);
                events.send(ProgressEvent::error(message).with_data(json!({ "url": url })));
                false
            }
        }
    }

    /// Run an HTTP task: GET its URL, reported under its description.
    pub async fn run_task(&self, task: &Task, events: &EventSender) -> bool {
        match task.url() {
            Some(url) => self.trigger(url, &task.description, events).await,
            None => {
                olog_warn!("[http] task {} is not an HTTP call", task.id);
                events.send(ProgressEvent::for_task(
                    &task.id,
                    EventStatus::Error,
                    format!("task {} is not an HTTP call", task.id),
                ));
                false
            }
        }
    }

    async fn get(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?.trim().to_string())
    }
}
