//! Event stream between producers (backends, orchestrator) and one consumer.
//!
//! Producers hold cloned [`EventSender`]s. The single [`EventReceiver`] pops
//! items in emission order and renders them as text frames, inserting a
//! heartbeat frame whenever the stream stays idle for the heartbeat interval.
//! A session ends with [`StreamItem::Done`]; the stream also ends when every
//! sender is dropped.

use futures::stream::{self, Stream};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::model::ProgressEvent;
use crate::olog_debug;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
pub const COMPLETION_MESSAGE: &str = "all tasks finished";
pub const HEARTBEAT_MESSAGE: &str = "waiting for command output...";

/// Item carried by the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(ProgressEvent),
    /// Terminal marker; nothing follows it.
    Done,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender { tx },
        EventReceiver {
            rx,
            heartbeat: DEFAULT_HEARTBEAT,
            finished: false,
        },
    )
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<StreamItem>,
}

impl EventSender {
    /// Push an event. A departed consumer does not stop the producer.
    pub fn send(&self, event: ProgressEvent) {
        if self.tx.send(StreamItem::Event(event)).is_err() {
            olog_debug!("event dropped: stream consumer disconnected");
        }
    }

    /// Push the terminal marker.
    pub fn finish(&self) {
        let _ = self.tx.send(StreamItem::Done);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    heartbeat: Duration,
    finished: bool,
}

impl EventReceiver {
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Next raw item, or `None` once the marker was seen or all senders left.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        if matches!(item, Some(StreamItem::Done) | None) {
            self.finished = true;
        }
        item
    }

    /// Next frame, producing a heartbeat frame when the stream is idle.
    pub async fn next_frame(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        match tokio::time::timeout(self.heartbeat, self.rx.recv()).await {
            Err(_) => Some(ProgressEvent::heartbeat(HEARTBEAT_MESSAGE).to_frame()),
            Ok(Some(StreamItem::Event(event))) => Some(event.to_frame()),
            Ok(Some(StreamItem::Done)) => {
                self.finished = true;
                Some(ProgressEvent::completed(COMPLETION_MESSAGE).to_frame())
            }
            Ok(None) => {
                self.finished = true;
                None
            }
        }
    }

    /// Every remaining frame as a lazy stream.
    pub fn into_frames(self) -> impl Stream<Item = String> {
        stream::unfold(self, |mut rx| async move {
            rx.next_frame().await.map(|frame| (frame, rx))
        })
    }

    /// Drain every remaining event, ignoring heartbeats.
    pub async fn collect_events(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(item) = self.recv().await {
            if let StreamItem::Event(event) = item {
                events.push(event);
            }
        }
        events
    }
}
