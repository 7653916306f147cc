//! Batch progress events for whatever presentation layer is watching.
//!
//! Delivered over a tokio unbounded channel. A dropped receiver only means
//! nobody is watching; the batch carries on.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Every job starts out pending.
    Started { batch_id: Uuid, total: usize },
    /// Cache miss: the provider is being called for this document.
    JobTranslating { document_id: String },
    JobDone { document_id: String, cached: bool },
    JobFailed { document_id: String, error: String },
    /// Emitted once per resolved job, after its Done/Failed event.
    Progress { completed: usize, total: usize },
    Finished {
        completed: usize,
        total: usize,
        failed: usize,
    },
}

#[derive(Clone)]
pub struct EventSender {
    inner: mpsc::UnboundedSender<BatchEvent>,
}

impl EventSender {
    pub fn send(&self, event: BatchEvent) {
        let _ = self.inner.send(event);
    }
}

pub struct EventReceiver {
    inner: mpsc::UnboundedReceiver<BatchEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<BatchEvent> {
        self.inner.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BatchEvent> {
        self.inner.try_recv().ok()
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<BatchEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { inner: tx }, EventReceiver { inner: rx })
}

/// A sender nobody listens to.
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = channel();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_receiver_dropped_is_ignored() {
        let sender = null_sender();
        sender.send(BatchEvent::Progress {
            completed: 1,
            total: 2,
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(BatchEvent::JobDone {
            document_id: "a.md".into(),
            cached: true,
        })
        .unwrap();
        assert_eq!(json["event"], "job_done");
        assert_eq!(json["cached"], true);
    }

    #[tokio::test]
    async fn drain_returns_queued_events_in_order() {
        let (tx, mut rx) = channel();
        tx.send(BatchEvent::Progress { completed: 1, total: 2 });
        tx.send(BatchEvent::Progress { completed: 2, total: 2 });
        let events = rx.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], BatchEvent::Progress { completed: 2, total: 2 });

        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
