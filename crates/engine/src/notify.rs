//! In-process notification bus
//!
//! One broadcast topic carrying JSON envelopes, at-most-once. Consumers
//! subscribe and filter by `user_id`/`type`; lagging consumers lose old
//! envelopes, which is safe because progress is monotone.

use async_trait::async_trait;
use tokio::sync::broadcast;

use transcribe_core::{Notification, NotificationSink, NotifyError};

pub use transcribe_core::notification::NotifyError as BusError;

/// Broadcast-backed sink; clones share the same topic
#[derive(Clone)]
pub struct BroadcastNotificationSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the topic; the caller filters by user and type
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        // send fails only when nobody is subscribed; that is not an error
        // for a fire-and-forget topic
        let _ = self.tx.send(notification);
        Ok(())
    }
}

/// Publish with the fire-and-forget contract: failures are logged, never
/// propagated to the task.
pub async fn publish_or_log(sink: &dyn NotificationSink, notification: Notification) {
    let kind = notification.kind;
    if let Err(e) = sink.publish(notification).await {
        tracing::warn!(kind = kind.as_str(), error = %e, "Notification publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcribe_core::NotificationType;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_envelopes() {
        let sink = BroadcastNotificationSink::new(16);
        let mut rx = sink.subscribe();

        let n = Notification::file_status(
            7,
            NotificationType::TranscriptionStatus,
            Uuid::new_v4(),
            "completed",
            Some(100),
            None,
        );
        sink.publish(n).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.user_id, 7);
        assert_eq!(got.kind, NotificationType::TranscriptionStatus);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let sink = BroadcastNotificationSink::new(16);
        let n = Notification::file_status(
            1,
            NotificationType::FileCreated,
            Uuid::new_v4(),
            "pending",
            None,
            None,
        );
        // no subscriber; must not error
        sink.publish(n).await.unwrap();
    }
}
