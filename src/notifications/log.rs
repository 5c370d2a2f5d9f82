use async_trait::async_trait;

use super::{Notification, NotificationResult, Notifier};

/// Emits each notification as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> NotificationResult<()> {
        tracing::info!(
            kind = notification.kind(),
            org_id = notification.org_id(),
            recipient = notification.recipient().unwrap_or("-"),
            "{}",
            notification.message()
        );
        crate::observability::metrics::record_notification(notification.kind(), true);
        Ok(())
    }
}
