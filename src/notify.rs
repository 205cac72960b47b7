//! Notification payloads and notifiers
//!
//! Delivery is fire-and-forget from the engine's point of view: a notifier
//! failure is logged and never rolls back a committed ledger posting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RewardEarned,
    BadgeAwarded,
    TopComment,
    TipReceived,
    LoanDisbursed,
    LoanRepaid,
    LoanDefaulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            reference_id: reference_id.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Hands `notification` to `notifier`, logging instead of failing.
pub fn emit(notifier: &dyn Notifier, notification: Notification) {
    let user_id = notification.user_id.clone();
    let kind = notification.kind;
    if let Err(e) = notifier.notify(notification) {
        warn!(user_id = %user_id, kind = ?kind, error = %e, "Notification dropped");
    }
}

/// Writes notifications to the log; used when no external notifier is wired.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            user_id = %notification.user_id,
            kind = ?notification.kind,
            reference_id = %notification.reference_id,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Queues notifications for an external delivery task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx
            .send(notification)
            .map_err(|_| NotifyError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        emit(
            &notifier,
            Notification::new("user_1", NotificationKind::TipReceived, "Tip", "+5 coins", "tip_1"),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.user_id, "user_1");
        assert_eq!(received.kind, NotificationKind::TipReceived);
    }

    #[test]
    fn test_emit_swallows_closed_channel() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);

        assert!(matches!(
            notifier.notify(Notification::new("u", NotificationKind::LoanRepaid, "t", "m", "r")),
            Err(NotifyError::ChannelClosed)
        ));
        // Must not panic
        emit(
            &notifier,
            Notification::new("u", NotificationKind::LoanRepaid, "t", "m", "r"),
        );
    }
}
