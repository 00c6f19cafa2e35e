use async_trait::async_trait;
use covenant_types::Notification;
use thiserror::Error;

/// Delivery failure surfaced by a [`NotificationSink`].
///
/// The scheduler logs these and moves on; the claimed idempotency key
/// stays unconfirmed, so the next sweep retries the send.
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Outbound notification delivery capability (email, chat, webhook).
/// Fire-and-forget from the engine's perspective; retry policy beyond the
/// sweep cadence is the collaborator's concern.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}
