use crate::domain::recipient::DestinationId;

pub mod telegram;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered { message_id: Option<i64> },
    /// Preconditions unmet (no credential or destination); nothing was sent.
    Skipped { reason: String },
    Failed { detail: String },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// Outbound delivery. Implementations report failure in the result instead of erroring.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel_name(&self) -> &'static str;

    async fn send(&self, destination: &DestinationId, html: &str) -> DeliveryResult;
}
