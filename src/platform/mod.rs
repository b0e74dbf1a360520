pub mod telegram;

use async_trait::async_trait;

/// How the destination should interpret the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    #[allow(dead_code)]
    Plain,
    /// Telegram MarkdownV2; the text must already be escaped.
    MarkdownV2,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The platform refused the message (chat gone, bot removed, bad markup).
    #[error("rejected by platform: {0}")]
    Rejected(String),

    #[error("delivery failed: {0}")]
    Transient(String),
}

/// A place formatted responses can be sent to.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(
        &self,
        destination_id: i64,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), DeliveryError>;
}
