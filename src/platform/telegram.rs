use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::RequestError;
use tracing::debug;

use crate::platform::{DeliveryError, DeliverySink, FormatMode};

/// Telegram rejects messages over 4096 chars; leave headroom.
const MAX_MESSAGE_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };
        // Never cut a MarkdownV2 escape away from the char it escapes
        while actual_end < text.len() && actual_end > start + 1 && text[..actual_end].ends_with('\\') {
            actual_end -= 1;
        }

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

fn map_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::Api(api) => DeliveryError::Rejected(api.to_string()),
        other => DeliveryError::Transient(other.to_string()),
    }
}

/// Delivers through the Bot API.
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send(
        &self,
        destination_id: i64,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), DeliveryError> {
        let chat = ChatId(destination_id);
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let request = self.bot.send_message(chat, chunk);
            let request = match mode {
                FormatMode::MarkdownV2 => request.parse_mode(ParseMode::MarkdownV2),
                FormatMode::Plain => request,
            };
            request.await.map_err(map_error)?;
        }
        debug!("Delivered {} chars to chat {}", text.len(), destination_id);
        Ok(())
    }
}
