//! Outbound MarkdownV2 messages.

use teloxide::{
    prelude::*,
    types::{MessageId, ParseMode, ReplyMarkup},
    RequestError,
};
use tracing::{error, info};

/// A message to send. The text must already be MarkdownV2-escaped.
#[derive(Clone, Debug)]
pub struct Reply {
    pub chat_id: ChatId,
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub markup: Option<ReplyMarkup>,
}

impl Reply {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to: None,
            markup: None,
        }
    }

    pub fn to_message(msg: &Message, text: impl Into<String>) -> Self {
        Self {
            reply_to: Some(msg.id),
            ..Self::new(msg.chat.id, text)
        }
    }

    pub fn markup(mut self, markup: impl Into<ReplyMarkup>) -> Self {
        self.markup = Some(markup.into());
        self
    }

    async fn attempt(&self, bot: &Bot) -> Result<Message, RequestError> {
        let mut request = bot
            .send_message(self.chat_id, self.text.clone())
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(id) = self.reply_to {
            request = request.reply_to_message_id(id).allow_sending_without_reply(true);
        }
        if let Some(markup) = &self.markup {
            request = request.reply_markup(markup.clone());
        }
        request.await
    }

    /// Sends the message. When Telegram asks to slow down, waits the
    /// requested time and tries once more. Failures are logged, not returned.
    pub async fn send(&self, bot: &Bot) -> bool {
        let result = match self.attempt(bot).await {
            Err(RequestError::RetryAfter(delay)) => {
                info!(chat_id = %self.chat_id, seconds = delay.as_secs(), "Rate limit hit, waiting");
                tokio::time::sleep(delay).await;
                self.attempt(bot).await
            }
            result => result,
        };

        match result {
            Ok(_) => true,
            Err(err @ RequestError::RetryAfter(_)) => {
                error!(%err, chat_id = %self.chat_id, "Still rate limited after waiting, dropping message");
                false
            }
            Err(err) => {
                error!(%err, chat_id = %self.chat_id, text_length = self.text.len(), "Failed to send message");
                false
            }
        }
    }
}
