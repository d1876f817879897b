use async_trait::async_trait;

use crate::{
    domain::{ChatId, Destination, MessageRef},
    messaging::types::{ChatAction, InlineKeyboard, Media, ParseMode},
    Result,
};

/// Outbound messaging port.
///
/// Implementations must report provider throttling as `Error::RateLimited`, unparsable
/// markup as `Error::Markup`, and payload-specific refusals as `Error::Rejected`; anything
/// else is treated as a transport failure by the callers.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(
        &self,
        dest: &Destination,
        text: &str,
        mode: ParseMode,
    ) -> Result<MessageRef>;

    async fn send_photo(
        &self,
        dest: &Destination,
        photo: &Media,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<MessageRef>;

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()>;

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        mode: ParseMode,
        keyboard: &InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
