//! Telegram adapter (teloxide).
//!
//! This crate implements the `cico-core` MessagingPort over the Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, Recipient},
    ApiError, RequestError,
};

pub mod handlers;
pub mod router;

use cico_core::{
    domain::{ChatId, Destination, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, Media, ParseMode},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn recipient(dest: &Destination) -> Recipient {
        match dest {
            Destination::Chat(id) => Recipient::Id(Self::tg_chat(*id)),
            Destination::Channel(name) => Recipient::ChannelUsername(name.clone()),
        }
    }

    fn tg_mode(mode: ParseMode) -> Option<teloxide::types::ParseMode> {
        match mode {
            ParseMode::Html => Some(teloxide::types::ParseMode::Html),
            ParseMode::MarkdownV2 => Some(teloxide::types::ParseMode::MarkdownV2),
            ParseMode::Plain => None,
        }
    }

    fn input_file(media: &Media) -> Result<InputFile> {
        match media {
            Media::Bytes(bytes) => Ok(InputFile::memory(bytes.clone()).file_name("photo.jpg")),
            Media::Url(url) => reqwest::Url::parse(url)
                .map(InputFile::url)
                .map_err(|e| Error::Rejected(format!("bad image url {url}: {e}"))),
        }
    }

    fn markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback_data.clone()))
                .collect::<Vec<_>>()
        }))
    }

    fn msg_ref(msg: &Message) -> MessageRef {
        MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        }
    }

    fn map_err(e: RequestError) -> Error {
        match e {
            RequestError::RetryAfter(wait) => Error::RateLimited {
                retry_after: Some(wait),
            },
            RequestError::Api(api @ ApiError::CantParseEntities) => Error::Markup(api.to_string()),
            RequestError::Api(api) => Error::Rejected(api.to_string()),
            other => Error::Transport(format!("telegram error: {other}")),
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_text(
        &self,
        dest: &Destination,
        text: &str,
        mode: ParseMode,
    ) -> Result<MessageRef> {
        let mut req = self.bot.send_message(Self::recipient(dest), text.to_string());
        if let Some(pm) = Self::tg_mode(mode) {
            req = req.parse_mode(pm);
        }
        let msg = req.await.map_err(Self::map_err)?;
        Ok(Self::msg_ref(&msg))
    }

    async fn send_photo(
        &self,
        dest: &Destination,
        photo: &Media,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<MessageRef> {
        let mut req = self
            .bot
            .send_photo(Self::recipient(dest), Self::input_file(photo)?);
        if let Some(caption) = caption {
            req = req.caption(caption.to_string());
            if let Some(pm) = Self::tg_mode(mode) {
                req = req.parse_mode(pm);
            }
        }
        let msg = req.await.map_err(Self::map_err)?;
        Ok(Self::msg_ref(&msg))
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        let mut req = self.bot.edit_message_text(
            Self::tg_chat(msg.chat_id),
            Self::tg_msg_id(msg.message_id),
            text.to_string(),
        );
        if let Some(pm) = Self::tg_mode(mode) {
            req = req.parse_mode(pm);
        }
        if let Some(keyboard) = keyboard {
            req = req.reply_markup(Self::markup(keyboard));
        }

        match req.await {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        mode: ParseMode,
        keyboard: &InlineKeyboard,
    ) -> Result<MessageRef> {
        let mut req = self
            .bot
            .send_message(Self::tg_chat(chat_id), text.to_string())
            .reply_markup(Self::markup(keyboard));
        if let Some(pm) = Self::tg_mode(mode) {
            req = req.parse_mode(pm);
        }
        let msg = req.await.map_err(Self::map_err)?;
        Ok(Self::msg_ref(&msg))
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.bot
            .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
            ChatAction::UploadPhoto => teloxide::types::ChatAction::UploadPhoto,
        };
        self.bot
            .send_chat_action(Self::tg_chat(chat_id), tg_action)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut req = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(t) = text {
            req = req.text(t.to_string());
        }
        req.await.map_err(Self::map_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cico_core::messaging::types::InlineButton;

    #[test]
    fn throttling_keeps_the_suggested_wait() {
        let err = TelegramMessenger::map_err(RequestError::RetryAfter(
            std::time::Duration::from_secs(7),
        ));
        assert!(matches!(
            err,
            Error::RateLimited { retry_after: Some(d) } if d.as_secs() == 7
        ));
    }

    #[test]
    fn api_errors_split_into_markup_and_rejection() {
        let markup = TelegramMessenger::map_err(RequestError::Api(ApiError::CantParseEntities));
        assert!(matches!(markup, Error::Markup(_)));

        let rejected = TelegramMessenger::map_err(RequestError::Api(ApiError::MessageIsTooLong));
        assert!(matches!(rejected, Error::Rejected(_)));
    }

    #[test]
    fn channel_destinations_use_usernames() {
        assert_eq!(
            TelegramMessenger::recipient(&Destination::Channel("@dump".to_string())),
            Recipient::ChannelUsername("@dump".to_string())
        );
        assert_eq!(
            TelegramMessenger::recipient(&Destination::Chat(ChatId(-100))),
            Recipient::Id(teloxide::types::ChatId(-100))
        );
    }

    #[test]
    fn invalid_image_url_is_a_payload_rejection() {
        let err = TelegramMessenger::input_file(&Media::Url("not a url".to_string())).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }

    #[test]
    fn keyboard_rows_are_preserved() {
        let kb = InlineKeyboard {
            rows: vec![
                vec![InlineButton::new("A", "a"), InlineButton::new("B", "b")],
                vec![InlineButton::new("C", "c")],
            ],
        };
        let markup = TelegramMessenger::markup(&kb);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
    }
}
