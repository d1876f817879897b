//! In-memory messenger used by the pipeline tests.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, Destination, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, Media, ParseMode},
    },
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Text {
        dest: Destination,
        text: String,
        mode: ParseMode,
    },
    Photo {
        dest: Destination,
        media: Media,
        caption: Option<String>,
    },
    Edit {
        msg: MessageRef,
        text: String,
    },
}

/// Failure injected into the next outbound send (text or photo).
#[derive(Clone, Debug)]
pub enum Fail {
    RateLimited(Option<Duration>),
    Markup,
    Rejected,
    Transport,
}

impl Fail {
    fn into_error(self) -> Error {
        match self {
            Fail::RateLimited(retry_after) => Error::RateLimited { retry_after },
            Fail::Markup => Error::Markup("can't parse entities".to_string()),
            Fail::Rejected => Error::Rejected("wrong file identifier".to_string()),
            Fail::Transport => Error::Transport("connection reset".to_string()),
        }
    }
}

type TextHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sent: Mutex<Vec<Sent>>,
    attempts: Mutex<usize>,
    failures: Mutex<VecDeque<Option<Fail>>>,
    on_text: Mutex<Option<TextHook>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

impl FakeMessenger {
    /// Queue outcomes for the next sends; `None` means "succeed".
    pub fn script(&self, outcomes: impl IntoIterator<Item = Option<Fail>>) {
        lock(&self.failures).extend(outcomes);
    }

    /// Runs after every successful text send (used to inject cancellation mid-export).
    pub fn on_text(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *lock(&self.on_text) = Some(Box::new(hook));
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn photos(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Photo { .. }))
            .count()
    }

    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = lock(&self.next_id);
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    fn next_outcome(&self) -> Result<()> {
        *lock(&self.attempts) += 1;
        match lock(&self.failures).pop_front().flatten() {
            Some(fail) => Err(fail.into_error()),
            None => Ok(()),
        }
    }
}

fn chat_of(dest: &Destination) -> ChatId {
    match dest {
        Destination::Chat(id) => *id,
        Destination::Channel(_) => ChatId(0),
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_text(
        &self,
        dest: &Destination,
        text: &str,
        mode: ParseMode,
    ) -> Result<MessageRef> {
        self.next_outcome()?;
        lock(&self.sent).push(Sent::Text {
            dest: dest.clone(),
            text: text.to_string(),
            mode,
        });
        if let Some(hook) = lock(&self.on_text).as_ref() {
            hook(text);
        }
        Ok(self.alloc(chat_of(dest)))
    }

    async fn send_photo(
        &self,
        dest: &Destination,
        photo: &Media,
        caption: Option<&str>,
        _mode: ParseMode,
    ) -> Result<MessageRef> {
        self.next_outcome()?;
        lock(&self.sent).push(Sent::Photo {
            dest: dest.clone(),
            media: photo.clone(),
            caption: caption.map(str::to_string),
        });
        Ok(self.alloc(chat_of(dest)))
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        _mode: ParseMode,
        _keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        lock(&self.sent).push(Sent::Edit {
            msg,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        mode: ParseMode,
        _keyboard: &InlineKeyboard,
    ) -> Result<MessageRef> {
        lock(&self.sent).push(Sent::Text {
            dest: Destination::Chat(chat_id),
            text: text.to_string(),
            mode,
        });
        Ok(self.alloc(chat_id))
    }

    async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}
