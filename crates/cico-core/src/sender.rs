//! Single-payload delivery with bounded retry on provider throttling.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    domain::{Destination, MessageRef},
    errors::Error,
    formatting::strip_markdown_v2,
    messaging::{
        port::MessagingPort,
        types::{Media, ParseMode},
    },
};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts per payload, first try included.
    pub max_attempts: u32,
    /// Added on top of the provider's suggested wait.
    pub padding: Duration,
    /// Used when a throttling signal carries no suggested wait.
    pub default_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            padding: Duration::from_secs(1),
            default_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Payload {
    Photo {
        media: Media,
        caption: Option<String>,
    },
    Text {
        body: String,
        mode: ParseMode,
    },
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Photo { .. } => "photo",
            Payload::Text { .. } => "text",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Still throttled after every attempt. The payload is dropped; the caller moves on.
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// The provider refused this payload (and its plain-text fallback, for text).
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Non-retryable transport failure.
    #[error(transparent)]
    Transport(Error),
}

impl SendError {
    /// Whether the failure is confined to the one payload.
    pub fn is_per_payload(&self) -> bool {
        !matches!(self, SendError::Transport(_))
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Transport(inner) => inner,
            other => Error::Rejected(other.to_string()),
        }
    }
}

pub struct RateLimitedSender {
    messenger: Arc<dyn MessagingPort>,
    policy: RetryPolicy,
}

impl RateLimitedSender {
    pub fn new(messenger: Arc<dyn MessagingPort>, policy: RetryPolicy) -> Self {
        Self { messenger, policy }
    }

    pub async fn send(
        &self,
        dest: &Destination,
        payload: &Payload,
    ) -> Result<MessageRef, SendError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.attempt(dest, payload).await {
                Ok(msg) => return Ok(msg),
                Err(e) => e,
            };

            match err {
                Error::RateLimited { retry_after } => {
                    if attempt >= max_attempts {
                        warn!(%dest, kind = payload.kind(), attempt, "still throttled, dropping payload");
                        return Err(SendError::RateLimitExceeded { attempts: attempt });
                    }
                    let wait = retry_after.unwrap_or(self.policy.default_wait) + self.policy.padding;
                    info!(%dest, kind = payload.kind(), attempt, wait_secs = wait.as_secs_f64(), "throttled, backing off");
                    sleep(wait).await;
                }
                Error::Markup(reason) => return self.send_plain_fallback(dest, payload, reason).await,
                Error::Rejected(reason) => {
                    warn!(%dest, kind = payload.kind(), %reason, "payload rejected");
                    return Err(SendError::DeliveryFailed(reason));
                }
                other => return Err(SendError::Transport(other)),
            }
        }
    }

    async fn attempt(&self, dest: &Destination, payload: &Payload) -> crate::Result<MessageRef> {
        match payload {
            Payload::Photo { media, caption } => {
                self.messenger
                    .send_photo(dest, media, caption.as_deref(), ParseMode::Plain)
                    .await
            }
            Payload::Text { body, mode } => self.messenger.send_text(dest, body, *mode).await,
        }
    }

    /// One plain-text retry after a markup rejection; any failure here drops the payload.
    async fn send_plain_fallback(
        &self,
        dest: &Destination,
        payload: &Payload,
        reason: String,
    ) -> Result<MessageRef, SendError> {
        let Payload::Text { body, .. } = payload else {
            return Err(SendError::DeliveryFailed(reason));
        };

        warn!(%dest, %reason, "markup rejected, falling back to plain text");
        let plain = strip_markdown_v2(body);
        self.messenger
            .send_text(dest, &plain, ParseMode::Plain)
            .await
            .map_err(|e| SendError::DeliveryFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatId;
    use crate::messaging::fake::{Fail, FakeMessenger, Sent};
    use tokio::time::Instant;

    fn setup() -> (Arc<FakeMessenger>, RateLimitedSender) {
        let fake = Arc::new(FakeMessenger::default());
        let sender = RateLimitedSender::new(fake.clone(), RetryPolicy::default());
        (fake, sender)
    }

    fn text(body: &str) -> Payload {
        Payload::Text {
            body: body.to_string(),
            mode: ParseMode::MarkdownV2,
        }
    }

    const DEST: Destination = Destination::Chat(ChatId(10));

    #[tokio::test(start_paused = true)]
    async fn retries_after_throttle_with_padding() {
        let (fake, sender) = setup();
        fake.script([Some(Fail::RateLimited(Some(Duration::from_secs(2)))), None]);

        let started = Instant::now();
        sender.send(&DEST, &text("hi")).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(fake.attempts(), 2);
        assert_eq!(fake.texts(), vec!["hi".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_throttles() {
        let (fake, sender) = setup();
        fake.script([
            Some(Fail::RateLimited(Some(Duration::from_secs(1)))),
            Some(Fail::RateLimited(None)),
            Some(Fail::RateLimited(Some(Duration::from_secs(1)))),
        ]);

        let started = Instant::now();
        let err = sender.send(&DEST, &text("hi")).await.unwrap_err();

        assert!(matches!(err, SendError::RateLimitExceeded { attempts: 3 }));
        assert!(err.is_per_payload());
        assert_eq!(fake.attempts(), 3);
        // 1+1 for the first back-off, 10+1 default for the second, none after the last.
        assert!(started.elapsed() >= Duration::from_secs(13));
        assert!(fake.sent().is_empty());
    }

    #[tokio::test]
    async fn markup_rejection_falls_back_to_plain_text_once() {
        let (fake, sender) = setup();
        fake.script([Some(Fail::Markup), None]);

        sender
            .send(&DEST, &text(">⏰ *Check\\-In:* 09\\.00"))
            .await
            .unwrap();

        assert_eq!(
            fake.sent(),
            vec![Sent::Text {
                dest: DEST,
                text: "⏰ Check-In: 09.00".to_string(),
                mode: ParseMode::Plain,
            }]
        );
    }

    #[tokio::test]
    async fn failed_fallback_is_delivery_failure() {
        let (fake, sender) = setup();
        fake.script([Some(Fail::Markup), Some(Fail::Transport)]);

        let err = sender.send(&DEST, &text("x")).await.unwrap_err();
        assert!(matches!(err, SendError::DeliveryFailed(_)));
        assert_eq!(fake.attempts(), 2);
    }

    #[tokio::test]
    async fn rejected_photo_is_per_payload() {
        let (fake, sender) = setup();
        fake.script([Some(Fail::Rejected)]);

        let photo = Payload::Photo {
            media: Media::Url("https://img.test/a.jpg".to_string()),
            caption: Some("Check-In Image".to_string()),
        };
        let err = sender.send(&DEST, &photo).await.unwrap_err();
        assert!(matches!(err, SendError::DeliveryFailed(_)));
        assert_eq!(fake.attempts(), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        let (fake, sender) = setup();
        fake.script([Some(Fail::Transport)]);

        let err = sender.send(&DEST, &text("x")).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(Error::Transport(_))));
        assert!(!err.is_per_payload());
        assert_eq!(fake.attempts(), 1);
    }
}
