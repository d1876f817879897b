use std::time::Duration;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the core can tell
/// throttling, per-payload rejections, and hard transport failures apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider asked us to slow down. `retry_after` is its suggested wait, if any.
    #[error("too many requests (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The provider could not parse the markup of a text payload.
    #[error("markup rejected: {0}")]
    Markup(String),

    /// The provider refused this particular payload (bad file reference, too long, ...).
    #[error("payload rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("portal error: {0}")]
    Portal(String),

    #[error("session expired")]
    AuthExpired,

    #[error("invalid credentials")]
    InvalidCredentials,
}

pub type Result<T> = std::result::Result<T, Error>;
