//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - checks the allow-list
//! - resolves the user's stored settings
//! - calls into `cico-core` (portal port, record delivery, export controller)

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, warn};

use cico_core::{
    domain::{ChatId, Destination, UserId},
    errors::Error,
    formatting::format_profile_html,
    messaging::types::{ChatAction, Media, ParseMode},
    records::AttendanceRecord,
    report::deliver_record,
};

use crate::router::AppState;
mod callback;
mod commands;
mod text;

const NOT_LOGGED_IN: &str = "⚠️ Please /login first.";
const SESSION_EXPIRED: &str = "❌ Session expired. Please login again using /login.";

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !state.cfg.is_user_allowed(user_id) {
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    match msg.text().map(|t| t.starts_with('/')) {
        Some(true) => commands::handle_command(bot, msg, state).await,
        Some(false) => text::handle_text(bot, msg, state).await,
        None => Ok(()),
    }
}

/// Best-effort HTML reply.
async fn reply_html(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state
        .messenger
        .send_text(&Destination::Chat(chat_id), html, ParseMode::Html)
        .await
    {
        warn!(chat_id = chat_id.0, error = %e, "reply failed");
    }
}

/// Stored token, or a "please login" reply and `None`.
async fn require_token(state: &AppState, chat_id: ChatId, user: UserId) -> Option<String> {
    let token = state.store.get(user).await.auth_token;
    if token.is_none() {
        reply_html(state, chat_id, NOT_LOGGED_IN).await;
    }
    token
}

/// Report a portal failure to the user. An expired session also drops the stored token.
async fn report_portal_error(
    state: &AppState,
    chat_id: ChatId,
    user: UserId,
    err: &Error,
    fallback: &str,
) {
    match err {
        Error::AuthExpired => {
            if let Err(e) = state.store.clear_token(user).await {
                warn!(user_id = user.0, error = %e, "failed to clear expired token");
            }
            reply_html(state, chat_id, SESSION_EXPIRED).await;
        }
        other => {
            warn!(user_id = user.0, error = %other, "portal request failed");
            reply_html(state, chat_id, fallback).await;
        }
    }
}

/// Deliver records to the user's own chat, in the given order.
async fn send_reports(
    state: &AppState,
    chat_id: ChatId,
    user: UserId,
    records: &[AttendanceRecord],
) -> cico_core::Result<()> {
    let stretch = state.store.get(user).await.stretch_images;
    let dest = Destination::Chat(chat_id);

    for record in records {
        let _ = state
            .messenger
            .send_chat_action(chat_id, ChatAction::UploadPhoto)
            .await;
        let report =
            deliver_record(&state.formatter, &state.sender, record, &dest, stretch).await?;
        debug!(
            date = %record.date,
            sent = report.sent,
            skipped = report.skipped,
            "report delivered"
        );
    }
    Ok(())
}

/// Profile card: photo with caption when the portal has a picture, text otherwise.
async fn send_profile(state: &AppState, chat_id: ChatId, user: UserId, token: &str) {
    let _ = state
        .messenger
        .send_chat_action(chat_id, ChatAction::Typing)
        .await;

    let profile = match state.portal.profile(token).await {
        Ok(p) => p,
        Err(e) => {
            report_portal_error(
                state,
                chat_id,
                user,
                &e,
                "❌ Failed to load profile details.",
            )
            .await;
            return;
        }
    };

    let card = format_profile_html(&profile);
    let dest = Destination::Chat(chat_id);

    if let Some(pic) = profile.profile_pic.as_deref() {
        let photo: Media = state.images.process(pic, false).await;
        match state
            .messenger
            .send_photo(&dest, &photo, Some(&card), ParseMode::Html)
            .await
        {
            Ok(_) => return,
            Err(e) => warn!(user_id = user.0, error = %e, "profile photo failed, sending text card"),
        }
    }
    reply_html(state, chat_id, &card).await;
}
