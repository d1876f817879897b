use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use cico_core::{
    domain::{ChatId, Destination, UserId},
    export::CancelOutcome,
    formatting::{escape_html, format_settings_html},
    messaging::types::{InlineButton, InlineKeyboard, ParseMode},
};

use crate::router::AppState;

use super::{reply_html, report_portal_error, require_token, send_profile, send_reports};

const HELP_HTML: &str = "🤖 <b>CICO Attendance Bot</b>\n\n\
<b>📋 Commands:</b>\n\
/login - Log in to the attendance portal\n\
/profile - Show your student profile\n\
/check - Latest attendance record\n\
/attendance - Reports menu (today, last 10, bulk upload)\n\
/settings - Image stretching on/off\n\
/dump &lt;channel_id&gt; - Channel for bulk uploads\n\
/cancel - Stop a running bulk upload\n\
/help - Show this message";

const DUMP_USAGE_HTML: &str = "⚠️ Usage: /dump &lt;channel_id&gt;\n\
Example: <code>/dump -1001234567890</code> or <code>/dump @my_channel</code>\n\n\
This sets the channel where \"Get All Data\" uploads records.";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub(super) fn attendance_menu() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![
        InlineButton::new("📅 Today's Report", "today_report"),
        InlineButton::new("🔟 Last 10 Reports", "last_10_reports"),
        InlineButton::new("📥 Get All Data", "get_all_data"),
    ])
}

pub(super) fn settings_keyboard() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![
        InlineButton::new("✅ Enable Stretching", "set_stretch_on"),
        InlineButton::new("❌ Disable Stretching", "set_stretch_off"),
    ])
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, arg) = parse_command(text);
    info!(user_id = user_id.0, %cmd, "command");

    match cmd.as_str() {
        "start" | "help" => {
            reply_html(&state, chat_id, HELP_HTML).await;
        }

        "login" => {
            state.logins.begin(user_id).await;
            reply_html(&state, chat_id, "📧 Please enter your email address:").await;
        }

        "profile" => {
            if let Some(token) = require_token(&state, chat_id, user_id).await {
                send_profile(&state, chat_id, user_id, &token).await;
            }
        }

        "check" => {
            let Some(token) = require_token(&state, chat_id, user_id).await else {
                return Ok(());
            };
            reply_html(&state, chat_id, "🔄 Fetching latest attendance...").await;

            match state.portal.attendance(&token, 1).await {
                Ok(records) if records.is_empty() => {
                    reply_html(
                        &state,
                        chat_id,
                        "ℹ️ No attendance records found for the last 30 days.",
                    )
                    .await;
                }
                Ok(records) => {
                    if let Err(e) = send_reports(&state, chat_id, user_id, &records[..1]).await {
                        warn!(user_id = user_id.0, error = %e, "check report failed");
                        reply_html(&state, chat_id, "❌ An error occurred while sending the report.").await;
                    }
                }
                Err(e) => {
                    report_portal_error(
                        &state,
                        chat_id,
                        user_id,
                        &e,
                        "❌ An error occurred while fetching data.",
                    )
                    .await;
                }
            }
        }

        "attendance" => {
            if let Err(e) = state
                .messenger
                .send_keyboard(chat_id, "📊 <b>Attendance Menu</b>", ParseMode::Html, &attendance_menu())
                .await
            {
                warn!(error = %e, "attendance menu failed");
            }
        }

        "settings" => {
            let stretch = state.store.get(user_id).await.stretch_images;
            if let Err(e) = state
                .messenger
                .send_keyboard(
                    chat_id,
                    &format_settings_html(stretch),
                    ParseMode::Html,
                    &settings_keyboard(),
                )
                .await
            {
                warn!(error = %e, "settings menu failed");
            }
        }

        "dump" => {
            let Some(dest) = Destination::parse(&arg) else {
                reply_html(&state, chat_id, DUMP_USAGE_HTML).await;
                return Ok(());
            };
            let raw = dest.to_string();
            match state.store.set_dump_destination(user_id, &raw).await {
                Ok(()) => {
                    reply_html(
                        &state,
                        chat_id,
                        &format!(
                            "✅ Dump channel set to: <code>{}</code>\n\nNow use \"Get All Data\" in /attendance to upload records there.",
                            escape_html(&raw)
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(user_id = user_id.0, error = %e, "failed to save dump channel");
                    reply_html(&state, chat_id, "❌ Error saving dump channel.").await;
                }
            }
        }

        "cancel" => {
            let reply = if state.exports.cancel(user_id) == CancelOutcome::Requested {
                "🛑 Stopping upload..."
            } else if state.logins.abort(user_id).await {
                "Login cancelled."
            } else {
                "ℹ️ No active upload found."
            };
            reply_html(&state, chat_id, reply).await;
        }

        _ => {
            reply_html(&state, chat_id, "Unknown command. Use /help to see what I can do.").await;
        }
    }

    Ok(())
}
