use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::{task::JoinError, time::Instant};
use tracing::{error, info, warn};

use cico_core::{
    domain::{ChatId, Destination, MessageId, MessageRef, UserId},
    errors::Error,
    export::{CancelOutcome, ExportError, ExportOutcome, StatusSink},
    formatting::format_settings_html,
    messaging::{
        port::MessagingPort,
        types::{InlineButton, InlineKeyboard, ParseMode},
    },
    ports::ALL_RECORDS,
    progress::{
        render_cancelled_html, render_done_html, render_failed_html, render_progress_html,
        snapshot, ProgressSnapshot,
    },
    records::AttendanceRecord,
    Result,
};

use crate::router::AppState;

use super::{commands::settings_keyboard, reply_html, report_portal_error, require_token, send_reports};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CallbackAction {
    TodayReport,
    LastTenReports,
    GetAllData,
    CancelDump,
    SetStretch(bool),
}

impl CallbackAction {
    fn parse(data: &str) -> Option<Self> {
        match data {
            "today_report" => Some(Self::TodayReport),
            "last_10_reports" => Some(Self::LastTenReports),
            "get_all_data" => Some(Self::GetAllData),
            "cancel_dump" => Some(Self::CancelDump),
            "set_stretch_on" => Some(Self::SetStretch(true)),
            "set_stretch_off" => Some(Self::SetStretch(false)),
            _ => None,
        }
    }
}

fn cancel_keyboard() -> InlineKeyboard {
    InlineKeyboard::one_per_row(vec![InlineButton::new("❌ Cancel Upload", "cancel_dump")])
}

/// Bulk exports go out oldest-first; the portal answers newest-first.
fn oldest_first(mut records: Vec<AttendanceRecord>) -> Vec<AttendanceRecord> {
    records.reverse();
    records
}

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user_id = UserId(q.from.id.0 as i64);
    let chat_id = q.message.as_ref().map(|m| ChatId(m.chat.id.0));
    let message_id = q.message.as_ref().map(|m| MessageId(m.id.0));
    let data = q.data.clone().unwrap_or_default();

    let answer = |text: Option<&'static str>| {
        let messenger = state.messenger.clone();
        let cb_id = cb_id.clone();
        async move {
            let _ = messenger.answer_callback_query(&cb_id, text).await;
        }
    };

    if !state.cfg.is_user_allowed(Some(user_id)) {
        answer(Some("Unauthorized")).await;
        return Ok(());
    }

    let (Some(chat_id), Some(action)) = (chat_id, CallbackAction::parse(&data)) else {
        answer(None).await;
        return Ok(());
    };
    info!(user_id = user_id.0, ?action, "callback");

    match action {
        CallbackAction::CancelDump => {
            let text = match state.exports.cancel(user_id) {
                CancelOutcome::Requested => "Stopping upload...",
                CancelOutcome::NotFound => "No active upload found.",
            };
            answer(Some(text)).await;
        }

        CallbackAction::SetStretch(enabled) => {
            if let Err(e) = state.store.set_stretch(user_id, enabled).await {
                warn!(user_id = user_id.0, error = %e, "failed to save stretch setting");
                answer(Some("Could not save setting")).await;
                return Ok(());
            }
            answer(Some(if enabled {
                "Image stretching enabled!"
            } else {
                "Image stretching disabled!"
            }))
            .await;

            if let Some(message_id) = message_id {
                let _ = state
                    .messenger
                    .edit_text(
                        MessageRef {
                            chat_id,
                            message_id,
                        },
                        &format_settings_html(enabled),
                        ParseMode::Html,
                        Some(&settings_keyboard()),
                    )
                    .await;
            }
        }

        CallbackAction::TodayReport => {
            answer(None).await;
            send_latest(&state, chat_id, user_id, 1, "🔄 Fetching today's report...").await;
        }

        CallbackAction::LastTenReports => {
            answer(None).await;
            send_latest(&state, chat_id, user_id, 10, "🔄 Fetching last 10 reports...").await;
        }

        CallbackAction::GetAllData => {
            answer(None).await;
            start_bulk_export(state, chat_id, user_id).await;
        }
    }

    Ok(())
}

/// Fetch up to `limit` recent records and deliver them to the user's chat, newest-first.
async fn send_latest(state: &AppState, chat_id: ChatId, user_id: UserId, limit: u32, notice: &str) {
    let Some(token) = require_token(state, chat_id, user_id).await else {
        return;
    };
    reply_html(state, chat_id, notice).await;

    let records = match state.portal.attendance(&token, limit).await {
        Ok(r) => r,
        Err(e) => {
            report_portal_error(state, chat_id, user_id, &e, "❌ Error fetching data.").await;
            return;
        }
    };
    if records.is_empty() {
        reply_html(state, chat_id, "ℹ️ No records found.").await;
        return;
    }

    match send_reports(state, chat_id, user_id, &records).await {
        Ok(()) if records.len() > 1 => reply_html(state, chat_id, "✅ All reports sent.").await,
        Ok(()) => {}
        Err(e) => {
            warn!(user_id = user_id.0, error = %e, "report delivery failed");
            reply_html(state, chat_id, "❌ Error sending reports.").await;
        }
    }
}

/// Validate, fetch, and hand the bulk upload to its own task.
///
/// Updates for one chat are handled sequentially, so the upload must not run inline:
/// the Cancel button's callback would wait behind it.
async fn start_bulk_export(state: Arc<AppState>, chat_id: ChatId, user_id: UserId) {
    let Some(token) = require_token(&state, chat_id, user_id).await else {
        return;
    };
    let settings = state.store.get(user_id).await;
    let Some(dest) = settings
        .dump_destination
        .as_deref()
        .and_then(Destination::parse)
    else {
        reply_html(
            &state,
            chat_id,
            "⚠️ No dump channel set. Use /dump &lt;channel_id&gt; to configure it first.",
        )
        .await;
        return;
    };

    // Held from here on; every early return below releases it.
    let Ok(guard) = state.exports.claim(user_id) else {
        reply_html(
            &state,
            chat_id,
            "⚠️ An upload is already running. Please wait or cancel it.",
        )
        .await;
        return;
    };

    reply_html(&state, chat_id, "🔄 Fetching all records (last 10 years)...").await;
    let records = match state.portal.attendance(&token, ALL_RECORDS).await {
        Ok(r) => oldest_first(r),
        Err(e) => {
            report_portal_error(&state, chat_id, user_id, &e, "❌ Error fetching data.").await;
            return;
        }
    };
    if records.is_empty() {
        reply_html(&state, chat_id, "ℹ️ No records found.").await;
        return;
    }

    let started = Instant::now();
    let initial = snapshot(0, records.len(), started, started);
    let progress = match state
        .messenger
        .send_keyboard(
            chat_id,
            &render_progress_html(&initial),
            ParseMode::Html,
            &cancel_keyboard(),
        )
        .await
    {
        Ok(m) => m,
        Err(e) => {
            warn!(user_id = user_id.0, error = %e, "could not post progress message");
            reply_html(&state, chat_id, "❌ Error during bulk upload.").await;
            return;
        }
    };

    let total = records.len();
    let stretch = settings.stretch_images;
    tokio::spawn(async move {
        let sink = Arc::new(ProgressMessage::new(state.messenger.clone(), progress));
        let job = {
            let state = Arc::clone(&state);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                state
                    .exports
                    .run_claimed(guard, &records, &dest, stretch, &*sink)
                    .await
            })
        };
        let result = join_outcome(job.await, sink.completed(), total);
        finish_bulk_export(&state, chat_id, &sink, started, result).await;
    });
}

/// A panicked export still gets a terminal status instead of a stale progress message.
fn join_outcome(
    joined: std::result::Result<std::result::Result<ExportOutcome, ExportError>, JoinError>,
    completed: usize,
    total: usize,
) -> std::result::Result<ExportOutcome, ExportError> {
    joined.unwrap_or_else(|e| {
        error!(error = %e, completed, total, "export task died");
        Err(ExportError::Failed {
            completed,
            total,
            cause: Error::Transport(format!("export task died: {e}")),
        })
    })
}

async fn finish_bulk_export(
    state: &AppState,
    chat_id: ChatId,
    sink: &ProgressMessage,
    started: Instant,
    result: std::result::Result<ExportOutcome, ExportError>,
) {
    match result {
        Ok(ExportOutcome::Completed { total }) => {
            let done = snapshot(total, total, started, Instant::now());
            sink.replace(&render_done_html(&done)).await;
            reply_html(state, chat_id, "✅ Bulk upload complete!").await;
        }
        Ok(ExportOutcome::Cancelled { completed, total }) => {
            sink.replace(&render_cancelled_html(completed, total)).await;
        }
        Err(ExportError::AlreadyRunning) => {
            sink.replace("⚠️ An upload is already running. Please wait or cancel it.")
                .await;
        }
        Err(ExportError::EmptyInput) => {
            sink.replace("ℹ️ No records found.").await;
        }
        Err(ExportError::Failed {
            completed, total, ..
        }) => {
            sink.replace(&render_failed_html(completed, total)).await;
            reply_html(state, chat_id, "❌ Error during bulk upload.").await;
        }
    }
}

/// The status message of one bulk upload, edited in place.
struct ProgressMessage {
    messenger: Arc<dyn MessagingPort>,
    msg: MessageRef,
    completed: AtomicUsize,
}

impl ProgressMessage {
    fn new(messenger: Arc<dyn MessagingPort>, msg: MessageRef) -> Self {
        Self {
            messenger,
            msg,
            completed: AtomicUsize::new(0),
        }
    }

    /// Records done as of the last published snapshot.
    fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Terminal edit: drops the Cancel button.
    async fn replace(&self, html: &str) {
        if let Err(e) = self
            .messenger
            .edit_text(self.msg, html, ParseMode::Html, None)
            .await
        {
            warn!(error = %e, "final progress edit failed");
        }
    }
}

#[async_trait]
impl StatusSink for ProgressMessage {
    async fn publish(&self, progress: &ProgressSnapshot) -> Result<()> {
        self.completed.store(progress.completed, Ordering::Relaxed);
        self.messenger
            .edit_text(
                self.msg,
                &render_progress_html(progress),
                ParseMode::Html,
                Some(&cancel_keyboard()),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_callback() {
        assert_eq!(CallbackAction::parse("today_report"), Some(CallbackAction::TodayReport));
        assert_eq!(
            CallbackAction::parse("last_10_reports"),
            Some(CallbackAction::LastTenReports)
        );
        assert_eq!(CallbackAction::parse("get_all_data"), Some(CallbackAction::GetAllData));
        assert_eq!(CallbackAction::parse("cancel_dump"), Some(CallbackAction::CancelDump));
        assert_eq!(
            CallbackAction::parse("set_stretch_on"),
            Some(CallbackAction::SetStretch(true))
        );
        assert_eq!(
            CallbackAction::parse("set_stretch_off"),
            Some(CallbackAction::SetStretch(false))
        );
        assert_eq!(CallbackAction::parse("askuser:1:2"), None);
        assert_eq!(CallbackAction::parse(""), None);
    }

    #[test]
    fn bulk_order_is_reversed_portal_order() {
        let recs: Vec<AttendanceRecord> = ["2025-01-03", "2025-01-02", "2025-01-01"]
            .into_iter()
            .map(|d| AttendanceRecord {
                date: d.to_string(),
                ..Default::default()
            })
            .collect();
        let dates: Vec<String> = oldest_first(recs).into_iter().map(|r| r.date).collect();
        assert_eq!(dates, ["2025-01-01", "2025-01-02", "2025-01-03"]);
    }

    #[tokio::test]
    async fn panicked_export_becomes_a_failure_with_last_progress() {
        let joined = tokio::spawn(async {
            if true {
                panic!("boom");
            }
            Ok::<_, ExportError>(ExportOutcome::Completed { total: 5 })
        })
        .await;

        match join_outcome(joined, 2, 5) {
            Err(ExportError::Failed {
                completed, total, ..
            }) => assert_eq!((completed, total), (2, 5)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn finished_export_passes_through() {
        let joined =
            tokio::spawn(async { Ok::<_, ExportError>(ExportOutcome::Completed { total: 3 }) }).await;
        assert_eq!(
            join_outcome(joined, 3, 3).unwrap(),
            ExportOutcome::Completed { total: 3 }
        );
    }

    #[test]
    fn cancel_button_targets_cancel_dump() {
        let kb = cancel_keyboard();
        assert_eq!(kb.rows.len(), 1);
        assert_eq!(kb.rows[0][0].callback_data, "cancel_dump");
    }
}
