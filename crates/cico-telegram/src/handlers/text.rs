use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use cico_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    login::LoginInput,
};

use crate::router::AppState;

use super::{reply_html, send_profile};

/// Plain text only matters while the user is inside the `/login` wizard.
pub async fn handle_text(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    match state.logins.advance(user_id, text).await {
        LoginInput::NotInFlow => {}
        LoginInput::AskEmail => {
            reply_html(&state, chat_id, "📧 Please enter your email address:").await;
        }
        LoginInput::AskPassword => {
            reply_html(&state, chat_id, "🔑 Now please enter your password:").await;
        }
        LoginInput::Submit { email, password } => {
            reply_html(&state, chat_id, "🔄 Logging in...").await;

            let password_msg = MessageRef {
                chat_id,
                message_id: MessageId(msg.id.0),
            };
            if let Err(e) = state.messenger.delete_message(password_msg).await {
                warn!(user_id = user_id.0, error = %e, "could not delete password message");
            }

            complete_login(&state, chat_id, user_id, &email, &password).await;
        }
    }

    Ok(())
}

async fn complete_login(
    state: &AppState,
    chat_id: ChatId,
    user_id: UserId,
    email: &str,
    password: &str,
) {
    let token = match state.portal.login(email, password).await {
        Ok(t) => t,
        Err(Error::InvalidCredentials) => {
            reply_html(state, chat_id, "❌ Login failed: Invalid email or password.").await;
            return;
        }
        Err(e) => {
            warn!(user_id = user_id.0, error = %e, "login failed");
            reply_html(state, chat_id, &login_failure_html(&e)).await;
            return;
        }
    };

    if let Err(e) = state.store.set_token(user_id, &token).await {
        warn!(user_id = user_id.0, error = %e, "failed to persist token");
        reply_html(state, chat_id, "❌ Login worked but the session could not be saved.").await;
        return;
    }
    info!(user_id = user_id.0, "login succeeded");

    reply_html(
        state,
        chat_id,
        "✅ Login successful! You can now use /check and /attendance.",
    )
    .await;
    send_profile(state, chat_id, user_id, &token).await;
}

fn login_failure_html(err: &Error) -> String {
    match err {
        Error::Portal(detail) if detail.starts_with("login failed: ") => {
            let reason = detail.trim_start_matches("login failed: ");
            format!(
                "❌ Login failed: {}",
                cico_core::formatting::escape_html(reason)
            )
        }
        _ => "❌ An error occurred during login. Please try again.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_rejections_show_the_portal_message() {
        let err = Error::Portal("login failed: Account <locked>".to_string());
        assert_eq!(
            login_failure_html(&err),
            "❌ Login failed: Account &lt;locked&gt;"
        );
    }

    #[test]
    fn transport_failures_stay_generic() {
        let err = Error::Portal("request error: timed out".to_string());
        assert_eq!(
            login_failure_html(&err),
            "❌ An error occurred during login. Please try again."
        );
    }
}
