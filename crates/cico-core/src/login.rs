//! Two-step `/login` wizard state (email, then password), keyed by user.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::domain::UserId;

#[derive(Clone, Debug, PartialEq, Eq)]
enum LoginStep {
    Email,
    Password { email: String },
}

/// What the handler should do with a text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginInput {
    /// The user is not logging in; treat the text normally.
    NotInFlow,
    /// Email captured (or blank input ignored); prompt for the next value.
    AskEmail,
    AskPassword,
    /// Both values captured. The wizard entry is already gone.
    Submit { email: String, password: String },
}

#[derive(Default)]
pub struct LoginSessions {
    inner: Mutex<HashMap<UserId, LoginStep>>,
}

impl LoginSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the wizard for `user`.
    pub async fn begin(&self, user: UserId) {
        self.inner.lock().await.insert(user, LoginStep::Email);
    }

    pub async fn abort(&self, user: UserId) -> bool {
        self.inner.lock().await.remove(&user).is_some()
    }

    pub async fn advance(&self, user: UserId, text: &str) -> LoginInput {
        let value = text.trim();
        let mut map = self.inner.lock().await;
        let Some(step) = map.get(&user).cloned() else {
            return LoginInput::NotInFlow;
        };

        match step {
            LoginStep::Email if value.is_empty() => LoginInput::AskEmail,
            LoginStep::Email => {
                map.insert(
                    user,
                    LoginStep::Password {
                        email: value.to_string(),
                    },
                );
                LoginInput::AskPassword
            }
            LoginStep::Password { .. } if value.is_empty() => LoginInput::AskPassword,
            LoginStep::Password { email } => {
                map.remove(&user);
                LoginInput::Submit {
                    email,
                    password: value.to_string(),
                }
            }
        }
    }
}
