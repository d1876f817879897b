use std::{env, path::PathBuf, time::Duration};

use crate::{domain::UserId, errors::Error, Result};

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub portal_base_url: String,
    pub store_path: PathBuf,
    pub allowed_users: Vec<i64>,

    // Network
    pub http_timeout: Duration,

    // Bulk export
    pub export_delay: Duration,
    pub export_progress_every: usize,
    pub send_max_attempts: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        // A missing .env is fine; real env vars always win.
        let _ = dotenvy::dotenv();

        let bot_token = env_str("BOT_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let portal_base_url = env_str("BASE_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::Config("BASE_URL environment variable is required".to_string()))?;

        let store_path = PathBuf::from(env_str("DB_PATH").unwrap_or("database.json".to_string()));
        let allowed_users = parse_csv_i64(env_str("ALLOWED_USERS"));

        let http_timeout = Duration::from_millis(env_u64("HTTP_TIMEOUT_MS").unwrap_or(15_000));

        let export_delay = Duration::from_millis(env_u64("EXPORT_DELAY_MS").unwrap_or(1_000));
        let export_progress_every = env_usize("EXPORT_PROGRESS_EVERY").unwrap_or(5).max(1);
        let send_max_attempts = env_u32("SEND_MAX_ATTEMPTS").unwrap_or(3).max(1);

        Ok(Self {
            bot_token,
            portal_base_url,
            store_path,
            allowed_users,
            http_timeout,
            export_delay,
            export_progress_every,
            send_max_attempts,
        })
    }

    /// An empty allow-list leaves the bot open to everyone.
    pub fn is_user_allowed(&self, user_id: Option<UserId>) -> bool {
        let Some(user_id) = user_id else {
            return false;
        };
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id.0)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
