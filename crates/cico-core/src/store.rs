//! Per-user settings persisted in a single JSON file keyed by user id.
//!
//! Older versions stored a bare token string per user; those entries are read as
//! `{ token, stretch: true }` and rewritten in object form on the next update.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{domain::UserId, Result};

/// Canonical view of a user's settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSettings {
    pub auth_token: Option<String>,
    pub stretch_images: bool,
    pub dump_destination: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            stretch_images: true,
            dump_destination: None,
        }
    }
}

/// On-disk object shape (field names kept compatible with existing files).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSettings {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    stretch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dump_channel: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Legacy(String),
    Current(StoredSettings),
}

impl From<StoredEntry> for UserSettings {
    fn from(entry: StoredEntry) -> Self {
        match entry {
            StoredEntry::Legacy(token) => Self {
                auth_token: Some(token),
                ..Self::default()
            },
            StoredEntry::Current(s) => Self {
                auth_token: s.token,
                stretch_images: s.stretch != Some(false),
                dump_destination: s.dump_channel,
            },
        }
    }
}

impl From<&UserSettings> for StoredSettings {
    fn from(s: &UserSettings) -> Self {
        Self {
            token: s.auth_token.clone(),
            stretch: Some(s.stretch_images),
            dump_channel: s.dump_destination.clone(),
        }
    }
}

/// File-backed settings store.
///
/// All read-modify-write cycles go through one async mutex, so concurrent handlers
/// never lose each other's updates.
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads never fail: an unreadable file yields defaults.
    pub async fn get(&self, user: UserId) -> UserSettings {
        let _guard = self.lock.lock().await;
        match load_db(&self.path) {
            Ok(db) => settings_from(&db, user),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "settings file unreadable, using defaults");
                UserSettings::default()
            }
        }
    }

    pub async fn set_token(&self, user: UserId, token: &str) -> Result<()> {
        self.update(user, |s| s.auth_token = Some(token.to_string()))
            .await
    }

    pub async fn clear_token(&self, user: UserId) -> Result<()> {
        self.update(user, |s| s.auth_token = None).await
    }

    pub async fn set_stretch(&self, user: UserId, enabled: bool) -> Result<()> {
        self.update(user, |s| s.stretch_images = enabled).await
    }

    pub async fn set_dump_destination(&self, user: UserId, destination: &str) -> Result<()> {
        self.update(user, |s| s.dump_destination = Some(destination.to_string()))
            .await
    }

    async fn update(&self, user: UserId, apply: impl FnOnce(&mut UserSettings)) -> Result<()> {
        let _guard = self.lock.lock().await;
        // A file that exists but does not parse is left alone rather than overwritten.
        let mut db = load_db(&self.path)?;
        let mut settings = settings_from(&db, user);
        apply(&mut settings);
        db.insert(
            user.0.to_string(),
            serde_json::to_value(StoredSettings::from(&settings))?,
        );
        save_db(&self.path, &db)
    }
}

fn settings_from(db: &BTreeMap<String, Value>, user: UserId) -> UserSettings {
    db.get(&user.0.to_string())
        .cloned()
        .and_then(|v| serde_json::from_value::<StoredEntry>(v).ok())
        .map(UserSettings::from)
        .unwrap_or_default()
}

fn load_db(path: &Path) -> Result<BTreeMap<String, Value>> {
    let txt = match fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if txt.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn save_db(path: &Path, db: &BTreeMap<String, Value>) -> Result<()> {
    let txt = serde_json::to_string_pretty(db)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, txt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> SettingsStore {
        let path = std::env::temp_dir().join(format!(
            "cico-store-{}-{name}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        SettingsStore::new(path)
    }

    #[tokio::test]
    async fn legacy_string_entry_reads_as_token_with_stretch() {
        let store = temp_store("legacy");
        fs::write(store.path(), r#"{ "42": "tok123" }"#).unwrap();

        let s = store.get(UserId(42)).await;
        assert_eq!(
            s,
            UserSettings {
                auth_token: Some("tok123".to_string()),
                stretch_images: true,
                dump_destination: None,
            }
        );

        let _ = fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn updating_legacy_entry_migrates_to_object_shape() {
        let store = temp_store("migrate");
        fs::write(store.path(), r#"{ "42": "tok123", "7": "other" }"#).unwrap();

        store.set_stretch(UserId(42), false).await.unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["42"]["token"], "tok123");
        assert_eq!(raw["42"]["stretch"], false);
        assert_eq!(raw["7"], "other");

        let s = store.get(UserId(42)).await;
        assert!(!s.stretch_images);
        assert_eq!(s.auth_token.as_deref(), Some("tok123"));

        let _ = fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn missing_user_and_missing_file_use_defaults() {
        let store = temp_store("missing");
        assert_eq!(store.get(UserId(1)).await, UserSettings::default());
        assert!(store.get(UserId(1)).await.stretch_images);
    }

    #[tokio::test]
    async fn token_and_dump_destination_round_trip() {
        let store = temp_store("roundtrip");
        store.set_token(UserId(5), "abc").await.unwrap();
        store
            .set_dump_destination(UserId(5), "-1001234567890")
            .await
            .unwrap();

        let s = store.get(UserId(5)).await;
        assert_eq!(s.auth_token.as_deref(), Some("abc"));
        assert_eq!(s.dump_destination.as_deref(), Some("-1001234567890"));
        assert!(s.stretch_images);

        store.clear_token(UserId(5)).await.unwrap();
        let s = store.get(UserId(5)).await;
        assert_eq!(s.auth_token, None);
        assert_eq!(s.dump_destination.as_deref(), Some("-1001234567890"));

        let _ = fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let store = temp_store("corrupt");
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.get(UserId(1)).await, UserSettings::default());
        let _ = fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn corrupt_file_is_not_overwritten_by_updates() {
        let store = temp_store("corrupt-update");
        let truncated = r#"{ "1": {"token":"a","stretch":true}, "2": {"token":"b"} ,"#;
        fs::write(store.path(), truncated).unwrap();

        let err = store.set_stretch(UserId(1), false).await.unwrap_err();
        assert!(matches!(err, crate::errors::Error::Json(_)));
        assert!(store.clear_token(UserId(2)).await.is_err());

        assert_eq!(fs::read_to_string(store.path()).unwrap(), truncated);
        let _ = fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn empty_file_accepts_updates() {
        let store = temp_store("empty");
        fs::write(store.path(), "  \n").unwrap();

        store.set_token(UserId(3), "tok").await.unwrap();
        assert_eq!(store.get(UserId(3)).await.auth_token.as_deref(), Some("tok"));
        let _ = fs::remove_file(store.path());
    }
}
