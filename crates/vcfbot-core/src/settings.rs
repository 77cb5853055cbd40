//! JSON-file persistence for per-session user settings.
//!
//! The whole document is a single JSON object keyed by session id. The store
//! keeps it in memory behind an async mutex and rewrites the file under that
//! lock on every mutation, so overlapping requests are applied one after the
//! other instead of overwriting each other.

use crate::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vcfbot_types::{SettingsUpdate, StorageStatus, UserSettings};

/// File-backed settings store.
pub struct SettingsStore {
    path: PathBuf,
    users: Mutex<BTreeMap<String, UserSettings>>,
}

impl SettingsStore {
    /// Open or create the document at the given path.
    ///
    /// An unreadable or malformed document is logged and treated as empty.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            std::fs::write(path, "{}")?;
            info!(target: "vcfbot::settings", "Created settings file at {}", path.display());
        }

        let users = load_document(path);
        debug!(target: "vcfbot::settings", "Loaded {} user records", users.len());

        Ok(Self {
            path: path.to_path_buf(),
            users: Mutex::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored record for an id, if any.
    pub async fn find_user(&self, phone_number: &str) -> Option<UserSettings> {
        self.users.lock().await.get(phone_number).cloned()
    }

    /// Create (or overwrite) the record for an id with default preferences.
    pub async fn create_user(&self, phone_number: &str) -> UserSettings {
        let mut users = self.users.lock().await;
        self.insert_defaults(&mut users, phone_number).await
    }

    /// Return the stored record, creating it first if absent.
    ///
    /// The boolean is true when a record was created.
    pub async fn ensure_user(&self, phone_number: &str) -> (UserSettings, bool) {
        let mut users = self.users.lock().await;
        if let Some(existing) = users.get(phone_number) {
            return (existing.clone(), false);
        }
        (self.insert_defaults(&mut users, phone_number).await, true)
    }

    async fn insert_defaults(
        &self,
        users: &mut BTreeMap<String, UserSettings>,
        phone_number: &str,
    ) -> UserSettings {
        let now = Utc::now();
        let mut record = UserSettings::defaults_for(phone_number);
        record.created_at = Some(now);
        record.updated_at = Some(now);
        users.insert(phone_number.to_string(), record.clone());
        self.flush(users).await;
        info!(target: "vcfbot::settings", "Created user record for {}", phone_number);
        record
    }

    /// Merge a partial update into an existing record.
    pub async fn update_user(
        &self,
        phone_number: &str,
        update: &SettingsUpdate,
    ) -> Option<UserSettings> {
        let mut users = self.users.lock().await;
        let record = users.get_mut(phone_number)?;
        record.apply(update);
        record.updated_at = Some(Utc::now());
        let updated = record.clone();
        self.flush(&users).await;
        Some(updated)
    }

    /// Every stored record, ordered by id.
    pub async fn find_all_users(&self) -> Vec<UserSettings> {
        self.users.lock().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.users.lock().await.len()
    }

    /// Stored record or default preferences. Never creates a record.
    pub async fn get_user_with_defaults(&self, phone_number: &str) -> UserSettings {
        self.find_user(phone_number)
            .await
            .unwrap_or_else(|| UserSettings::defaults_for(phone_number))
    }

    pub fn status(&self) -> StorageStatus {
        StorageStatus {
            storage_type: "file".to_string(),
            status: "active".to_string(),
        }
    }

    /// Rewrite the document. Failures are logged; memory stays authoritative.
    async fn flush(&self, users: &BTreeMap<String, UserSettings>) {
        let json = match serde_json::to_string_pretty(users) {
            Ok(json) => json,
            Err(e) => {
                error!(target: "vcfbot::settings", "Failed to serialize settings: {}", e);
                return;
            }
        };

        let tmp = self.path.with_extension("json.tmp");
        let result = async {
            tokio::fs::write(&tmp, json.as_bytes()).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            warn!(
                target: "vcfbot::settings",
                "Failed to write settings to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Parse the document, skipping records that do not deserialize.
fn load_document(path: &Path) -> BTreeMap<String, UserSettings> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(target: "vcfbot::settings", "Error reading settings {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };

    let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            error!(target: "vcfbot::settings", "Error parsing settings {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };

    let mut users = BTreeMap::new();
    for (id, mut value) in raw {
        // Older documents keep the id only as the map key.
        if let Some(obj) = value.as_object_mut() {
            obj.entry("phoneNumber")
                .or_insert_with(|| serde_json::Value::String(id.clone()));
        }
        match serde_json::from_value::<UserSettings>(value) {
            Ok(record) => {
                users.insert(id, record);
            }
            Err(e) => {
                warn!(target: "vcfbot::settings", "Skipping malformed record {}: {}", id, e);
            }
        }
    }
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SettingsStore {
        SettingsStore::open(&dir.path().join("data").join("users.json")).unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_empty_document() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.path().exists());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{}");
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_defaults_do_not_create_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let settings = store.get_user_with_defaults("22507123456").await;
        assert_eq!(settings.prefix, ".");
        assert!(settings.status_read_enabled);
        assert!(!settings.auto_react_enabled);
        assert!(store.find_user("22507123456").await.is_none());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_create_and_update_persist_to_disk() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.create_user("111").await;
        let updated = store
            .update_user(
                "111",
                &SettingsUpdate {
                    prefix: Some("!".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.prefix, "!");

        let reopened = SettingsStore::open(store.path()).unwrap();
        let record = reopened.find_user("111").await.unwrap();
        assert_eq!(record.prefix, "!");
        assert!(record.is_persisted());
    }

    #[tokio::test]
    async fn test_update_missing_user_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.update_user("nobody", &SettingsUpdate::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_user_is_create_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let (first, created) = store.ensure_user("111").await;
        assert!(created);
        let (second, created_again) = store.ensure_user("111").await;
        assert!(!created_again);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_malformed_document_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "not json").unwrap();

        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.count().await, 0);
        assert_eq!(store.get_user_with_defaults("111").await.prefix, ".");
    }

    #[tokio::test]
    async fn test_legacy_records_without_phone_number_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r##"{"111": {"sessionId": "111", "prefix": "#"}, "222": 5}"##,
        )
        .unwrap();

        let store = SettingsStore::open(&path).unwrap();
        let users = store.find_all_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].phone_number, "111");
        assert_eq!(users[0].prefix, "#");
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_authoritative() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        // A directory where the temp file should go makes every flush fail.
        std::fs::create_dir(store.path().with_extension("json.tmp")).unwrap();

        store.create_user("111").await;
        let updated = store
            .update_user(
                "111",
                &SettingsUpdate {
                    prefix: Some("!".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(updated.map(|u| u.prefix), Some("!".to_string()));
        assert_eq!(store.find_user("111").await.unwrap().prefix, "!");
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_ensure_creates_once_under_contention() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(open_store(&dir));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let (_, created) = store.ensure_user("111").await;
                    store
                        .update_user(
                            "111",
                            &SettingsUpdate {
                                prefix: Some("!".to_string()),
                                ..Default::default()
                            },
                        )
                        .await;
                    created
                })
            })
            .collect();

        let mut creations = 0;
        for task in tasks {
            if task.await.unwrap() {
                creations += 1;
            }
        }

        assert_eq!(creations, 1);
        assert_eq!(store.find_user("111").await.unwrap().prefix, "!");
    }

    #[tokio::test]
    async fn test_concurrent_creates_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(open_store(&dir));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create_user(&format!("user{}", i)).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let reopened = SettingsStore::open(store.path()).unwrap();
        assert_eq!(reopened.count().await, 20);
    }
}
