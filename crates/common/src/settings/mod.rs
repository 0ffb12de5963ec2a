//! User settings
//!
//! The backend holds the authoritative copy; the local store keeps the last
//! document seen so settings survive a backend outage.

use crate::backend::{rpc, Backend};
use crate::errors::Result;
use crate::storage::{self, keys, LocalStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub theme: String,
    pub language: String,
    pub notifications_enabled: bool,
    /// Keys this version does not know about, kept on write-back
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            language: "en".to_string(),
            notifications_enabled: true,
            extra: Map::new(),
        }
    }
}

/// Settings for `user_id`: backend first, then the local copy, then defaults
pub async fn load(backend: &dyn Backend, store: &dyn LocalStore, user_id: &str) -> UserSettings {
    match rpc::user_settings(backend, user_id).await {
        Ok(Value::Null) => {}
        Ok(value) => match serde_json::from_value::<UserSettings>(value) {
            Ok(settings) => {
                cache(store, user_id, &settings).await;
                return settings;
            }
            Err(e) => warn!(user_id = user_id, error = %e, "Unreadable settings document"),
        },
        Err(e) => warn!(user_id = user_id, error = %e, "Settings lookup failed; using local copy"),
    }

    match storage::get_json(store, &keys::user_settings(user_id)).await {
        Some(settings) => settings,
        None => {
            debug!(user_id = user_id, "No stored settings; using defaults");
            UserSettings::default()
        }
    }
}

/// Write settings to the backend, then refresh the local copy in the background
pub async fn save(
    backend: &dyn Backend,
    store: Arc<dyn LocalStore>,
    user_id: &str,
    settings: &UserSettings,
) -> Result<()> {
    let document = serde_json::to_value(settings)?;
    rpc::update_user_settings(backend, user_id, &document).await?;

    let settings = settings.clone();
    let user_id = user_id.to_string();
    tokio::spawn(async move {
        cache(store.as_ref(), &user_id, &settings).await;
    });
    Ok(())
}

async fn cache(store: &dyn LocalStore, user_id: &str, settings: &UserSettings) {
    if let Err(e) = storage::set_json(store, &keys::user_settings(user_id), settings).await {
        debug!(error = %e, "Failed to cache settings locally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_backend_settings_win() {
        let backend = MockBackend::new().with_rpc(
            rpc::GET_USER_SETTINGS,
            json!({ "theme": "dark", "font_scale": 1.2 }),
        );
        let store = MemoryStore::new();

        let settings = load(&backend, &store, "u1").await;

        assert_eq!(settings.theme, "dark");
        assert_eq!(settings.language, "en");
        assert_eq!(settings.extra["font_scale"], json!(1.2));
        let cached: Option<UserSettings> = storage::get_json(&store, &keys::user_settings("u1")).await;
        assert_eq!(cached, Some(settings));
    }

    #[tokio::test]
    async fn test_falls_back_to_local_copy() {
        let backend = MockBackend::new();
        backend.fail_rpc(rpc::GET_USER_SETTINGS, 1);
        let store = MemoryStore::new();
        store.set(&keys::user_settings("u1"), r#"{"language":"sw"}"#).await.unwrap();

        let settings = load(&backend, &store, "u1").await;

        assert_eq!(settings.language, "sw");
        assert_eq!(settings.theme, "system");
    }

    #[tokio::test]
    async fn test_local_copy_is_per_user() {
        let store = MemoryStore::new();
        let first = MockBackend::new().with_rpc(
            rpc::GET_USER_SETTINGS,
            json!({ "theme": "dark", "language": "fr" }),
        );
        assert_eq!(load(&first, &store, "user-a").await.theme, "dark");

        let second = MockBackend::new();
        second.fail_rpc(rpc::GET_USER_SETTINGS, 1);
        let settings = load(&second, &store, "user-b").await;

        assert_eq!(settings, UserSettings::default());
        let kept: Option<UserSettings> = storage::get_json(&store, &keys::user_settings("user-a")).await;
        assert_eq!(kept.map(|s| s.language).as_deref(), Some("fr"));
    }

    #[tokio::test]
    async fn test_defaults_when_nothing_stored() {
        let backend = MockBackend::new().with_rpc(rpc::GET_USER_SETTINGS, Value::Null);
        let store = MemoryStore::new();
        store.set(&keys::user_settings("u1"), "not json").await.unwrap();

        assert_eq!(load(&backend, &store, "u1").await, UserSettings::default());
    }

    #[tokio::test]
    async fn test_save_updates_backend_and_cache() {
        let backend = MockBackend::new().with_rpc(rpc::UPDATE_USER_SETTINGS, Value::Null);
        let store = Arc::new(MemoryStore::new());
        let settings = UserSettings { theme: "light".into(), ..UserSettings::default() };

        save(&backend, store.clone(), "u1", &settings).await.unwrap();

        let calls = backend.rpc_calls();
        assert_eq!(calls[0].0, rpc::UPDATE_USER_SETTINGS);
        assert_eq!(calls[0].1["p_settings"]["theme"], "light");

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let cached: Option<UserSettings> = storage::get_json(store.as_ref(), &keys::user_settings("u1")).await;
                if cached.as_ref() == Some(&settings) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cache_alone() {
        let backend = MockBackend::new();
        let store = Arc::new(MemoryStore::new());

        assert!(save(&backend, store.clone(), "u1", &UserSettings::default()).await.is_err());
        assert_eq!(store.get(&keys::user_settings("u1")).await.unwrap(), None);
    }
}
