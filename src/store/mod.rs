// ABOUTME: Durable JSON-backed state store for settings, templates, bridges and the PIN hash

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::{BridgeRecord, NotificationChannel};

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunable server settings persisted in `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: u32,
    /// Delay before an undismissed web notification falls back to Telegram.
    pub telegram_timeout_secs: u64,
    /// How often bridge agents must report before being considered stale.
    pub report_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<i64>,
    /// Channels applied to server-detected bell/activity notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_channels: Option<std::collections::BTreeSet<NotificationChannel>>,
    /// Unknown settings from newer versions survive a load/save round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            telegram_timeout_secs: 60,
            report_interval_secs: 5,
            container_name_prefix: None,
            telegram_chat_id: None,
            notification_channels: None,
            extra: BTreeMap::new(),
        }
    }
}

/// A named container template backing `POST /containers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTemplate {
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// host path -> container path bind mounts
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplatesFile {
    version: u32,
    templates: Vec<ContainerTemplate>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BridgesFile {
    version: u32,
    bridges: Vec<BridgeRecord>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

/// Stored PIN credential: scrypt hash plus its salt, both base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinFile {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for PinFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            pin_hash: None,
            salt: None,
            extra: BTreeMap::new(),
        }
    }
}

/// All writes funnel through one mutex so concurrent handlers never interleave
/// a read-modify-write on the same file.
pub struct StateStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn load_settings(&self) -> Settings {
        self.load_or_default("settings.json")
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.save("settings.json", settings)
    }

    pub fn load_templates(&self) -> Vec<ContainerTemplate> {
        let file: TemplatesFile = self.load_or(
            "templates.json",
            TemplatesFile {
                version: STORE_VERSION,
                templates: builtin_templates(),
                extra: BTreeMap::new(),
            },
        );
        file.templates
    }

    pub fn save_templates(&self, templates: &[ContainerTemplate]) -> Result<(), StoreError> {
        let existing: TemplatesFile = self.load_or(
            "templates.json",
            TemplatesFile {
                version: STORE_VERSION,
                templates: Vec::new(),
                extra: BTreeMap::new(),
            },
        );
        self.save(
            "templates.json",
            &TemplatesFile {
                version: existing.version,
                templates: templates.to_vec(),
                extra: existing.extra,
            },
        )
    }

    pub fn load_bridges(&self) -> Vec<BridgeRecord> {
        let file: BridgesFile = self.load_or(
            "bridges.json",
            BridgesFile {
                version: STORE_VERSION,
                bridges: Vec::new(),
                extra: BTreeMap::new(),
            },
        );
        file.bridges
    }

    pub fn save_bridges(&self, bridges: &[BridgeRecord]) -> Result<(), StoreError> {
        let existing: BridgesFile = self.load_or(
            "bridges.json",
            BridgesFile {
                version: STORE_VERSION,
                bridges: Vec::new(),
                extra: BTreeMap::new(),
            },
        );
        self.save(
            "bridges.json",
            &BridgesFile {
                version: existing.version,
                bridges: bridges.to_vec(),
                extra: existing.extra,
            },
        )
    }

    pub fn load_pin(&self) -> PinFile {
        self.load_or_default("pin.json")
    }

    pub fn save_pin(&self, pin: &PinFile) -> Result<(), StoreError> {
        self.save("pin.json", pin)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        self.load_or(name, T::default())
    }

    fn load_or<T: DeserializeOwned>(&self, name: &str, fallback: T) -> T {
        let path = self.data_dir.join(name);
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => value,
                Err(e) => {
                    warn!("failed to parse {:?}, using defaults: {}", path, e);
                    fallback
                }
            },
            Err(_) => fallback,
        }
    }

    /// Atomic replace: write to a temp file in the same directory, then rename.
    fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.data_dir.join(name);
        let json =
            serde_json::to_string_pretty(value).map_err(|source| StoreError::Encode {
                path: path.clone(),
                source,
            })?;
        let tmp = tempfile::NamedTempFile::new_in(&self.data_dir).map_err(|source| {
            StoreError::Io {
                path: self.data_dir.clone(),
                source,
            }
        })?;
        fs::write(tmp.path(), json).map_err(|source| StoreError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

fn builtin_templates() -> Vec<ContainerTemplate> {
    vec![ContainerTemplate {
        id: "basic-dev".to_string(),
        name: "Basic development".to_string(),
        image: "ubuntu:24.04".to_string(),
        env: BTreeMap::new(),
        volumes: BTreeMap::new(),
        description: "Plain shell with tmux installed".to_string(),
        extra: BTreeMap::new(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn settings_roundtrip_preserves_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let raw = r#"{"version":1,"telegramTimeoutSecs":30,"reportIntervalSecs":5,"futureKnob":{"a":1}}"#;
        fs::write(dir.path().join("settings.json"), raw).unwrap();

        let mut settings = store.load_settings();
        assert_eq!(settings.telegram_timeout_secs, 30);
        assert_eq!(
            settings.extra.get("futureKnob"),
            Some(&serde_json::json!({"a": 1}))
        );

        settings.telegram_timeout_secs = 45;
        store.save_settings(&settings).unwrap();

        let reloaded = store.load_settings();
        assert_eq!(reloaded.telegram_timeout_secs, 45);
        assert_eq!(
            reloaded.extra.get("futureKnob"),
            Some(&serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn bridges_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert!(store.load_bridges().is_empty());

        let record = BridgeRecord::new("pi", "hash".to_string());
        store.save_bridges(&[record.clone()]).unwrap();

        let loaded = store.load_bridges();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
        assert_eq!(loaded[0].token_hash, "hash");
        assert!(loaded[0].enabled);
    }

    #[test]
    fn pin_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let pin = store.load_pin();
        assert!(pin.pin_hash.is_none());
        assert!(pin.salt.is_none());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("settings.json"), "{not json").unwrap();
        let settings = store.load_settings();
        assert_eq!(settings.telegram_timeout_secs, 60);
    }

    #[test]
    fn builtin_template_present_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let templates = store.load_templates();
        assert!(templates.iter().any(|t| t.id == "basic-dev"));
    }
}
