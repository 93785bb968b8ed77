//! The hub's persistent settings document (spec.md §3, §4.3).
//!
//! Settings live as one `serde_json::Value` object behind a
//! [`LockWithTimeout`], addressed by dotted/segmented paths (`"packages.foo.enabled"`
//! or `["packages", "foo", "enabled"]`). Every mutating call autosaves to
//! disk, in the same "mutable document behind a lock, autosaved to disk"
//! shape the source's `StatePersistence` gives `AppState` — written here as
//! plain JSON rather than encrypted TOML, since settings are not secrets
//! and need to be hand editable by an operator between hub restarts. The
//! temp-then-rename write below is not something `StatePersistence` does;
//! it is this crate's own addition for crash-safety.

use std::path::{Path, PathBuf};

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use dusa_collection_utils::log;
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::error::SamError;

/// A settings path: either `"a.b.c"` or `["a", "b", "c"]`. Segments never
/// contain a literal `.`, so a dotted string always round-trips through
/// this split.
#[derive(Debug, Clone)]
pub struct SettingsPath(Vec<String>);

impl SettingsPath {
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for SettingsPath {
    fn from(value: &str) -> Self {
        SettingsPath(value.split('.').filter(|s| !s.is_empty()).map(String::from).collect())
    }
}

impl From<String> for SettingsPath {
    fn from(value: String) -> Self {
        SettingsPath::from(value.as_str())
    }
}

impl From<&[&str]> for SettingsPath {
    fn from(value: &[&str]) -> Self {
        SettingsPath(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for SettingsPath {
    fn from(value: [&str; N]) -> Self {
        SettingsPath(value.iter().map(|s| s.to_string()).collect())
    }
}

/// The defaults seeded under `packages.<name>` the first time a node is
/// known to the hub, per spec.md §4.2: `installed=false, persistent=false,
/// mandatory=false` unless overridden (the hub's own entry overrides all
/// three to `true`).
pub fn default_package_entry(installed: bool, persistent: bool, mandatory: bool) -> Value {
    json!({
        "version": "1.0.0",
        "development": false,
        "installed": installed,
        "enabled": true,
        "persistent": persistent,
        "mandatory": mandatory,
        "link": "",
        "settings": {},
    })
}

/// The JSON document backing the hub's settings store, plus its on-disk
/// location and an autosave switch.
#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
    document: LockWithTimeout<Value>,
}

impl SettingsStore {
    /// Loads `path` if it exists and is non-empty, otherwise starts from an
    /// empty object (spec.md §4.2: "if missing or empty, seed
    /// `packages.<hubName>`" — a zero-byte file is treated the same as no
    /// file at all, not as a parse failure).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SamError> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let raw = fs::read(&path).await?;
            if raw.is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            Value::Object(Map::new())
        };
        Ok(SettingsStore { path, document: LockWithTimeout::new(document) })
    }

    /// A handle backed by the same in-memory document with no file behind
    /// it; used by tests that do not care about persistence.
    pub fn in_memory() -> Self {
        SettingsStore { path: PathBuf::new(), document: LockWithTimeout::new(Value::Object(Map::new())) }
    }

    /// Reads the value at `path`, or `None` if any segment is absent.
    pub async fn get(&self, path: impl Into<SettingsPath>) -> Result<Option<Value>, SamError> {
        let path = path.into();
        let document = self.document.try_read().await?;
        Ok(walk(&document, path.segments()).cloned())
    }

    /// Writes `value` at `path`, creating intermediate objects as needed,
    /// then autosaves.
    pub async fn set(&self, path: impl Into<SettingsPath>, value: Value) -> Result<(), SamError> {
        let path = path.into();
        {
            let mut document = self.document.try_write().await?;
            let slot = walk_mut(&mut document, path.segments())?;
            *slot = value;
        }
        self.save().await
    }

    /// Removes the value at `path` if present, then autosaves. A no-op if
    /// the path does not resolve.
    pub async fn unset(&self, path: impl Into<SettingsPath>) -> Result<(), SamError> {
        let path = path.into();
        {
            let mut document = self.document.try_write().await?;
            if let Some((parent, last)) = path.segments().split_last_checked() {
                if let Some(Value::Object(map)) = walk_mut_opt(&mut document, parent) {
                    map.remove(last);
                }
            }
        }
        self.save().await
    }

    /// Appends `value` to the array at `path`, creating an empty array
    /// first if the path is absent, then autosaves.
    pub async fn append(&self, path: impl Into<SettingsPath>, value: Value) -> Result<(), SamError> {
        let path = path.into();
        {
            let mut document = self.document.try_write().await?;
            let slot = walk_mut(&mut document, path.segments())?;
            match slot {
                Value::Array(arr) => arr.push(value),
                Value::Null => *slot = Value::Array(vec![value]),
                other => {
                    return Err(SamError::storage(format!(
                        "cannot append to non-array value at \"{}\": {other}",
                        path.segments().join(".")
                    )))
                }
            }
        }
        self.save().await
    }

    /// Pops the last element off the array at `path`, then autosaves.
    pub async fn pop(&self, path: impl Into<SettingsPath>) -> Result<Option<Value>, SamError> {
        let path = path.into();
        let popped = {
            let mut document = self.document.try_write().await?;
            let slot = walk_mut(&mut document, path.segments())?;
            match slot {
                Value::Array(arr) => arr.pop(),
                Value::Null => None,
                other => {
                    return Err(SamError::storage(format!(
                        "cannot pop from non-array value at \"{}\": {other}",
                        path.segments().join(".")
                    )))
                }
            }
        };
        self.save().await?;
        Ok(popped)
    }

    /// Replaces the value at `path` with an empty object, then autosaves.
    pub async fn empty(&self, path: impl Into<SettingsPath>) -> Result<(), SamError> {
        self.set(path, Value::Object(Map::new())).await
    }

    /// A deep copy of the whole document.
    pub async fn to_object(&self) -> Result<Value, SamError> {
        let document = self.document.try_read().await?;
        Ok(document.clone())
    }

    /// Flushes the document to disk via a temp-then-rename write, keeping
    /// the on-disk file intact if the process dies mid-write.
    pub async fn save(&self) -> Result<(), SamError> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let document = self.document.try_read().await?;
        let serialized = serde_json::to_vec_pretty(&*document)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &serialized).await?;
        fs::rename(&tmp_path, &self.path).await?;

        log!(LogLevel::Trace, "settings saved to {:?}", self.path);
        Ok(())
    }

    /// Re-reads the document from disk, discarding in-memory changes.
    pub async fn reload(&self) -> Result<(), SamError> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = fs::read(&self.path).await?;
        let parsed: Value = serde_json::from_slice(&raw)?;
        let mut document = self.document.try_write().await?;
        *document = parsed;
        Ok(())
    }
}

fn walk<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn walk_mut<'a>(value: &'a mut Value, segments: &[String]) -> Result<&'a mut Value, SamError> {
    let mut current = value;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().expect("just normalized to an object");
        current = map.entry(segment.clone()).or_insert(Value::Null);
    }
    Ok(current)
}

fn walk_mut_opt<'a>(value: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

trait SplitLastChecked {
    fn split_last_checked(&self) -> Option<(&[String], &String)>;
}

impl SplitLastChecked for [String] {
    fn split_last_checked(&self) -> Option<(&[String], &String)> {
        self.split_last().map(|(last, rest)| (rest, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SettingsStore::in_memory();
        store.set("packages.alice.enabled", json!(true)).await.unwrap();
        assert_eq!(store.get("packages.alice.enabled").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn get_missing_path_is_none() {
        let store = SettingsStore::in_memory();
        assert_eq!(store.get("packages.missing.enabled").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unset_removes_leaf() {
        let store = SettingsStore::in_memory();
        store.set("packages.alice.enabled", json!(true)).await.unwrap();
        store.unset("packages.alice.enabled").await.unwrap();
        assert_eq!(store.get("packages.alice.enabled").await.unwrap(), None);
        assert_eq!(store.get("packages.alice").await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn append_and_pop_on_array() {
        let store = SettingsStore::in_memory();
        store.append("packages.alice.settings.tags", json!("a")).await.unwrap();
        store.append("packages.alice.settings.tags", json!("b")).await.unwrap();
        assert_eq!(
            store.get("packages.alice.settings.tags").await.unwrap(),
            Some(json!(["a", "b"]))
        );
        let popped = store.pop("packages.alice.settings.tags").await.unwrap();
        assert_eq!(popped, Some(json!("b")));
    }

    #[tokio::test]
    async fn empty_replaces_with_object() {
        let store = SettingsStore::in_memory();
        store.set("packages.alice.settings", json!({"a": 1})).await.unwrap();
        store.empty("packages.alice.settings").await.unwrap();
        assert_eq!(store.get("packages.alice.settings").await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn save_and_load_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SamCoreSettings.json");

        let store = SettingsStore::load(&path).await.unwrap();
        store.set("packages.alice", default_package_entry(false, false, false)).await.unwrap();

        let reloaded = SettingsStore::load(&path).await.unwrap();
        assert_eq!(
            reloaded.get("packages.alice.version").await.unwrap(),
            Some(json!("1.0.0"))
        );
    }
}
