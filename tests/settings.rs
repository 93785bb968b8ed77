//! Settings-store behavior at the level an operator would actually see:
//! surviving a hub restart, and per-node isolation under `packages.*`.

use samcore::settings::{default_package_entry, SettingsStore};
use serde_json::json;

#[tokio::test]
async fn settings_survive_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SamCoreSettings.json");

    {
        let store = SettingsStore::load(&path).await.unwrap();
        store.set("packages.alice", default_package_entry(false, false, false)).await.unwrap();
        store.set("packages.alice.settings", json!({"theme": "dark"})).await.unwrap();
    }

    let reopened = SettingsStore::load(&path).await.unwrap();
    assert_eq!(reopened.get("packages.alice.settings").await.unwrap(), Some(json!({"theme": "dark"})));
    assert_eq!(reopened.get("packages.alice.installed").await.unwrap(), Some(json!(false)));
}

#[tokio::test]
async fn each_node_gets_its_own_settings_subtree() {
    let store = SettingsStore::in_memory();
    store.set("packages.alice", default_package_entry(false, false, false)).await.unwrap();
    store.set("packages.bob", default_package_entry(false, false, false)).await.unwrap();

    store.set("packages.alice.settings", json!({"theme": "dark"})).await.unwrap();
    store.set("packages.bob.settings", json!({"theme": "light"})).await.unwrap();

    assert_eq!(store.get("packages.alice.settings").await.unwrap(), Some(json!({"theme": "dark"})));
    assert_eq!(store.get("packages.bob.settings").await.unwrap(), Some(json!({"theme": "light"})));
}

#[tokio::test]
async fn a_never_written_path_resolves_to_none_not_an_error() {
    let store = SettingsStore::in_memory();
    assert_eq!(store.get("packages.ghost.settings").await.unwrap(), None);
}
