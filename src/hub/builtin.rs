//! The hub's built-in API surface (spec.md §4.3 table).
//!
//! `nodeInit` and `greenLight` are handled by `dispatch` directly since they
//! carry hub-lifecycle side effects (registry mutation, reading the
//! readiness flag); everything in [`BUILTIN_API_CALLS`] below is a plain
//! request/response handler invoked uniformly through [`invoke`].

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::log;
use serde_json::{json, Value};

use super::Hub;
use crate::error::SamError;
use crate::packet::Packet;

/// The closed set of built-in calls dispatch rule 3 recognizes, excluding
/// `nodeInit`/`greenLight` which dispatch handles before reaching here.
pub const BUILTIN_API_CALLS: &[&str] = &[
    "helloWorld",
    "doesNodeExist",
    "getUsername",
    "setUsername",
    "getSettings",
    "setSettings",
    "message",
];

pub fn is_builtin(api_call: &str) -> bool {
    BUILTIN_API_CALLS.contains(&api_call)
}

/// Runs the built-in named by `packet.api_call` and returns the fully
/// formed reply (spec.md §4.3: "the handler may return or returnError").
pub async fn invoke(hub: &Hub, packet: &Packet) -> Packet {
    let mut reply = packet.reply();
    let outcome = match packet.api_call.as_str() {
        "helloWorld" => hello_world(packet),
        "doesNodeExist" => does_node_exist(hub, packet).await,
        "getUsername" => get_username(hub).await,
        "setUsername" => set_username(hub, packet).await,
        "getSettings" => get_settings(hub, packet).await,
        "setSettings" => set_settings(hub, packet).await,
        "message" => {
            log_message(packet);
            Ok(Value::Null)
        }
        other => Err(SamError::protocol(format!("\"{other}\" is not a recognized built-in apiCall"))),
    };

    match outcome {
        Ok(result) => {
            reply.result = result;
            reply.status = true;
        }
        Err(err) => reply.mark_error(err.message()),
    }
    reply
}

fn hello_world(packet: &Packet) -> Result<Value, SamError> {
    let text = packet.arg_str("text")?;
    Ok(json!(format!("helloWorld! {text}")))
}

async fn does_node_exist(hub: &Hub, packet: &Packet) -> Result<Value, SamError> {
    let name = packet.arg_str("name")?;
    Ok(json!(hub.registry.contains(name).await?))
}

async fn get_username(hub: &Hub) -> Result<Value, SamError> {
    match hub.settings.get("username").await? {
        Some(value) => Ok(value),
        None => Err(SamError::protocol("username is not set")),
    }
}

async fn set_username(hub: &Hub, packet: &Packet) -> Result<Value, SamError> {
    let name = packet.arg_str("name")?;
    hub.settings.set("username", json!(name)).await?;
    Ok(Value::Bool(true))
}

/// Authorization key is always `packet.sender` — the caller's *declared*
/// identity on this connection — never a name read out of `args`.
async fn get_settings(hub: &Hub, packet: &Packet) -> Result<Value, SamError> {
    let sender = &packet.sender;
    match hub.settings.get(format!("packages.{sender}.settings")).await? {
        Some(value) => Ok(value),
        None => Err(SamError::authorization(format!("node \"{sender}\" has no package entry"))),
    }
}

async fn set_settings(hub: &Hub, packet: &Packet) -> Result<Value, SamError> {
    packet.check_args(&["settings"])?;
    let sender = &packet.sender;

    if hub.settings.get(format!("packages.{sender}")).await?.is_none() {
        return Err(SamError::authorization(format!("node \"{sender}\" has no package entry")));
    }

    let settings_value = packet.args.get("settings").cloned().unwrap_or(Value::Null);
    hub.settings.set(format!("packages.{sender}.settings"), settings_value).await?;
    Ok(Value::Bool(true))
}

fn log_message(packet: &Packet) {
    let message = packet.args.get("message").and_then(Value::as_str).unwrap_or_default();
    log!(LogLevel::Info, "Message from {}: {}", packet.sender, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubState;
    use crate::registry::Registry;
    use crate::settings::SettingsStore;
    use std::sync::Arc;

    async fn test_hub() -> Hub {
        let config = crate::config::HubConfig::for_test(
            "samcore",
            "/tmp/samcore-builtin-test.sock".into(),
            "/tmp/samcore-builtin-test.json".into(),
        );
        Hub {
            config: Arc::new(config),
            registry: Registry::new(),
            settings: SettingsStore::in_memory(),
            green_light: Arc::new(crate::hub::GreenLightGate::new()),
            state: dusa_collection_utils::core::types::rwarc::LockWithTimeout::new(HubState::Open),
            children: dusa_collection_utils::core::types::rwarc::LockWithTimeout::new(Vec::new()),
            on_open: None,
        }
    }

    #[tokio::test]
    async fn hello_world_echoes_greeting() {
        let hub = test_hub().await;
        let packet = Packet::new("alice", "samcore", "helloWorld")
            .args(json!({"text": "there"}))
            .return_code(1)
            .build();
        let reply = invoke(&hub, &packet).await;
        assert!(reply.status);
        assert_eq!(reply.result, json!("helloWorld! there"));
    }

    #[tokio::test]
    async fn hello_world_without_text_errors() {
        let hub = test_hub().await;
        let packet = Packet::new("alice", "samcore", "helloWorld").build();
        let reply = invoke(&hub, &packet).await;
        assert!(!reply.status);
        assert_eq!(reply.error_message.as_deref(), Some("text argument not included!"));
    }

    #[tokio::test]
    async fn settings_are_isolated_per_sender() {
        let hub = test_hub().await;
        hub.settings.set("packages.alice", json!({"settings": {}})).await.unwrap();
        hub.settings.set("packages.bob", json!({"settings": {}})).await.unwrap();

        let set_packet = Packet::new("alice", "samcore", "setSettings")
            .args(json!({"settings": {"theme": "dark"}}))
            .build();
        let reply = invoke(&hub, &set_packet).await;
        assert!(reply.status);

        let get_alice = Packet::new("alice", "samcore", "getSettings").build();
        let alice_reply = invoke(&hub, &get_alice).await;
        assert_eq!(alice_reply.result, json!({"theme": "dark"}));

        let get_bob = Packet::new("bob", "samcore", "getSettings").build();
        let bob_reply = invoke(&hub, &get_bob).await;
        assert_eq!(bob_reply.result, json!({}));
    }

    #[tokio::test]
    async fn does_node_exist_reflects_registry() {
        let hub = test_hub().await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        hub.registry.register("bob", crate::registry::NodeHandle::new(tx)).await.unwrap();

        let packet = Packet::new("alice", "samcore", "doesNodeExist").args(json!({"name": "bob"})).build();
        assert_eq!(invoke(&hub, &packet).await.result, json!(true));

        let packet = Packet::new("alice", "samcore", "doesNodeExist").args(json!({"name": "carol"})).build();
        assert_eq!(invoke(&hub, &packet).await.result, json!(false));
    }
}
