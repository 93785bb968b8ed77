//! End-to-end client-call scenarios over a real Unix socket: the
//! request/response primitive, built-in API calls, settings isolation and
//! concurrent correlation — spec.md §8's scenarios 2, 3, 5 and 6.

use std::time::Duration;

use samcore::config::{ClientConfig, HubConfig};
use samcore::{Client, Hub};
use serde_json::json;

async fn spawn_hub(dir: &tempfile::TempDir) -> (Hub, HubConfig) {
    let config = HubConfig::for_test(
        "samcore",
        dir.path().join("samcore.sock"),
        dir.path().join("SamCoreSettings.json"),
    );
    let hub = Hub::new(config.clone()).await.unwrap();
    let running = hub.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (hub, config)
}

fn client_config(name: &str, hub_config: &HubConfig) -> ClientConfig {
    ClientConfig::new(name, &hub_config.hub_name, hub_config.socket_path.clone())
        .with_default_call_timeout_ms(2_000)
}

async fn spawn_client(config: ClientConfig) -> Client {
    let client = Client::new(config);
    let running = client.clone();
    tokio::spawn(async move {
        let _ = running.run().await;
    });
    while !client.is_ready() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    client
}

#[tokio::test]
async fn scenario_2_hello_world_echoes_the_greeting() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;
    let alice = spawn_client(client_config("alice", &config)).await;

    let reply = alice.call_api("samcore", "helloWorld", json!({"text": "there"})).await.unwrap();
    assert!(reply.status);
    assert_eq!(reply.result, json!("helloWorld! there"));
}

#[tokio::test]
async fn scenario_3_hello_world_without_text_reports_the_missing_argument() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;
    let alice = spawn_client(client_config("alice", &config)).await;

    let reply = alice.call_api("samcore", "helloWorld", json!({})).await.unwrap();
    assert!(!reply.status);
    assert_eq!(reply.error_message.as_deref(), Some("text argument not included!"));
}

#[tokio::test]
async fn scenario_5_concurrent_calls_resolve_to_their_own_pending_entry_out_of_order() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;

    let bob = spawn_client(client_config("bob", &config)).await;
    bob.add_api_call("slow", |client, packet| async move {
        let delay_ms = packet.args.get("delay_ms").and_then(serde_json::Value::as_u64).unwrap_or(0);
        let tag = packet.args.get("tag").cloned().unwrap_or(serde_json::Value::Null);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let mut reply = packet.reply();
        reply.result = tag;
        let _ = client.reply_ok(reply).await;
    })
    .await
    .unwrap();

    let alice = spawn_client(client_config("alice", &config)).await;

    // bob replies out of send order: the second call has the shortest
    // delay, so its reply arrives first even though alice issued all three
    // concurrently.
    let (first, second, third) = tokio::join!(
        alice.call_api("bob", "slow", json!({"tag": "first", "delay_ms": 90})),
        alice.call_api("bob", "slow", json!({"tag": "second", "delay_ms": 10})),
        alice.call_api("bob", "slow", json!({"tag": "third", "delay_ms": 40})),
    );

    assert_eq!(first.unwrap().result, json!("first"));
    assert_eq!(second.unwrap().result, json!("second"));
    assert_eq!(third.unwrap().result, json!("third"));
}

#[tokio::test]
async fn scenario_6_settings_are_isolated_per_node() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;
    let alice = spawn_client(client_config("alice", &config)).await;
    let bob = spawn_client(client_config("bob", &config)).await;

    let reply = alice.call_api("samcore", "setSettings", json!({"settings": {"theme": "dark"}})).await.unwrap();
    assert!(reply.status);

    let reply = alice.call_api("samcore", "getSettings", json!({})).await.unwrap();
    assert_eq!(reply.result, json!({"theme": "dark"}));

    // bob never called setSettings, so his sub-tree is still the empty
    // default seeded at registration — never alice's.
    let reply = bob.call_api("samcore", "getSettings", json!({})).await.unwrap();
    assert_eq!(reply.result, json!({}));
}

#[tokio::test]
async fn round_trip_echoes_args_back_as_result() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;

    let bob = spawn_client(client_config("bob", &config)).await;
    bob.add_api_call("echo", |client, packet| async move {
        let mut reply = packet.reply();
        reply.result = packet.args.clone();
        let _ = client.reply_ok(reply).await;
    })
    .await
    .unwrap();

    let alice = spawn_client(client_config("alice", &config)).await;
    let args = json!({"a": 1, "b": ["x", "y"]});
    let reply = alice.call_api("bob", "echo", args.clone()).await.unwrap();
    assert_eq!(reply.result, args);
}

#[tokio::test]
async fn a_handler_error_reply_carries_status_false_and_the_message() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;

    let bob = spawn_client(client_config("bob", &config)).await;
    bob.add_api_call("picky", |client, packet| async move {
        let reply = packet.reply();
        let _ = client.reply_error(reply, "bob refused the request").await;
    })
    .await
    .unwrap();

    let alice = spawn_client(client_config("alice", &config)).await;
    let reply = alice.call_api("bob", "picky", json!({})).await.unwrap();
    assert!(!reply.status);
    assert_eq!(reply.error_message.as_deref(), Some("bob refused the request"));
}

#[tokio::test]
async fn call_with_no_timeout_against_a_silent_receiver_never_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;

    let bob = spawn_client(client_config("bob", &config)).await;
    // bob registers no handler for "silent", so the call is forwarded but
    // never answered.
    let alice = spawn_client(client_config("alice", &config)).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        alice.call_api_with_timeout("bob", "silent", json!({}), None),
    )
    .await;
    assert!(outcome.is_err(), "an unbounded call to a silent receiver must not resolve");
    drop(bob);
}

#[tokio::test]
async fn call_with_a_timeout_against_a_silent_receiver_resolves_with_a_synthetic_timeout_packet() {
    let dir = tempfile::tempdir().unwrap();
    let (_hub, config) = spawn_hub(&dir).await;

    let _bob = spawn_client(client_config("bob", &config)).await;
    let alice = spawn_client(client_config("alice", &config)).await;

    let reply = alice
        .call_api_with_timeout("bob", "silent", json!({}), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(!reply.status);
    assert_eq!(reply.error_message.as_deref(), Some("API Timeout!"));
}
