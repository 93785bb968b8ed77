//! The six dispatch rules a connected node's inbound packets are routed
//! through (spec.md §4.3). One task per accepted connection calls
//! [`serve_connection`]; it owns that connection's read half and a channel
//! to its write half, and consults the shared [`Hub`] for registry,
//! settings and readiness state.

use serde_json::json;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::log;

use super::{builtin, Hub};
use crate::error::SamError;
use crate::packet::Packet;
use crate::registry::{NodeHandle, Outbound};
use crate::routing::{self, RoutingKey};
use crate::settings::default_package_entry;
use crate::wire;

/// Owns one accepted connection end to end: reads frames until the peer
/// disconnects or a transport error occurs, dispatching each one; runs a
/// sibling writer task fed by an mpsc channel so registry entries can hand
/// out a cheap `Sender` instead of sharing the raw socket.
pub async fn serve_connection(hub: Hub, stream: UnixStream) -> Result<(), SamError> {
    let (mut read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();

    let writer_task = tokio::spawn(run_writer(write_half, rx));

    let mut registered_name: Option<String> = None;
    loop {
        let (key, packet) = match wire::recv_frame(&mut read_half).await {
            Ok(frame) => frame,
            Err(SamError::Transport(_)) => break,
            Err(e) => {
                log!(LogLevel::Warn, "malformed frame on connection: {}", e);
                continue;
            }
        };

        if let Err(e) = handle_inbound(&hub, &mut registered_name, &tx, key, packet).await {
            log!(LogLevel::Warn, "dispatch error: {}", e);
        }
    }

    if let Some(name) = registered_name {
        hub.registry.deregister(&name).await?;
        log!(LogLevel::Info, "node \"{}\" disconnected", name);
        match hub.registry.sweep_dead_connections(&hub.config.hub_name).await {
            Ok(removed) if !removed.is_empty() => {
                log!(LogLevel::Info, "disconnection sweep removed: {:?}", removed);
            }
            Ok(_) => {}
            Err(e) => log!(LogLevel::Warn, "disconnection sweep failed: {}", e),
        }
    }

    writer_task.abort();
    Ok(())
}

async fn run_writer(mut write_half: tokio::net::unix::OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some((key, packet)) = rx.recv().await {
        if let Err(e) = wire::send_frame(&mut write_half, &key, &packet).await {
            log!(LogLevel::Warn, "failed writing to connection: {}", e);
            break;
        }
    }
}

/// Applies spec.md §4.3's dispatch rules to one inbound `(key, packet)`.
async fn handle_inbound(
    hub: &Hub,
    registered_name: &mut Option<String>,
    tx: &mpsc::UnboundedSender<Outbound>,
    key: String,
    packet: Packet,
) -> Result<(), SamError> {
    let parsed = RoutingKey::parse(&key);

    if registered_name.is_none() && !matches!(parsed, RoutingKey::NodeInit { .. }) {
        let mut reply = packet.reply();
        reply.mark_error("node must call nodeInit before sending any other packet");
        if packet.return_code.is_some() {
            let _ = reply_on_same_connection(hub, tx, &packet, &reply);
        }
        return Ok(());
    }

    match parsed {
        RoutingKey::NodeInit { target } if target == hub.config.hub_name => {
            handle_node_init(hub, registered_name, tx, &packet).await
        }
        RoutingKey::GreenLight { target } if target == hub.config.hub_name => {
            let mut reply = packet.reply();
            reply.result = json!(hub.green_light.is_ready());
            reply.status = true;
            reply_on_same_connection(hub, tx, &packet, &reply)
        }
        RoutingKey::Api { target, api_call } if target == hub.config.hub_name && builtin::is_builtin(&api_call) => {
            let reply = builtin::invoke(hub, &packet).await;
            reply_on_same_connection(hub, tx, &packet, &reply)
        }
        RoutingKey::Send { target } if target == hub.config.hub_name => handle_send(hub, tx, &packet).await,
        RoutingKey::Return { target } if target == hub.config.hub_name => handle_return(hub, &packet).await,
        _ => {
            log!(LogLevel::Warn, "unrecognized routing key \"{}\"", key);
            Ok(())
        }
    }
}

/// Rule 1: `<hubName>.nodeInit` — register this connection under the
/// requested name, replacing any prior handle under the same name, and seed
/// a `packages.<name>` entry the first time this node is ever seen so its
/// `getSettings`/`setSettings` calls have a sub-tree to read and write (the
/// same self-seeding the hub performs for its own package entry in
/// `Hub::new`, generalized to every registering node — spec.md §4.2 is
/// explicit only about the hub's own seed; without this, an ordinary node
/// could never successfully call `setSettings` at all).
async fn handle_node_init(
    hub: &Hub,
    registered_name: &mut Option<String>,
    tx: &mpsc::UnboundedSender<Outbound>,
    packet: &Packet,
) -> Result<(), SamError> {
    let mut reply = packet.reply();
    match register_node(hub, registered_name, tx, packet).await {
        Ok(()) => {
            reply.result = json!(true);
            reply.status = true;
        }
        Err(e) => reply.mark_error(e.message()),
    }
    reply_on_same_connection(hub, tx, packet, &reply)
}

/// The fallible part of registration, kept separate so every failure —
/// missing `name`, a registry error, or a settings-store hiccup while
/// seeding the node's package entry — funnels through one `match` in
/// [`handle_node_init`] and becomes a `status=false` reply instead of
/// propagating out of dispatch (spec.md §7: the hub never drops the
/// sender's connection over a protocol/storage error), the same discipline
/// `builtin::invoke` applies to every built-in handler.
async fn register_node(
    hub: &Hub,
    registered_name: &mut Option<String>,
    tx: &mpsc::UnboundedSender<Outbound>,
    packet: &Packet,
) -> Result<(), SamError> {
    let name = packet.arg_str("name")?.to_string();
    hub.registry.register(name.clone(), NodeHandle::new(tx.clone())).await?;
    *registered_name = Some(name.clone());

    let package_path = format!("packages.{name}");
    if hub.settings.get(package_path.as_str()).await?.is_none() {
        hub.settings.set(package_path, default_package_entry(false, false, false)).await?;
    }

    log!(LogLevel::Info, "node \"{}\" registered", name);
    Ok(())
}

/// Rule 4: `<hubName>.send` — forward to `packet.receiver`, or reply with a
/// routing error if the name isn't registered.
async fn handle_send(hub: &Hub, tx: &mpsc::UnboundedSender<Outbound>, packet: &Packet) -> Result<(), SamError> {
    match hub.registry.get(&packet.receiver).await? {
        Some(handle) => handle.send(routing::node_api_key(&packet.receiver, &packet.api_call), packet.clone()),
        None => {
            let reply = Packet::missing_receiver_reply(
                &packet.sender,
                &packet.receiver,
                &packet.api_call,
                packet.return_code,
            );
            reply_on_same_connection(hub, tx, packet, &reply)
        }
    }
}

/// Rule 5: `<hubName>.return` — forward the reply to `packet.sender` (the
/// original caller), preserving `receiver`/`apiCall`/`returnCode`.
async fn handle_return(hub: &Hub, packet: &Packet) -> Result<(), SamError> {
    let Some(return_code) = packet.return_code else {
        log!(LogLevel::Warn, "dropping reply with no returnCode from \"{}\"", packet.sender);
        return Ok(());
    };

    match hub.registry.get(&packet.sender).await? {
        Some(handle) => {
            let key = routing::node_return_key(&packet.receiver, &packet.api_call, &packet.sender, return_code);
            handle.send(key, packet.clone())
        }
        None => {
            log!(LogLevel::Warn, "dropping reply for vanished sender \"{}\"", packet.sender);
            Ok(())
        }
    }
}

/// Built-in replies and registration acks go back over the same
/// connection they arrived on (the issuing node's own handle), under the
/// `<hubName>.<apiCall>.return.<sender>.<returnCode>` key. Fire-and-forget
/// calls (`returnCode == None`) get no reply at all.
fn reply_on_same_connection(
    hub: &Hub,
    tx: &mpsc::UnboundedSender<Outbound>,
    request: &Packet,
    reply: &Packet,
) -> Result<(), SamError> {
    let Some(return_code) = request.return_code else {
        return Ok(());
    };
    let key = routing::node_return_key(&hub.config.hub_name, &request.api_call, &request.sender, return_code);
    tx.send((key, reply.clone())).map_err(|_| SamError::transport("connection's writer task has exited"))
}
