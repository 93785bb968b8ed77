//! Routing-key parsing and formatting (spec.md §4.1).
//!
//! The wire keys are a contract, not an implementation detail: every string
//! shape here is frozen exactly as spec.md prescribes so that heterogeneous
//! nodes interoperate. This module is the typed dispatcher spec.md's design
//! notes ask for — a match on a parsed `(routing-kind, node-name, api,
//! correlation)` tuple — replacing the source's generic string-keyed event
//! emitter while keeping the wire strings identical.

use std::fmt;

/// A parsed routing key. `target` always names the node the key is
/// currently addressed to (the hub when sent to the hub, a receiving node
/// when the hub forwards it onward).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingKey {
    /// `<target>.nodeInit`
    NodeInit { target: String },
    /// `<target>.greenLight`
    GreenLight { target: String },
    /// `<target>.send`
    Send { target: String },
    /// `<target>.return`
    Return { target: String },
    /// `<target>.message`
    Message { target: String },
    /// `<target>.<apiCall>` — a built-in call when `target` is the hub, a
    /// node's own custom call when `target` is that node.
    Api { target: String, api_call: String },
    /// `<receiver>.<apiCall>.return.<sender>.<returnCode>`
    NodeReturn {
        receiver: String,
        api_call: String,
        sender: String,
        return_code: u64,
    },
    /// Did not match any known shape.
    Malformed(String),
}

impl RoutingKey {
    pub fn parse(key: &str) -> RoutingKey {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [receiver, api_call, "return", sender, code] => match code.parse::<u64>() {
                Ok(return_code) => RoutingKey::NodeReturn {
                    receiver: receiver.to_string(),
                    api_call: api_call.to_string(),
                    sender: sender.to_string(),
                    return_code,
                },
                Err(_) => RoutingKey::Malformed(key.to_string()),
            },
            [target, "nodeInit"] => RoutingKey::NodeInit { target: target.to_string() },
            [target, "greenLight"] => RoutingKey::GreenLight { target: target.to_string() },
            [target, "send"] => RoutingKey::Send { target: target.to_string() },
            [target, "return"] => RoutingKey::Return { target: target.to_string() },
            [target, "message"] => RoutingKey::Message { target: target.to_string() },
            [target, api_call] => RoutingKey::Api {
                target: target.to_string(),
                api_call: api_call.to_string(),
            },
            _ => RoutingKey::Malformed(key.to_string()),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::NodeInit { target } => write!(f, "{target}.nodeInit"),
            RoutingKey::GreenLight { target } => write!(f, "{target}.greenLight"),
            RoutingKey::Send { target } => write!(f, "{target}.send"),
            RoutingKey::Return { target } => write!(f, "{target}.return"),
            RoutingKey::Message { target } => write!(f, "{target}.message"),
            RoutingKey::Api { target, api_call } => write!(f, "{target}.{api_call}"),
            RoutingKey::NodeReturn {
                receiver,
                api_call,
                sender,
                return_code,
            } => write!(f, "{receiver}.{api_call}.return.{sender}.{return_code}"),
            RoutingKey::Malformed(raw) => write!(f, "{raw}"),
        }
    }
}

/// `<hubName>.nodeInit`
pub fn node_init_key(hub_name: &str) -> String {
    format!("{hub_name}.nodeInit")
}

/// `<hubName>.greenLight`
pub fn green_light_key(hub_name: &str) -> String {
    format!("{hub_name}.greenLight")
}

/// `<hubName>.send`
pub fn send_key(hub_name: &str) -> String {
    format!("{hub_name}.send")
}

/// `<hubName>.return`
pub fn return_key(hub_name: &str) -> String {
    format!("{hub_name}.return")
}

/// `<hubName>.<apiCall>` — a node requesting a built-in.
pub fn hub_api_key(hub_name: &str, api_call: &str) -> String {
    format!("{hub_name}.{api_call}")
}

/// `<receiverName>.<apiCall>` — what the hub emits to invoke a node's
/// custom API.
pub fn node_api_key(receiver: &str, api_call: &str) -> String {
    format!("{receiver}.{api_call}")
}

/// `<receiverName>.<apiCall>.return.<senderName>.<returnCode>` — what the
/// hub emits to deliver a reply to the original caller.
pub fn node_return_key(receiver: &str, api_call: &str, sender: &str, return_code: u64) -> String {
    format!("{receiver}.{api_call}.return.{sender}.{return_code}")
}

/// `<nodeName>.message` — the debug logging channel.
pub fn message_key(node_name: &str) -> String {
    format!("{node_name}.message")
}
