//! The canonical request/response envelope (spec.md §3) and the small
//! factory/validator surface shared by the hub and the client library
//! (spec.md §4.5).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::error::SamError;

/// The single envelope used for every message that crosses the hub.
///
/// `args` and `result` stay as `serde_json::Value` rather than a typed sum:
/// the routing layer never needs to understand a handler's argument shape,
/// only the built-in API (a closed set) validates concrete fields, and it
/// does so against this `Value` at the handler boundary (see
/// [`Packet::check_args`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Node name that originated the request. Never rewritten by the hub.
    pub sender: String,
    /// Node name that must handle the request.
    pub receiver: String,
    /// Name of the operation being requested on the receiver.
    #[serde(rename = "apiCall")]
    pub api_call: String,
    /// Caller-unique correlation id; `None` only for fire-and-forget sends.
    #[serde(rename = "returnCode")]
    pub return_code: Option<u64>,
    /// Inputs to the call; shape is defined per `apiCall`.
    #[serde(default)]
    pub args: Value,
    /// Response payload; filled in by the receiver on success.
    #[serde(default)]
    pub result: Value,
    /// `true` on success, `false` on error.
    #[serde(default = "default_status")]
    pub status: bool,
    /// Human-readable error text when `status` is `false`; absent (wire
    /// value `false`) when there is no error.
    #[serde(rename = "errorMessage", with = "error_message", default)]
    pub error_message: Option<String>,
    /// Debug-only backup of the original `args`; never interpreted by
    /// routing.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bdata: Option<Value>,
}

fn default_status() -> bool {
    true
}

/// Serializes `Option<String>` as either a JSON string or the literal
/// `false`, matching the wire contract in spec.md §3 (`errorMessage` is
/// "string or false").
mod error_message {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(msg) => msg.serialize(s),
            None => false.serialize(s),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Value::deserialize(d)?;
        match value {
            Value::Bool(_) | Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}.{} (code={:?}, status={})",
            self.sender, self.receiver, self.api_call, self.return_code, self.status
        )
    }
}

/// Input to [`Packet::new`]; mirrors `Packet.new({sender, receiver,
/// apiCall, args, returnCode?})` from spec.md §4.5.
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    pub sender: String,
    pub receiver: String,
    pub api_call: String,
    pub args: Value,
    pub return_code: Option<u64>,
    pub bdata: Option<Value>,
}

impl PacketBuilder {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, api_call: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            api_call: api_call.into(),
            args: Value::Null,
            return_code: None,
            bdata: None,
        }
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn return_code(mut self, code: u64) -> Self {
        self.return_code = Some(code);
        self
    }

    /// Copies `args` into `bdata` for debug purposes, as spec.md §4.4 step 2
    /// describes for outbound calls.
    pub fn with_bdata(mut self) -> Self {
        self.bdata = Some(self.args.clone());
        self
    }

    pub fn build(self) -> Packet {
        Packet {
            sender: self.sender,
            receiver: self.receiver,
            api_call: self.api_call,
            return_code: self.return_code,
            args: self.args,
            result: Value::Null,
            status: true,
            error_message: None,
            bdata: self.bdata,
        }
    }
}

impl Packet {
    /// `Packet.new(...)` from spec.md §4.5: a fresh packet with §3 defaults.
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, api_call: impl Into<String>) -> PacketBuilder {
        PacketBuilder::new(sender, receiver, api_call)
    }

    /// `Packet.checkArgs(packet, [names])`: returns `Ok(())` iff every name
    /// is present in `packet.args`, else an [`SamError::Argument`] naming
    /// the first missing field.
    pub fn check_args(&self, names: &[&str]) -> Result<(), SamError> {
        let obj = self.args.as_object();
        for name in names {
            let present = obj.map(|m| m.contains_key(*name)).unwrap_or(false);
            if !present {
                return Err(SamError::argument(format!("{name} argument not included!")));
            }
        }
        Ok(())
    }

    /// Convenience accessor for a single required string argument.
    pub fn arg_str(&self, name: &str) -> Result<&str, SamError> {
        self.args
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| SamError::argument(format!("{name} argument not included!")))
    }

    /// Builds the reply this request should carry: same `sender`,
    /// `receiver`, `apiCall` and `returnCode`, fresh `result`/`status`.
    pub fn reply(&self) -> Packet {
        Packet {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            api_call: self.api_call.clone(),
            return_code: self.return_code,
            args: Value::Null,
            result: Value::Null,
            status: true,
            error_message: None,
            bdata: None,
        }
    }

    /// `return(packet)`: sets `status=true` if unset, leaves `result` as
    /// already written by the handler.
    pub fn mark_ok(&mut self) {
        self.status = true;
    }

    /// `returnError(packet, msg?)`: sets `status=false`, fills
    /// `errorMessage` if it was absent.
    pub fn mark_error(&mut self, msg: impl Into<String>) {
        self.status = false;
        if self.error_message.is_none() {
            self.error_message = Some(msg.into());
        }
    }

    /// The synthetic packet a pending call resolves with on timeout
    /// (spec.md §3 pending-call table, §4.4 call primitive).
    pub fn timeout_reply(sender: &str, receiver: &str, api_call: &str, return_code: Option<u64>) -> Packet {
        Packet {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            api_call: api_call.to_string(),
            return_code,
            args: Value::Null,
            result: Value::Null,
            status: false,
            error_message: Some("API Timeout!".to_string()),
            bdata: None,
        }
    }

    /// The reply a caller gets when `receiver` is not in the hub's
    /// registry (spec.md §7).
    pub fn missing_receiver_reply(sender: &str, receiver: &str, api_call: &str, return_code: Option<u64>) -> Packet {
        Packet {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            api_call: api_call.to_string(),
            return_code,
            args: Value::Null,
            result: Value::Null,
            status: false,
            error_message: Some(format!("Node \"{receiver}\" does not exist!")),
            bdata: None,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.status
    }

    pub fn result_json(&self, result: Value) -> Value {
        json!(result)
    }
}
