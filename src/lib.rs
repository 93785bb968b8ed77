//! SamCore: a message-routing hub and node client library for a
//! distributed multi-process application network.
//!
//! A single hub process ([`hub::Hub`]) owns a Unix-domain socket, a
//! name-to-connection registry and a persisted settings document. Any
//! number of node processes connect through [`client::Client`], each
//! speaking the same length-prefixed JSON wire format ([`wire`]) keyed by
//! [`routing::RoutingKey`].

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod packet;
pub mod registry;
pub mod routing;
pub mod settings;
pub mod wire;

pub use client::Client;
pub use config::{ClientConfig, HubConfig};
pub use error::{SamError, SamResult};
pub use hub::{Hub, HubState};
pub use packet::Packet;
pub use routing::RoutingKey;
