//! The hub's name → connection table (spec.md §3, §4.3).
//!
//! One entry per registered node: `{name, connection handle, connected-at}`.
//! Re-registering a name replaces the prior handle rather than erroring,
//! matching spec.md's "exactly one entry per name" invariant. The registry
//! is process-local to the hub and shared across every accepted connection
//! behind a single [`LockWithTimeout`], the same sharing pattern the
//! teacher's `aggregator.rs` uses for its own `UsageMap`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::SamError;
use crate::packet::Packet;

/// An outbound `(routingKey, packet)` frame queued for delivery on a
/// connection's writer task.
pub type Outbound = (String, Packet);

/// What the registry keeps per registered node: a channel to its writer
/// task and the moment registration happened.
#[derive(Clone)]
pub struct NodeHandle {
    pub sender: UnboundedSender<Outbound>,
    pub connected_at: DateTime<Utc>,
}

impl NodeHandle {
    pub fn new(sender: UnboundedSender<Outbound>) -> Self {
        NodeHandle { sender, connected_at: Utc::now() }
    }

    /// Queues a frame for delivery; fails if the connection's writer task
    /// has already exited (a disconnection the sweep has not yet noticed).
    pub fn send(&self, key: impl Into<String>, packet: Packet) -> Result<(), SamError> {
        self.sender
            .send((key.into(), packet))
            .map_err(|_| SamError::transport("connection's writer task has exited"))
    }
}

/// Name → connection table, shared by every accepted connection's dispatch
/// task.
#[derive(Clone)]
pub struct Registry {
    nodes: LockWithTimeout<HashMap<String, NodeHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { nodes: LockWithTimeout::new(HashMap::new()) }
    }

    /// Registers `name`, replacing any prior handle under the same name.
    pub async fn register(&self, name: impl Into<String>, handle: NodeHandle) -> Result<(), SamError> {
        let mut nodes = self.nodes.try_write().await?;
        nodes.insert(name.into(), handle);
        Ok(())
    }

    /// Removes `name` from the registry, e.g. on disconnect.
    pub async fn deregister(&self, name: &str) -> Result<(), SamError> {
        let mut nodes = self.nodes.try_write().await?;
        nodes.remove(name);
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> Result<bool, SamError> {
        let nodes = self.nodes.try_read().await?;
        Ok(nodes.contains_key(name))
    }

    pub async fn get(&self, name: &str) -> Result<Option<NodeHandle>, SamError> {
        let nodes = self.nodes.try_read().await?;
        Ok(nodes.get(name).cloned())
    }

    pub async fn names(&self) -> Result<Vec<String>, SamError> {
        let nodes = self.nodes.try_read().await?;
        Ok(nodes.keys().cloned().collect())
    }

    /// Probes every registered connection with a harmless `wellnessCheck`
    /// message, removing any whose send fails (spec.md §4.3 disconnection
    /// sweep).
    pub async fn sweep_dead_connections(&self, hub_name: &str) -> Result<Vec<String>, SamError> {
        let snapshot: Vec<(String, NodeHandle)> = {
            let nodes = self.nodes.try_read().await?;
            nodes.iter().map(|(name, handle)| (name.clone(), handle.clone())).collect()
        };

        let mut dead = Vec::new();
        for (name, handle) in snapshot {
            let probe = crate::packet::Packet::new(hub_name, &name, "wellnessCheck").build();
            if handle.send(crate::routing::message_key(&name), probe).is_err() {
                dead.push(name);
            }
        }

        if !dead.is_empty() {
            let mut nodes = self.nodes.try_write().await?;
            for name in &dead {
                nodes.remove(name);
            }
        }
        Ok(dead)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
