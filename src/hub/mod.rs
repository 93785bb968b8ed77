//! The routing hub (spec.md §2 item 3, §4.3).
//!
//! `Hub` is the single scoped object spec.md's design notes ask for: all
//! hub-global state (registry, settings, readiness flag, lifecycle state)
//! lives on this value, never behind module-level statics, matching the
//! "scoped hub object" resolution recorded in DESIGN.md.

pub mod builtin;
pub mod dispatch;
pub mod supervisor;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use dusa_collection_utils::log;
use tokio::net::UnixListener;
use tokio::sync::Notify;

use crate::config::HubConfig;
use crate::error::SamError;
use crate::registry::Registry;
use crate::settings::{default_package_entry, SettingsStore};
use supervisor::SupervisedChild;

/// Hub-global lifecycle states (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Starting,
    Accepting,
    Open,
    Draining,
    Stopped,
}

/// The hub-wide readiness flag. Modeled on the teacher's `control.rs`
/// `ToggleControl`: an `AtomicBool` plus a `Notify` so waiters don't poll.
#[derive(Debug)]
pub struct GreenLightGate {
    ready: AtomicBool,
    notify: Notify,
}

impl GreenLightGate {
    pub fn new() -> Self {
        GreenLightGate { ready: AtomicBool::new(false), notify: Notify::new() }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Suspends until the flag is set; a no-op if it already is.
    pub async fn wait(&self) {
        while !self.is_ready() {
            self.notify.notified().await;
        }
    }
}

impl Default for GreenLightGate {
    fn default() -> Self {
        GreenLightGate::new()
    }
}

type OpenHookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type OpenHook = Arc<dyn Fn(Hub) -> OpenHookFuture + Send + Sync>;

fn box_open_hook<F, Fut>(f: F) -> OpenHook
where
    F: Fn(Hub) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |hub| Box::pin(f(hub)) as OpenHookFuture)
}

/// The hub: owns the registry, the settings store, the readiness gate and
/// its own lifecycle state.
#[derive(Clone)]
pub struct Hub {
    pub config: Arc<HubConfig>,
    pub registry: Registry,
    pub settings: SettingsStore,
    pub green_light: Arc<GreenLightGate>,
    pub(crate) state: LockWithTimeout<HubState>,
    children: LockWithTimeout<Vec<Arc<SupervisedChild>>>,
    on_open: Option<OpenHook>,
}

impl Hub {
    /// Opens (or creates) the settings file and seeds the hub's own
    /// package entry if it is not already present (spec.md §4.2).
    pub async fn new(config: HubConfig) -> Result<Self, SamError> {
        let settings = SettingsStore::load(&config.settings_path).await?;

        let hub_package_path = format!("packages.{}", config.hub_name);
        if settings.get(hub_package_path.as_str()).await?.is_none() {
            let entry = default_package_entry(true, true, true);
            settings.set(hub_package_path, entry).await?;
        }

        Ok(Hub {
            config: Arc::new(config),
            registry: Registry::new(),
            settings,
            green_light: Arc::new(GreenLightGate::new()),
            state: LockWithTimeout::new(HubState::Starting),
            children: LockWithTimeout::new(Vec::new()),
            on_open: None,
        })
    }

    /// Registers the hook spec.md §4.3 calls out as running during the
    /// `Accepting -> Open` transition, before the greenLight flag flips and
    /// any client unblocks. Intended for hub-local setup that must complete
    /// before nodes start making domain calls (e.g. warming a cache).
    pub fn with_on_open<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Hub) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_open = Some(box_open_hook(hook));
        self
    }

    pub async fn state(&self) -> HubState {
        *self.state.try_read().await.expect("hub state lock timed out")
    }

    async fn set_state(&self, state: HubState) {
        let mut guard = self.state.try_write().await.expect("hub state lock timed out");
        *guard = state;
    }

    /// Binds the socket, transitions `Starting -> Accepting -> Open`,
    /// spawns persistent children, and serves connections until
    /// [`Hub::shutdown`] is called on a clone of this handle.
    pub async fn run(&self) -> Result<(), SamError> {
        if self.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }
        let listener = UnixListener::bind(&self.config.socket_path)?;
        self.set_state(HubState::Accepting).await;
        log!(LogLevel::Info, "hub \"{}\" accepting on {:?}", self.config.hub_name, self.config.socket_path);

        let spawned = self.spawn_persistent_nodes().await;
        {
            let mut children = self.children.try_write().await?;
            for child in spawned {
                let child = Arc::new(child);
                let watcher = child.clone();
                tokio::spawn(async move {
                    watcher.wait_and_log_exit().await;
                });
                children.push(child);
            }
        }

        if let Some(hook) = self.on_open.clone() {
            hook(self.clone()).await;
        }

        self.set_state(HubState::Open).await;
        self.green_light.set_ready();
        log!(LogLevel::Info, "hub \"{}\" is open; greenLight is on", self.config.hub_name);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted?;
                    let hub = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatch::serve_connection(hub, stream).await {
                            log!(LogLevel::Warn, "connection task ended: {}", e);
                        }
                    });
                }
                _ = wait_for_draining(self) => break,
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        self.set_state(HubState::Stopped).await;
        Ok(())
    }

    /// Transitions `Open -> Draining -> Stopped`: stops accepting new
    /// connections (by making `run`'s select loop observe the state flip),
    /// signals every supervised child to terminate, and flushes the
    /// settings store. Supplemented beyond spec.md's silence on shutdown
    /// (see SPEC_FULL.md).
    pub async fn shutdown(&self) -> Result<(), SamError> {
        self.set_state(HubState::Draining).await;

        let children = self.children.try_read().await?;
        for child in children.iter() {
            child.terminate().await;
        }

        self.settings.save().await?;
        log!(LogLevel::Info, "hub \"{}\" draining", self.config.hub_name);
        Ok(())
    }

    /// Spawns one child per enabled+persistent `packages.*` entry other
    /// than the hub's own (spec.md §4.3).
    async fn spawn_persistent_nodes(&self) -> Vec<SupervisedChild> {
        let mut spawned = Vec::new();
        let packages = match self.settings.get("packages").await {
            Ok(Some(serde_json::Value::Object(map))) => map,
            _ => return spawned,
        };

        let parent_dir = std::env::current_dir().unwrap_or_default();
        for (name, entry) in packages.iter() {
            if name == &self.config.hub_name {
                continue;
            }
            let enabled = entry.get("enabled").and_then(serde_json::Value::as_bool).unwrap_or(false);
            let persistent = entry.get("persistent").and_then(serde_json::Value::as_bool).unwrap_or(false);
            if !enabled || !persistent {
                continue;
            }
            let link = entry.get("link").and_then(serde_json::Value::as_str).unwrap_or_default();

            match SupervisedChild::spawn(name, link, &parent_dir) {
                Ok(child) => spawned.push(child),
                Err(e) => log!(LogLevel::Warn, "failed to spawn persistent node \"{}\": {}", name, e),
            }
        }
        spawned
    }
}

/// Suspends until the hub's lifecycle state reaches `Draining`, polled at a
/// coarse interval since transitions are rare compared to dispatch traffic.
async fn wait_for_draining(hub: &Hub) {
    loop {
        if hub.state().await == HubState::Draining {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_seeds_hub_package_entry() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::for_test(
            "samcore",
            dir.path().join("samcore.sock"),
            dir.path().join("SamCoreSettings.json"),
        );
        let hub = Hub::new(config).await.unwrap();

        let entry = hub.settings.get("packages.samcore").await.unwrap().unwrap();
        assert_eq!(entry["version"], "1.0.0");
        assert_eq!(entry["installed"], true);
        assert_eq!(entry["persistent"], true);
        assert_eq!(entry["mandatory"], true);
        assert_eq!(entry["enabled"], true);
    }

    #[tokio::test]
    async fn green_light_gate_unblocks_waiters() {
        let gate = Arc::new(GreenLightGate::new());
        assert!(!gate.is_ready());

        let waiter_gate = gate.clone();
        let waiter = tokio::spawn(async move {
            waiter_gate.wait().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.set_ready();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
