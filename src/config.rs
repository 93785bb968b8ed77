//! Ambient process configuration for the hub and client library.
//!
//! Loaded the same way the teacher's `AppConfig::new()` builds its settings:
//! hard defaults, layered with an optional TOML file, layered with
//! environment variables. spec.md §6 defines no protocol flags — this only
//! lets an operator relocate the settings file or socket without touching
//! code.

use std::env;
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Hub-side configuration: name, socket path, settings path, logging.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HubConfig {
    /// The hub's own name; also the socket filename and the reply-routing
    /// target for built-ins.
    pub hub_name: String,
    /// Path to the Unix socket the hub listens on.
    pub socket_path: PathBuf,
    /// Path to the persisted settings document.
    pub settings_path: PathBuf,
    /// Enables `LogLevel::Debug` at process start.
    pub debug_mode: bool,
}

impl HubConfig {
    /// Loads `SamCore.toml` (optional) layered with `SAMCORE_*` environment
    /// variables over the spec.md §6 defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = env::current_dir().map_err(|e| ConfigError::Message(e.to_string()))?;
        let default_socket = cwd.join("samcore.sock");
        let default_settings = cwd.join("SamCoreSettings.json");

        let builder = Config::builder()
            .set_default("hub_name", "samcore")?
            .set_default("socket_path", default_socket.to_string_lossy().to_string())?
            .set_default("settings_path", default_settings.to_string_lossy().to_string())?
            .set_default("debug_mode", false)?
            .add_source(File::with_name("SamCore").required(false))
            .add_source(Environment::with_prefix("SAMCORE").separator("_"));

        builder.build()?.try_deserialize()
    }

    /// A config with the spec.md §6 defaults, bypassing file/env discovery;
    /// used by tests that need a fresh tempdir per case.
    pub fn for_test(hub_name: impl Into<String>, socket_path: PathBuf, settings_path: PathBuf) -> Self {
        HubConfig { hub_name: hub_name.into(), socket_path, settings_path, debug_mode: true }
    }
}

/// Client-side configuration: node/hub names, reconnect/poll cadence, and
/// an optional blanket call timeout.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub node_name: String,
    pub hub_name: String,
    pub socket_path: PathBuf,
    /// Reconnect retry interval, in milliseconds (spec.md §4.4/§5: ~1500ms).
    pub reconnect_interval_ms: u64,
    /// greenLight poll interval, in milliseconds (spec.md §4.4: 1s).
    pub green_light_poll_ms: u64,
    /// Default `callApi` timeout in milliseconds when a call site doesn't
    /// specify one; `None` means calls never time out unless asked to.
    pub default_call_timeout_ms: Option<u64>,
    pub debug_mode: bool,
    /// Suppresses non-error logging, mirroring spec.md §4.4's `silent?`
    /// construction flag.
    pub silent: bool,
}

impl ClientConfig {
    pub fn new(node_name: impl Into<String>, hub_name: impl Into<String>, socket_path: PathBuf) -> Self {
        ClientConfig {
            node_name: node_name.into(),
            hub_name: hub_name.into(),
            socket_path,
            reconnect_interval_ms: 1500,
            green_light_poll_ms: 1000,
            default_call_timeout_ms: None,
            debug_mode: false,
            silent: false,
        }
    }

    pub fn with_default_call_timeout_ms(mut self, millis: u64) -> Self {
        self.default_call_timeout_ms = Some(millis);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}
