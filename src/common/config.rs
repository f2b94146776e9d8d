use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::sys::event_tap::{EventMask, PointerKind};

pub const DEFAULT_DAEMON_PORT: u16 = 4020;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub daemon: DaemonSettings,
    pub observer: ObserverSettings,
    pub event_tap: EventTapSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    /// Loopback port the message daemon listens on. `0` picks a free port.
    pub port: u16,
}

impl Default for DaemonSettings {
    fn default() -> Self { Self { port: DEFAULT_DAEMON_PORT } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObserverSettings {
    /// How long a freshly launched application is given before we try to
    /// attach an accessibility observer to it.
    pub settle_delay_ms: u64,
}

impl Default for ObserverSettings {
    fn default() -> Self { Self { settle_delay_ms: DEFAULT_SETTLE_DELAY_MS } }
}

impl ObserverSettings {
    pub fn settle_delay(&self) -> Duration { Duration::from_millis(self.settle_delay_ms) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventTapSettings {
    pub events: Vec<PointerKind>,
}

impl Default for EventTapSettings {
    fn default() -> Self { Self { events: PointerKind::iter().collect() } }
}

impl EventTapSettings {
    pub fn mask(&self) -> EventMask { self.events.iter().copied().collect() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self { Self { filter: DEFAULT_LOG_FILTER.to_string() } }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tiling").join("config.toml"))
    }

    pub fn parse(text: &str) -> anyhow::Result<Config> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Reads the config at `path`. A missing file yields the defaults.
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("could not read {}", path.display()));
            }
        };
        Self::parse(&text).with_context(|| format!("while loading {}", path.display()))
    }
}
