//! Host-facing lifecycle: `init`, `main`, `deinit`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::actor::daemon::{Daemon, DaemonError, MessageHandler};
use crate::actor::dispatcher::{Dispatcher, Message, SUBSCRIPTIONS};
use crate::actor::event_tap::{EventTap, LogPointerHandler, PointerHandler, TapRouter};
use crate::actor::notification::{NotificationRouter, WindowEvent};
use crate::actor::observer::ObserverManager;
use crate::common::config::Config;
use crate::common::report::{Degradation, Reporter};
use crate::model::registry::Registry;
use crate::model::server::RegistryData;
use crate::sys::accessibility::{self, Accessibility};
use crate::sys::event_tap::{self, TapBackend, TapError};
use crate::sys::scheduler::{self, Scheduler};

pub const PLUGIN_NAME: &str = "Tiling";
pub const PLUGIN_VERSION: &str = "0.0.1";

#[derive(Debug, Error)]
pub enum InitError {
    #[error("message daemon failed to start")]
    Daemon(#[from] DaemonError),
    #[error("event tap failed to start")]
    EventTap(#[from] TapError),
}

/// Everything the plugin needs from the OS, injectable for tests.
pub struct Backends {
    pub accessibility: Arc<dyn Accessibility>,
    pub scheduler: Arc<dyn Scheduler>,
    pub tap: Box<dyn TapBackend>,
    pub pointer: Arc<dyn PointerHandler>,
    pub window_events: Option<Sender<WindowEvent>>,
}

impl Backends {
    pub fn system() -> io::Result<Self> {
        Ok(Backends {
            accessibility: accessibility::system(),
            scheduler: scheduler::system()?,
            tap: event_tap::system_backend(),
            pointer: Arc::new(LogPointerHandler),
            window_events: None,
        })
    }
}

pub struct Plugin {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    daemon: Option<Daemon>,
    tap: Mutex<Option<EventTap>>,
    degradations: Receiver<Degradation>,
}

assert_impl_all!(Plugin: Send, Sync);

impl Plugin {
    /// Creates the registry, starts the daemon, then the tap. If any step
    /// fails, whatever already started is torn down before returning.
    pub fn init(config: &Config, backends: Backends) -> Result<Self, InitError> {
        let _span = info_span!("plugin init", name = PLUGIN_NAME, version = PLUGIN_VERSION)
            .entered();
        let Backends { accessibility, scheduler, tap, pointer, window_events } = backends;

        let (reporter, degradations) = Reporter::channel();
        let registry = Arc::new(Registry::new());
        let router = Arc::new(NotificationRouter::new(window_events));
        let observers =
            ObserverManager::new(registry.clone(), scheduler, router, reporter.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            accessibility,
            observers,
            config.observer.settle_delay(),
            reporter.clone(),
        ));

        let handler: MessageHandler = {
            let dispatcher = dispatcher.clone();
            Arc::new(move |name: &str, payload: &[u8]| dispatcher.dispatch(name, payload))
        };
        let daemon = Daemon::start(config.daemon.port, handler)?;

        let tap_router = Arc::new(TapRouter::new(config.event_tap.mask(), pointer, reporter));
        let tap = EventTap::start(tap, tap_router)?;

        info!(addr = %daemon.local_addr(), "plugin initialized");
        Ok(Plugin {
            registry,
            dispatcher,
            daemon: Some(daemon),
            tap: Mutex::new(Some(tap)),
            degradations,
        })
    }

    /// Direct message entry, equivalent to a frame arriving on the daemon.
    pub fn main(&self, name: &str, payload: &[u8]) -> bool { self.dispatcher.dispatch(name, payload) }

    pub fn subscriptions(&self) -> &'static [Message] { &SUBSCRIPTIONS }

    pub fn registry(&self) -> &Arc<Registry> { &self.registry }

    pub fn degradations(&self) -> &Receiver<Degradation> { &self.degradations }

    pub fn daemon_addr(&self) -> Option<SocketAddr> { self.daemon.as_ref().map(Daemon::local_addr) }

    pub fn tap_running(&self) -> bool { self.tap.lock().as_ref().is_some_and(EventTap::is_running) }

    pub fn diagnostics(&self) -> RegistryData { RegistryData::collect(&self.registry) }

    pub fn deinit(&mut self) {
        let daemon = self.daemon.take();
        let tap = self.tap.get_mut().take();
        if daemon.is_none() && tap.is_none() {
            return;
        }
        drop(daemon);
        drop(tap);

        let apps = self.registry.drain();
        for app in &apps {
            app.destroy();
        }
        if !self.degradations.is_empty() {
            warn!(pending = self.degradations.len(), "deinit with unread degradation reports");
        }
        info!(released = apps.len(), "plugin deinitialized");
    }
}

impl Drop for Plugin {
    fn drop(&mut self) { self.deinit(); }
}
