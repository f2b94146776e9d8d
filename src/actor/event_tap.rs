//! The input event tap: forwards pointer events to a handler and re-arms the
//! OS session whenever the system disables it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info, trace, warn};

use crate::common::report::{Degradation, Reporter};
use crate::sys::event_tap::{
    EventKind, EventMask, PointerKind, TapBackend, TapControl, TapError, TapEvent, TapHandler,
};

pub trait PointerHandler: Send + Sync {
    fn on_pointer(&self, kind: PointerKind, event: &TapEvent);
}

/// Logs every pointer event it sees.
#[derive(Debug, Default)]
pub struct LogPointerHandler;

impl PointerHandler for LogPointerHandler {
    fn on_pointer(&self, kind: PointerKind, event: &TapEvent) {
        debug!(%kind, x = event.location.x, y = event.location.y, "pointer event");
    }
}

/// The callback side of the tap. It never filters: every event is passed
/// through unmodified.
pub struct TapRouter {
    mask: EventMask,
    handler: Arc<dyn PointerHandler>,
    reporter: Reporter,
    rearms: AtomicU64,
    rearm_failures: AtomicU64,
}

impl TapRouter {
    pub fn new(mask: EventMask, handler: Arc<dyn PointerHandler>, reporter: Reporter) -> Self {
        TapRouter {
            mask,
            handler,
            reporter,
            rearms: AtomicU64::new(0),
            rearm_failures: AtomicU64::new(0),
        }
    }

    pub fn mask(&self) -> EventMask { self.mask }

    pub fn rearms(&self) -> u64 { self.rearms.load(Ordering::Relaxed) }

    pub fn rearm_failures(&self) -> u64 { self.rearm_failures.load(Ordering::Relaxed) }

    fn rearm(&self, reason: EventKind, tap: &dyn TapControl) {
        self.rearms.fetch_add(1, Ordering::Relaxed);
        match tap.enable() {
            Ok(()) => info!(?reason, "event tap disabled by the system, re-enabled"),
            Err(e) => {
                self.rearm_failures.fetch_add(1, Ordering::Relaxed);
                error!(?reason, %e, "event tap could not be re-enabled; input is no longer observed");
                self.reporter.report(Degradation::TapRearmFailed(e));
            }
        }
    }
}

impl TapHandler for TapRouter {
    fn on_event(&self, kind: EventKind, event: &TapEvent, tap: &dyn TapControl) -> bool {
        match kind {
            EventKind::TapDisabledByTimeout | EventKind::TapDisabledByUserInput => {
                self.rearm(kind, tap);
            }
            _ => match PointerKind::from_event(kind) {
                Some(pointer) if self.mask.contains(pointer.mask()) => {
                    self.handler.on_pointer(pointer, event);
                }
                _ => trace!(?kind, "ignoring event"),
            },
        }
        true
    }
}

/// A running interception session. Stopped on drop.
pub struct EventTap {
    backend: Box<dyn TapBackend>,
    router: Arc<TapRouter>,
    running: bool,
}

impl EventTap {
    pub fn start(mut backend: Box<dyn TapBackend>, router: Arc<TapRouter>) -> Result<Self, TapError> {
        let mask = router.mask();
        backend.start(mask, router.clone())?;
        info!(?mask, "event tap started");
        Ok(EventTap { backend, router, running: true })
    }

    pub fn router(&self) -> &Arc<TapRouter> { &self.router }

    pub fn is_running(&self) -> bool { self.running }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.backend.stop();
        self.running = false;
        if self.router.rearm_failures() > 0 {
            warn!(failures = self.router.rearm_failures(), "event tap stopped after failed re-arms");
        }
        info!("event tap stopped");
    }
}

impl Drop for EventTap {
    fn drop(&mut self) { self.stop(); }
}
