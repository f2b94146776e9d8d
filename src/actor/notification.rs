//! Routes accessibility notifications for one application to their action.
//!
//! The router only reacts; it never touches the registry. Each recognized
//! notification logs a line and, when a sink is installed, forwards one
//! [`WindowEvent`] for the layout side to pick up.

use std::sync::Arc;

use crossbeam_channel::Sender;
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, trace};

use crate::model::application::{ApplicationInfo, pid_t};
use crate::sys::accessibility::NotificationCallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, EnumIter)]
pub enum AxNotification {
    #[strum(serialize = "AXWindowCreated")]
    WindowCreated,
    #[strum(serialize = "AXUIElementDestroyed")]
    ElementDestroyed,
    #[strum(serialize = "AXFocusedWindowChanged")]
    FocusedWindowChanged,
    #[strum(serialize = "AXWindowMiniaturized")]
    WindowMiniaturized,
    #[strum(serialize = "AXWindowDeminiaturized")]
    WindowDeminiaturized,
    #[strum(serialize = "AXWindowMoved")]
    WindowMoved,
    #[strum(serialize = "AXWindowResized")]
    WindowResized,
    #[strum(serialize = "AXTitleChanged")]
    TitleChanged,
}

impl AxNotification {
    pub fn name(self) -> &'static str { self.into() }

    /// Every name the router understands, in registration order.
    pub fn names() -> Vec<&'static str> { Self::iter().map(Self::name).collect() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub pid: pid_t,
    pub notification: AxNotification,
}

#[derive(Debug, Default)]
pub struct NotificationRouter {
    events_tx: Option<Sender<WindowEvent>>,
}

impl NotificationRouter {
    pub fn new(events_tx: Option<Sender<WindowEvent>>) -> Self { Self { events_tx } }

    pub fn handle(&self, app: &ApplicationInfo, notification: AxNotification) {
        let pid = app.pid;
        let name = app.name.as_str();
        match notification {
            AxNotification::WindowCreated => debug!(pid, name, "window created"),
            AxNotification::ElementDestroyed => debug!(pid, name, "ui element destroyed"),
            AxNotification::FocusedWindowChanged => debug!(pid, name, "focused window changed"),
            AxNotification::WindowMiniaturized => debug!(pid, name, "window miniaturized"),
            AxNotification::WindowDeminiaturized => debug!(pid, name, "window deminiaturized"),
            AxNotification::WindowMoved => debug!(pid, name, "window moved"),
            AxNotification::WindowResized => debug!(pid, name, "window resized"),
            AxNotification::TitleChanged => debug!(pid, name, "window title changed"),
        }
        if let Some(tx) = &self.events_tx {
            _ = tx.send(WindowEvent { pid, notification });
        }
    }

    /// Parses an OS notification name and handles it. Unknown names are
    /// ignored.
    pub fn handle_named(&self, app: &ApplicationInfo, name: &str) -> Option<AxNotification> {
        match name.parse::<AxNotification>() {
            Ok(notification) => {
                self.handle(app, notification);
                Some(notification)
            }
            Err(_) => {
                trace!(pid = app.pid, name, "ignoring unknown notification");
                None
            }
        }
    }

    /// The callback handed to the OS observer for `app`.
    pub fn callback_for(self: &Arc<Self>, app: ApplicationInfo) -> NotificationCallback {
        let router = Arc::clone(self);
        Arc::new(move |name: &str| {
            router.handle_named(&app, name);
        })
    }
}
