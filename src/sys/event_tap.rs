//! Event kinds, masks, and the seam over the OS interception session.

use std::sync::Arc;

use bitflags::bitflags;
use num_enum::FromPrimitive;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use thiserror::Error;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "macos")]
pub use macos::MacTapBackend;

/// Raw event type as delivered by the tap. Codes follow the Quartz numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum EventKind {
    Null = 0,
    LeftMouseDown = 1,
    LeftMouseUp = 2,
    RightMouseDown = 3,
    RightMouseUp = 4,
    MouseMoved = 5,
    LeftMouseDragged = 6,
    RightMouseDragged = 7,
    KeyDown = 10,
    KeyUp = 11,
    FlagsChanged = 12,
    ScrollWheel = 22,
    TabletPointer = 23,
    TabletProximity = 24,
    OtherMouseDown = 25,
    OtherMouseUp = 26,
    OtherMouseDragged = 27,
    #[num_enum(catch_all)]
    Other(u32),
    TapDisabledByTimeout = 0xFFFF_FFFE,
    TapDisabledByUserInput = 0xFFFF_FFFF,
}

/// The pointer and button events the tap forwards to its handler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PointerKind {
    MouseMoved,
    LeftMouseDown,
    LeftMouseUp,
    LeftMouseDragged,
    RightMouseDown,
    RightMouseUp,
    RightMouseDragged,
}

impl PointerKind {
    pub fn from_event(kind: EventKind) -> Option<Self> {
        Some(match kind {
            EventKind::MouseMoved => PointerKind::MouseMoved,
            EventKind::LeftMouseDown => PointerKind::LeftMouseDown,
            EventKind::LeftMouseUp => PointerKind::LeftMouseUp,
            EventKind::LeftMouseDragged => PointerKind::LeftMouseDragged,
            EventKind::RightMouseDown => PointerKind::RightMouseDown,
            EventKind::RightMouseUp => PointerKind::RightMouseUp,
            EventKind::RightMouseDragged => PointerKind::RightMouseDragged,
            _ => return None,
        })
    }

    pub const fn mask(self) -> EventMask {
        match self {
            PointerKind::MouseMoved => EventMask::MOUSE_MOVED,
            PointerKind::LeftMouseDown => EventMask::LEFT_MOUSE_DOWN,
            PointerKind::LeftMouseUp => EventMask::LEFT_MOUSE_UP,
            PointerKind::LeftMouseDragged => EventMask::LEFT_MOUSE_DRAGGED,
            PointerKind::RightMouseDown => EventMask::RIGHT_MOUSE_DOWN,
            PointerKind::RightMouseUp => EventMask::RIGHT_MOUSE_UP,
            PointerKind::RightMouseDragged => EventMask::RIGHT_MOUSE_DRAGGED,
        }
    }
}

bitflags! {
    /// One bit per event type code, as the OS expects it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u64 {
        const LEFT_MOUSE_DOWN = 1 << 1;
        const LEFT_MOUSE_UP = 1 << 2;
        const RIGHT_MOUSE_DOWN = 1 << 3;
        const RIGHT_MOUSE_UP = 1 << 4;
        const MOUSE_MOVED = 1 << 5;
        const LEFT_MOUSE_DRAGGED = 1 << 6;
        const RIGHT_MOUSE_DRAGGED = 1 << 7;

        const POINTER = Self::LEFT_MOUSE_DOWN.bits()
            | Self::LEFT_MOUSE_UP.bits()
            | Self::RIGHT_MOUSE_DOWN.bits()
            | Self::RIGHT_MOUSE_UP.bits()
            | Self::MOUSE_MOVED.bits()
            | Self::LEFT_MOUSE_DRAGGED.bits()
            | Self::RIGHT_MOUSE_DRAGGED.bits();
    }
}

impl FromIterator<PointerKind> for EventMask {
    fn from_iter<I: IntoIterator<Item = PointerKind>>(iter: I) -> Self {
        iter.into_iter().fold(EventMask::empty(), |mask, kind| mask | kind.mask())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The payload handed to the handler alongside the event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TapEvent {
    pub location: Point,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapError {
    #[error("the OS refused to create the event tap (is accessibility access granted?)")]
    PermissionDenied,
    #[error("event taps are not available on this platform")]
    Unsupported,
    #[error("the event tap is already running")]
    AlreadyRunning,
    #[error("the event tap is still disabled after re-enabling it")]
    StillDisabled,
    #[error("could not start the event tap thread: {0}")]
    Thread(String),
}

/// The tap's own handle, passed to the handler so it can re-arm the session.
pub trait TapControl {
    fn enable(&self) -> Result<(), TapError>;
}

pub trait TapHandler: Send + Sync {
    /// Returns `true` to let the event continue to its destination.
    fn on_event(&self, kind: EventKind, event: &TapEvent, tap: &dyn TapControl) -> bool;
}

/// An OS interception session. `start` installs the tap and returns once it
/// is live; `stop` tears it down and must be safe to call repeatedly.
pub trait TapBackend: Send {
    fn start(&mut self, mask: EventMask, handler: Arc<dyn TapHandler>) -> Result<(), TapError>;
    fn stop(&mut self);
}

#[derive(Debug, Default)]
pub struct UnsupportedTapBackend;

impl TapBackend for UnsupportedTapBackend {
    fn start(&mut self, _mask: EventMask, _handler: Arc<dyn TapHandler>) -> Result<(), TapError> {
        Err(TapError::Unsupported)
    }

    fn stop(&mut self) {}
}

pub fn system_backend() -> Box<dyn TapBackend> {
    #[cfg(target_os = "macos")]
    {
        Box::new(MacTapBackend::default())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(UnsupportedTapBackend)
    }
}
