//! Seam over the OS accessibility API.
//!
//! The core never talks to the accessibility framework directly: it creates
//! one [`AxApplication`] per tracked process and asks it for an
//! [`AxObserver`]. Dropping either releases the OS resources behind it.

use std::sync::Arc;

use thiserror::Error;

use crate::model::application::{ApplicationInfo, pid_t};

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "macos")]
pub use macos::MacAccessibility;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AxError {
    #[error("accessibility access has not been granted to this process")]
    ApiDisabled,
    #[error("the application did not respond to the accessibility request")]
    CannotComplete,
    #[error("the application supports none of the requested notifications")]
    NotificationUnsupported,
    #[error("process {0} has no accessibility element")]
    NoElement(pid_t),
    #[error("accessibility is not available on this platform")]
    Unsupported,
    #[error("accessibility call failed with code {0}")]
    Other(i32),
}

/// Receives the raw notification name the OS delivered.
pub type NotificationCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub trait Accessibility: Send + Sync {
    fn create_application(&self, info: &ApplicationInfo)
    -> Result<Box<dyn AxApplication>, AxError>;
}

pub trait AxApplication: Send + Sync {
    /// Registers `callback` for every name in `notifications` the
    /// application supports. Fails only if none could be registered.
    fn observe(
        &self,
        notifications: &[&'static str],
        callback: NotificationCallback,
    ) -> Result<Box<dyn AxObserver>, AxError>;
}

/// A live observer. Dropping it unregisters every notification.
pub trait AxObserver: Send + Sync {}

/// Backend for platforms without an accessibility API. Every construction
/// fails, so launches are logged and otherwise ignored.
#[derive(Debug, Default)]
pub struct UnsupportedAccessibility;

impl Accessibility for UnsupportedAccessibility {
    fn create_application(
        &self,
        _info: &ApplicationInfo,
    ) -> Result<Box<dyn AxApplication>, AxError> {
        Err(AxError::Unsupported)
    }
}

pub fn system() -> Arc<dyn Accessibility> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(MacAccessibility)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(UnsupportedAccessibility)
    }
}
