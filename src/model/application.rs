use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use nix::libc::pid_t;

use crate::sys::accessibility::{
    Accessibility, AxApplication, AxError, AxObserver, NotificationCallback,
};

pub const MAX_NAME_LEN: usize = 255;
const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessSerialNumber {
    pub high: u32,
    pub low: u32,
}

/// Identity of an OS process as carried by launch/terminate messages.
///
/// Wire layout (little-endian): PSN high `u32`, PSN low `u32`, pid `i32`,
/// then the process name as UTF-8, terminated by NUL or by the end of the
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub pid: pid_t,
    pub psn: ProcessSerialNumber,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is {0} bytes, expected at least {HEADER_LEN}")]
    TooShort(usize),
    #[error("process name is {0} bytes, longer than {MAX_NAME_LEN}")]
    NameTooLong(usize),
}

impl ApplicationInfo {
    pub fn new(pid: pid_t, name: impl Into<String>) -> Self {
        ApplicationInfo {
            pid,
            psn: ProcessSerialNumber::default(),
            name: name.into(),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < HEADER_LEN {
            return Err(PayloadError::TooShort(data.len()));
        }
        let word = |at: usize| [data[at], data[at + 1], data[at + 2], data[at + 3]];
        let psn = ProcessSerialNumber {
            high: u32::from_le_bytes(word(0)),
            low: u32::from_le_bytes(word(4)),
        };
        let pid = pid_t::from_le_bytes(word(8));

        let rest = &data[HEADER_LEN..];
        let name = match rest.iter().position(|&b| b == 0) {
            Some(end) => &rest[..end],
            None => rest,
        };
        if name.len() > MAX_NAME_LEN {
            return Err(PayloadError::NameTooLong(name.len()));
        }

        Ok(ApplicationInfo {
            pid,
            psn,
            name: String::from_utf8_lossy(name).into_owned(),
        })
    }

    /// Encodes in the layout `from_bytes` reads, NUL-terminated. Names are
    /// truncated to [`MAX_NAME_LEN`] bytes at a character boundary.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut end = self.name.len().min(MAX_NAME_LEN);
        while !self.name.is_char_boundary(end) {
            end -= 1;
        }
        let mut out = Vec::with_capacity(HEADER_LEN + end + 1);
        out.extend_from_slice(&self.psn.high.to_le_bytes());
        out.extend_from_slice(&self.psn.low.to_le_bytes());
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.name.as_bytes()[..end]);
        out.push(0);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyAttached,
    Destroyed,
}

enum ObserverState {
    Detached,
    Attached(Box<dyn AxObserver>),
    Destroyed,
}

/// One tracked process and its accessibility subscription.
///
/// Records are shared out of the registry as `Arc<Application>`; the OS
/// element is released when the last handle goes away, but [`destroy`]
/// detaches the observer immediately and refuses any later attach.
///
/// [`destroy`]: Application::destroy
pub struct Application {
    info: ApplicationInfo,
    element: Box<dyn AxApplication>,
    observer: Mutex<ObserverState>,
}

impl Application {
    pub fn new(info: ApplicationInfo, ax: &dyn Accessibility) -> Result<Self, AxError> {
        let element = ax.create_application(&info)?;
        Ok(Application {
            info,
            element,
            observer: Mutex::new(ObserverState::Detached),
        })
    }

    pub fn pid(&self) -> pid_t { self.info.pid }

    pub fn name(&self) -> &str { &self.info.name }

    pub fn psn(&self) -> ProcessSerialNumber { self.info.psn }

    pub fn info(&self) -> &ApplicationInfo { &self.info }

    pub fn is_observed(&self) -> bool {
        matches!(*self.observer.lock(), ObserverState::Attached(_))
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(*self.observer.lock(), ObserverState::Destroyed)
    }

    pub fn attach_observer(
        &self,
        notifications: &[&'static str],
        callback: NotificationCallback,
    ) -> Result<AttachOutcome, AxError> {
        match *self.observer.lock() {
            ObserverState::Attached(_) => return Ok(AttachOutcome::AlreadyAttached),
            ObserverState::Destroyed => return Ok(AttachOutcome::Destroyed),
            ObserverState::Detached => {}
        }

        // The OS call can block for as long as the target app is unresponsive,
        // so it runs unlocked and the state is re-checked afterwards.
        let observer = self.element.observe(notifications, callback)?;
        let mut state = self.observer.lock();
        let outcome = match *state {
            ObserverState::Detached => {
                *state = ObserverState::Attached(observer);
                return Ok(AttachOutcome::Attached);
            }
            ObserverState::Attached(_) => AttachOutcome::AlreadyAttached,
            ObserverState::Destroyed => AttachOutcome::Destroyed,
        };
        drop(state);
        drop(observer);
        Ok(outcome)
    }

    /// Detaches the observer, if any. Idempotent.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.observer.lock(), ObserverState::Destroyed);
        drop(previous);
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("pid", &self.info.pid)
            .field("name", &self.info.name)
            .field("observed", &self.is_observed())
            .finish()
    }
}
