use std::ffi::c_void;
use std::ptr::{self, NonNull};

use objc2_application_services::{AXError as RawError, AXObserver as RawObserver, AXUIElement};
use objc2_core_foundation::{
    CFRetained, CFRunLoop, CFRunLoopSource, CFString, kCFRunLoopDefaultMode,
};
use tracing::{debug, trace};

use super::{Accessibility, AxApplication, AxError, AxObserver, NotificationCallback};
use crate::model::application::{ApplicationInfo, pid_t};
use crate::sys::scheduler::release_on_main;

#[derive(Debug, Default)]
pub struct MacAccessibility;

impl Accessibility for MacAccessibility {
    fn create_application(
        &self,
        info: &ApplicationInfo,
    ) -> Result<Box<dyn AxApplication>, AxError> {
        let element = unsafe { AXUIElement::new_application(info.pid) };
        Ok(Box::new(MacApplication { pid: info.pid, element }))
    }
}

struct MacApplication {
    pid: pid_t,
    element: CFRetained<AXUIElement>,
}

// AX elements are CF objects and may be messaged from any thread.
unsafe impl Send for MacApplication {}
unsafe impl Sync for MacApplication {}

impl AxApplication for MacApplication {
    fn observe(
        &self,
        notifications: &[&'static str],
        callback: NotificationCallback,
    ) -> Result<Box<dyn AxObserver>, AxError> {
        let mut raw: *mut RawObserver = ptr::null_mut();
        check(unsafe { RawObserver::create(self.pid, Some(observer_callback), NonNull::from(&mut raw)) })?;
        let observer = NonNull::new(raw)
            .map(|raw| unsafe { CFRetained::from_raw(raw) })
            .ok_or(AxError::NoElement(self.pid))?;

        let refcon = Box::into_raw(Box::new(callback));
        let mut registered = Vec::new();
        let mut last_error = AxError::NotificationUnsupported;
        for name in notifications {
            let cf_name = CFString::from_static_str(name);
            match check(unsafe {
                observer.add_notification(&self.element, &cf_name, refcon.cast::<c_void>())
            }) {
                Ok(()) => registered.push(cf_name),
                Err(e) => {
                    trace!(pid = self.pid, name, %e, "notification not registered");
                    last_error = e;
                }
            }
        }

        if registered.is_empty() {
            unsafe { drop(Box::from_raw(refcon)) };
            return Err(last_error);
        }

        let source = unsafe { observer.run_loop_source() };
        if let Some(main) = CFRunLoop::main() {
            unsafe { main.add_source(Some(&source), kCFRunLoopDefaultMode) };
        }
        debug!(pid = self.pid, count = registered.len(), "observer registered");

        Ok(Box::new(MacObserver {
            parts: Some(ObserverParts {
                observer,
                element: self.element.clone(),
                source,
                registered,
                refcon,
            }),
        }))
    }
}

/// Callbacks run on the main run loop and borrow `refcon`, so the parts are
/// only ever torn down there, after any callback in flight has returned.
struct MacObserver {
    parts: Option<ObserverParts>,
}

struct ObserverParts {
    observer: CFRetained<RawObserver>,
    element: CFRetained<AXUIElement>,
    source: CFRetained<CFRunLoopSource>,
    registered: Vec<CFRetained<CFString>>,
    refcon: *mut NotificationCallback,
}

unsafe impl Send for ObserverParts {}
unsafe impl Sync for ObserverParts {}

impl AxObserver for MacObserver {}

impl Drop for MacObserver {
    fn drop(&mut self) {
        if let Some(parts) = self.parts.take() {
            release_on_main(parts);
        }
    }
}

impl Drop for ObserverParts {
    fn drop(&mut self) {
        for name in &self.registered {
            let _ = unsafe { self.observer.remove_notification(&self.element, name) };
        }
        if let Some(main) = CFRunLoop::main() {
            unsafe { main.remove_source(Some(&self.source), kCFRunLoopDefaultMode) };
        }
        unsafe { drop(Box::from_raw(self.refcon)) };
    }
}

unsafe extern "C-unwind" fn observer_callback(
    _observer: NonNull<RawObserver>,
    _element: NonNull<AXUIElement>,
    notification: NonNull<CFString>,
    refcon: *mut c_void,
) {
    let callback = unsafe { &*(refcon as *const NotificationCallback) };
    let name = unsafe { notification.as_ref() }.to_string();
    callback(&name);
}

fn check(err: RawError) -> Result<(), AxError> {
    match err {
        RawError::Success => Ok(()),
        RawError::APIDisabled => Err(AxError::ApiDisabled),
        RawError::CannotComplete => Err(AxError::CannotComplete),
        RawError::NotificationUnsupported => Err(AxError::NotificationUnsupported),
        other => Err(AxError::Other(other.0)),
    }
}
