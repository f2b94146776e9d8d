use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;
use objc2_core_foundation::{CFMachPort, CFRetained, CFRunLoop, kCFRunLoopCommonModes};
use objc2_core_graphics::{
    CGEvent, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventTapProxy,
    CGEventType,
};
use once_cell::unsync::OnceCell;
use tracing::{debug, warn};

use super::{EventKind, EventMask, Point, TapBackend, TapControl, TapError, TapEvent, TapHandler};

struct CallbackCtx {
    handler: Arc<dyn TapHandler>,
    port: OnceCell<CFRetained<CFMachPort>>,
}

struct PortControl<'a>(&'a CFMachPort);

impl TapControl for PortControl<'_> {
    fn enable(&self) -> Result<(), TapError> {
        CGEvent::tap_enable(self.0, true);
        if CGEvent::tap_is_enabled(self.0) { Ok(()) } else { Err(TapError::StillDisabled) }
    }
}

struct SendRunLoop(CFRetained<CFRunLoop>);

// CFRunLoopStop may be called from any thread.
unsafe impl Send for SendRunLoop {}

/// Runs a `CGEventTap` on a dedicated thread with its own run loop.
#[derive(Default)]
pub struct MacTapBackend {
    run_loop: Option<SendRunLoop>,
    thread: Option<JoinHandle<()>>,
}

impl TapBackend for MacTapBackend {
    fn start(&mut self, mask: EventMask, handler: Arc<dyn TapHandler>) -> Result<(), TapError> {
        if self.thread.is_some() {
            return Err(TapError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("event-tap".to_string())
            .spawn(move || {
                let ctx = Box::into_raw(Box::new(CallbackCtx { handler, port: OnceCell::new() }));
                let port = unsafe {
                    CGEvent::tap_create(
                        CGEventTapLocation::SessionEventTap,
                        CGEventTapPlacement::HeadInsertEventTap,
                        CGEventTapOptions::Default,
                        mask.bits(),
                        Some(tap_callback),
                        ctx.cast::<c_void>(),
                    )
                };
                let Some(port) = port else {
                    unsafe { drop(Box::from_raw(ctx)) };
                    let _ = ready_tx.send(Err(TapError::PermissionDenied));
                    return;
                };
                let (Some(source), Some(run_loop)) =
                    (CFMachPort::new_run_loop_source(None, Some(&port), 0), CFRunLoop::current())
                else {
                    CFMachPort::invalidate(&port);
                    unsafe { drop(Box::from_raw(ctx)) };
                    let _ = ready_tx.send(Err(TapError::PermissionDenied));
                    return;
                };

                unsafe {
                    run_loop.add_source(Some(&source), kCFRunLoopCommonModes);
                    let _ = (*ctx).port.set(port.clone());
                }
                CGEvent::tap_enable(&port, true);
                let _ = ready_tx.send(Ok(SendRunLoop(run_loop.clone())));

                CFRunLoop::run();

                CGEvent::tap_enable(&port, false);
                unsafe { run_loop.remove_source(Some(&source), kCFRunLoopCommonModes) };
                CFMachPort::invalidate(&port);
                unsafe { drop(Box::from_raw(ctx)) };
                debug!("event tap thread exiting");
            })
            .map_err(|e| TapError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => {
                self.run_loop = Some(run_loop);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(TapError::Thread("event tap thread exited during startup".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(SendRunLoop(run_loop)) = self.run_loop.take() {
            run_loop.stop();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("event tap thread panicked");
        }
    }
}

unsafe extern "C-unwind" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: CGEventType,
    event_ref: NonNull<CGEvent>,
    user_info: *mut c_void,
) -> *mut CGEvent {
    let ctx = unsafe { &*(user_info as *const CallbackCtx) };
    let event = unsafe { event_ref.as_ref() };

    let Some(port) = ctx.port.get() else {
        return event_ref.as_ptr();
    };

    let location = CGEvent::location(Some(event));
    let payload = TapEvent {
        location: Point { x: location.x, y: location.y },
        timestamp: CGEvent::timestamp(Some(event)),
    };
    if ctx.handler.on_event(EventKind::from(event_type.0), &payload, &PortControl(port)) {
        event_ref.as_ptr()
    } else {
        std::ptr::null_mut()
    }
}
