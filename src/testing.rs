//! Fakes for the OS seams, shared by the unit tests.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::common::collections::{HashMap, HashSet};
use crate::model::application::{ApplicationInfo, pid_t};
use crate::sys::accessibility::{
    Accessibility, AxApplication, AxError, AxObserver, NotificationCallback,
};
use crate::sys::event_tap::{
    EventKind, EventMask, TapBackend, TapControl, TapError, TapEvent, TapHandler,
};
use crate::sys::scheduler::{Scheduler, Task};

#[derive(Default)]
struct AxState {
    fail_construction: HashSet<pid_t>,
    fail_attach: HashMap<pid_t, AxError>,
    created: usize,
    live_applications: usize,
    observers: HashMap<pid_t, (Vec<&'static str>, NotificationCallback)>,
    held: HashMap<pid_t, (Sender<()>, Receiver<()>)>,
}

/// Pauses `observe` for one pid until the test releases it.
pub struct AttachGate {
    /// Receives once `observe` has been entered.
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

/// Records every element and observer it hands out and counts releases.
#[derive(Clone, Default)]
pub struct FakeAccessibility {
    state: Arc<Mutex<AxState>>,
}

impl FakeAccessibility {
    pub fn fail_construction(&self, pid: pid_t) { self.state.lock().fail_construction.insert(pid); }

    pub fn fail_attach(&self, pid: pid_t, error: AxError) {
        self.state.lock().fail_attach.insert(pid, error);
    }

    /// Makes `observe` for `pid` block, as it does for an unresponsive app.
    pub fn hold_attach(&self, pid: pid_t) -> AttachGate {
        let (entered_tx, entered) = unbounded();
        let (release, release_rx) = unbounded();
        self.state.lock().held.insert(pid, (entered_tx, release_rx));
        AttachGate { entered, release }
    }

    pub fn created(&self) -> usize { self.state.lock().created }

    pub fn live_applications(&self) -> usize { self.state.lock().live_applications }

    pub fn live_observers(&self) -> usize { self.state.lock().observers.len() }

    pub fn observed_notifications(&self, pid: pid_t) -> Vec<&'static str> {
        self.state.lock().observers.get(&pid).map(|(names, _)| names.clone()).unwrap_or_default()
    }

    /// Delivers `name` to the live observer for `pid`, if there is one.
    pub fn fire(&self, pid: pid_t, name: &str) -> bool {
        let callback = self.state.lock().observers.get(&pid).map(|(_, cb)| cb.clone());
        match callback {
            Some(callback) => {
                callback(name);
                true
            }
            None => false,
        }
    }
}

impl Accessibility for FakeAccessibility {
    fn create_application(
        &self,
        info: &ApplicationInfo,
    ) -> Result<Box<dyn AxApplication>, AxError> {
        let mut state = self.state.lock();
        if state.fail_construction.contains(&info.pid) {
            return Err(AxError::NoElement(info.pid));
        }
        state.created += 1;
        state.live_applications += 1;
        Ok(Box::new(FakeApplication { pid: info.pid, state: self.state.clone() }))
    }
}

struct FakeApplication {
    pid: pid_t,
    state: Arc<Mutex<AxState>>,
}

impl AxApplication for FakeApplication {
    fn observe(
        &self,
        notifications: &[&'static str],
        callback: NotificationCallback,
    ) -> Result<Box<dyn AxObserver>, AxError> {
        let held = self.state.lock().held.remove(&self.pid);
        if let Some((entered, release)) = held {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let mut state = self.state.lock();
        if let Some(error) = state.fail_attach.get(&self.pid) {
            return Err(*error);
        }
        state.observers.insert(self.pid, (notifications.to_vec(), callback));
        Ok(Box::new(FakeObserver { pid: self.pid, state: self.state.clone() }))
    }
}

impl Drop for FakeApplication {
    fn drop(&mut self) { self.state.lock().live_applications -= 1; }
}

struct FakeObserver {
    pid: pid_t,
    state: Arc<Mutex<AxState>>,
}

impl AxObserver for FakeObserver {}

impl Drop for FakeObserver {
    fn drop(&mut self) {
        let removed = self.state.lock().observers.remove(&self.pid);
        drop(removed);
    }
}

/// Holds scheduled tasks until the test runs them, synchronously.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    pub fn pending(&self) -> usize { self.tasks.lock().len() }

    pub fn delays(&self) -> Vec<Duration> {
        self.tasks.lock().iter().map(|(delay, _)| *delay).collect()
    }

    /// Runs every queued task, including ones queued while running. Returns
    /// how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return ran;
            }
            for (_, task) in batch {
                task();
                ran += 1;
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) { self.tasks.lock().push((delay, task)); }
}

/// A tap handle that counts re-enable calls.
#[derive(Default)]
pub struct RecordingTap {
    pub enables: AtomicUsize,
    pub fail: bool,
}

impl RecordingTap {
    pub fn failing() -> Self { RecordingTap { fail: true, ..Default::default() } }

    pub fn enables(&self) -> usize { self.enables.load(Ordering::SeqCst) }
}

impl TapControl for RecordingTap {
    fn enable(&self) -> Result<(), TapError> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        if self.fail { Err(TapError::StillDisabled) } else { Ok(()) }
    }
}

#[derive(Default)]
struct TapState {
    mask: Option<EventMask>,
    handler: Option<Arc<dyn TapHandler>>,
    starts: usize,
    stops: usize,
    fail: Option<TapError>,
}

/// In-process stand-in for the OS tap. Clones share state, so a test can
/// keep one while the plugin owns another.
#[derive(Clone, Default)]
pub struct FakeTapBackend {
    state: Arc<Mutex<TapState>>,
}

impl FakeTapBackend {
    pub fn failing(error: TapError) -> Self {
        let backend = Self::default();
        backend.state.lock().fail = Some(error);
        backend
    }

    pub fn is_running(&self) -> bool { self.state.lock().handler.is_some() }

    pub fn mask(&self) -> Option<EventMask> { self.state.lock().mask }

    pub fn starts(&self) -> usize { self.state.lock().starts }

    pub fn stops(&self) -> usize { self.state.lock().stops }

    /// Delivers one event the way the OS would, returning the handler's verdict.
    pub fn deliver(&self, kind: EventKind, control: &dyn TapControl) -> Option<bool> {
        let handler = self.state.lock().handler.clone()?;
        Some(handler.on_event(kind, &TapEvent::default(), control))
    }
}

impl TapBackend for FakeTapBackend {
    fn start(&mut self, mask: EventMask, handler: Arc<dyn TapHandler>) -> Result<(), TapError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail.clone() {
            return Err(error);
        }
        if state.handler.is_some() {
            return Err(TapError::AlreadyRunning);
        }
        state.starts += 1;
        state.mask = Some(mask);
        state.handler = Some(handler);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if state.handler.take().is_some() {
            state.stops += 1;
        }
    }
}
