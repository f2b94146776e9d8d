use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use static_assertions::assert_impl_all;

use super::application::{Application, pid_t};
use super::server::ApplicationData;
use crate::common::collections::HashMap;

type ApplicationMap = HashMap<pid_t, Arc<Application>>;

/// Every tracked application, keyed by pid.
///
/// All access goes through one lock, held only for the map operation
/// itself. Constructing and destroying records happens outside of it.
#[derive(Default)]
pub struct Registry {
    apps: Mutex<ApplicationMap>,
}

assert_impl_all!(Registry: Send, Sync);

/// Lock-held, read-only view of the whole map. The lock is released when
/// the view is dropped, including during unwinding.
pub struct Applications<'a> {
    guard: MutexGuard<'a, ApplicationMap>,
}

impl Deref for Applications<'_> {
    type Target = ApplicationMap;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn lookup(&self, pid: pid_t) -> Option<Arc<Application>> {
        self.apps.lock().get(&pid).cloned()
    }

    /// Inserts `app` unless its pid is already tracked, in which case the
    /// existing record wins and the caller should destroy `app`.
    pub fn insert(&self, app: Arc<Application>) -> bool {
        let mut apps = self.apps.lock();
        if apps.contains_key(&app.pid()) {
            return false;
        }
        apps.insert(app.pid(), app);
        true
    }

    /// Removes the record for `pid`. Tearing it down is up to the caller,
    /// after this returns and the lock is released.
    pub fn remove(&self, pid: pid_t) -> Option<Arc<Application>> { self.apps.lock().remove(&pid) }

    pub fn scoped_access(&self) -> Applications<'_> { Applications { guard: self.apps.lock() } }

    pub fn len(&self) -> usize { self.apps.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Diagnostic rows, sorted by pid.
    pub fn snapshot(&self) -> Vec<ApplicationData> {
        let apps: Vec<_> = self.scoped_access().values().cloned().collect();
        let mut rows: Vec<_> = apps.iter().map(|app| ApplicationData::from(&**app)).collect();
        rows.sort_unstable_by_key(|row| row.pid);
        rows
    }

    /// Empties the registry, handing every record back for teardown.
    pub fn drain(&self) -> Vec<Arc<Application>> {
        let drained: Vec<_> = self.apps.lock().drain().map(|(_, app)| app).collect();
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam_channel::unbounded;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::application::{ApplicationInfo, AttachOutcome};
    use crate::testing::FakeAccessibility;

    fn app(ax: &FakeAccessibility, pid: pid_t, name: &str) -> Arc<Application> {
        Arc::new(Application::new(ApplicationInfo::new(pid, name), ax).unwrap())
    }

    #[test]
    fn insert_lookup_remove() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        assert!(registry.lookup(100).is_none());

        assert!(registry.insert(app(&ax, 100, "Finder")));
        assert_eq!(registry.lookup(100).unwrap().name(), "Finder");
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(100).unwrap();
        assert_eq!(removed.pid(), 100);
        assert!(registry.lookup(100).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn first_insert_wins() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        assert!(registry.insert(app(&ax, 100, "Finder")));
        assert!(!registry.insert(app(&ax, 100, "Impostor")));
        assert_eq!(registry.lookup(100).unwrap().name(), "Finder");
        assert_eq!(registry.len(), 1);
        // The rejected handle was the only one, so its element is gone.
        assert_eq!(ax.live_applications(), 1);
    }

    #[test]
    fn removing_unknown_pid_is_noop() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        registry.insert(app(&ax, 1, "A"));
        assert!(registry.remove(999).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn scoped_access_sees_everything() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        for pid in 1..=3 {
            registry.insert(app(&ax, pid, "app"));
        }
        let mut pids: Vec<_> = registry.scoped_access().keys().copied().collect();
        pids.sort();
        assert_eq!(pids, vec![1, 2, 3]);
    }

    #[test]
    fn scoped_access_releases_lock_on_unwind() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        registry.insert(app(&ax, 1, "A"));
        let result = catch_unwind(AssertUnwindSafe(|| {
            let apps = registry.scoped_access();
            assert_eq!(apps.len(), 1);
            panic!("diagnostics blew up");
        }));
        assert!(result.is_err());
        assert!(registry.lookup(1).is_some());
    }

    #[test]
    fn snapshot_is_sorted() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        registry.insert(app(&ax, 30, "C"));
        registry.insert(app(&ax, 10, "A"));
        registry.insert(app(&ax, 20, "B"));
        let names: Vec<_> = registry.snapshot().into_iter().map(|row| row.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn slow_attach_does_not_stall_other_pids() {
        let ax = FakeAccessibility::default();
        let gate = ax.hold_attach(100);
        let registry = Arc::new(Registry::new());
        let stuck = app(&ax, 100, "Stuck");
        registry.insert(stuck.clone());
        registry.insert(app(&ax, 200, "Finder"));

        let attaching =
            thread::spawn(move || stuck.attach_observer(&["AXWindowMoved"], Arc::new(|_: &str| {})));
        gate.entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let (rows_tx, rows_rx) = unbounded();
        let snapshotting = {
            let registry = registry.clone();
            thread::spawn(move || rows_tx.send(registry.snapshot()).unwrap())
        };
        let rows = rows_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| !row.is_observed));

        let started = Instant::now();
        assert!(registry.lookup(200).is_some());
        assert!(registry.remove(200).is_some());
        assert!(started.elapsed() < Duration::from_millis(500));

        gate.release.send(()).unwrap();
        assert_eq!(attaching.join().unwrap(), Ok(AttachOutcome::Attached));
        snapshotting.join().unwrap();
        assert!(registry.lookup(100).unwrap().is_observed());
    }

    #[test]
    fn drain_empties_registry() {
        let ax = FakeAccessibility::default();
        let registry = Registry::new();
        registry.insert(app(&ax, 1, "A"));
        registry.insert(app(&ax, 2, "B"));
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
