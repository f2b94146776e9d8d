//! The single entry point for lifecycle messages from the host.

use std::sync::Arc;
use std::time::Duration;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, info, info_span, trace, warn};

use super::observer::ObserverManager;
use crate::common::report::{Degradation, Reporter};
use crate::model::application::{Application, ApplicationInfo};
use crate::model::registry::Registry;
use crate::sys::accessibility::Accessibility;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Message {
    ApplicationHidden,
    ApplicationUnhidden,
    ApplicationTerminated,
    ApplicationLaunched,
    SpaceChanged,
}

impl Message {
    pub fn name(self) -> &'static str { self.into() }
}

/// The messages the host should deliver to us.
pub const SUBSCRIPTIONS: [Message; 5] = [
    Message::ApplicationUnhidden,
    Message::ApplicationHidden,
    Message::ApplicationTerminated,
    Message::ApplicationLaunched,
    Message::SpaceChanged,
];

pub struct Dispatcher {
    registry: Arc<Registry>,
    ax: Arc<dyn Accessibility>,
    observers: ObserverManager,
    settle_delay: Duration,
    reporter: Reporter,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        ax: Arc<dyn Accessibility>,
        observers: ObserverManager,
        settle_delay: Duration,
        reporter: Reporter,
    ) -> Self {
        Dispatcher {
            registry,
            ax,
            observers,
            settle_delay,
            reporter,
        }
    }

    /// Returns whether the message was handled. Unknown names are not.
    pub fn dispatch(&self, name: &str, payload: &[u8]) -> bool {
        match name.parse::<Message>() {
            Ok(message) => self.dispatch_message(message, payload),
            Err(_) => {
                debug!(name, "unhandled message");
                false
            }
        }
    }

    pub fn dispatch_message(&self, message: Message, payload: &[u8]) -> bool {
        let _span = info_span!("dispatch", %message).entered();
        match message {
            Message::ApplicationLaunched => {
                let Some(info) = self.decode(message, payload) else {
                    return false;
                };
                self.application_launched(info);
                true
            }
            Message::ApplicationTerminated => {
                let Some(info) = self.decode(message, payload) else {
                    return false;
                };
                self.application_terminated(&info);
                true
            }
            Message::SpaceChanged => {
                info!("active space changed");
                true
            }
            Message::ApplicationHidden | Message::ApplicationUnhidden => {
                trace!("no handler");
                false
            }
        }
    }

    fn decode(&self, message: Message, payload: &[u8]) -> Option<ApplicationInfo> {
        match ApplicationInfo::from_bytes(payload) {
            Ok(info) => Some(info),
            Err(error) => {
                warn!(%error, "malformed payload");
                self.reporter.report(Degradation::MalformedPayload { message, error });
                None
            }
        }
    }

    fn application_launched(&self, info: ApplicationInfo) {
        let pid = info.pid;
        let app = match Application::new(info, &*self.ax) {
            Ok(app) => Arc::new(app),
            Err(error) => {
                warn!(pid, %error, "could not construct application");
                return;
            }
        };
        info!(pid, name = app.name(), "launched");

        if !self.registry.insert(Arc::clone(&app)) {
            debug!(pid, "application already tracked, discarding duplicate");
            app.destroy();
            return;
        }
        self.observers.schedule_subscription(pid, self.settle_delay);
    }

    fn application_terminated(&self, info: &ApplicationInfo) {
        let Some(app) = self.registry.remove(info.pid) else {
            debug!(pid = info.pid, "terminated application was not tracked");
            return;
        };
        info!(pid = app.pid(), name = app.name(), "terminated");
        app.destroy();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::actor::notification::NotificationRouter;
    use crate::model::application::{PayloadError, pid_t};
    use crate::testing::{FakeAccessibility, ManualScheduler};

    const SETTLE: Duration = Duration::from_millis(500);

    struct Fixture {
        ax: Arc<FakeAccessibility>,
        registry: Arc<Registry>,
        scheduler: Arc<ManualScheduler>,
        dispatcher: Dispatcher,
        reports: crossbeam_channel::Receiver<Degradation>,
    }

    fn fixture() -> Fixture {
        let ax = Arc::new(FakeAccessibility::default());
        let registry = Arc::new(Registry::new());
        let scheduler = Arc::new(ManualScheduler::default());
        let (reporter, reports) = Reporter::channel();
        let observers = ObserverManager::new(
            registry.clone(),
            scheduler.clone(),
            Arc::new(NotificationRouter::default()),
            reporter.clone(),
        );
        let dispatcher =
            Dispatcher::new(registry.clone(), ax.clone(), observers, SETTLE, reporter);
        Fixture { ax, registry, scheduler, dispatcher, reports }
    }

    fn payload(pid: pid_t, name: &str) -> Vec<u8> { ApplicationInfo::new(pid, name).to_bytes() }

    #[test]
    fn message_names_are_kebab_case() {
        assert_eq!(Message::ApplicationLaunched.name(), "application-launched");
        assert_eq!(Message::SpaceChanged.to_string(), "space-changed");
        for message in Message::iter() {
            assert_eq!(message.name().parse::<Message>(), Ok(message));
            assert!(SUBSCRIPTIONS.contains(&message));
        }
    }

    #[test_log::test]
    fn launch_registers_and_schedules_subscription() {
        let f = fixture();
        assert!(f.dispatcher.dispatch("application-launched", &payload(100, "Finder")));

        let app = f.registry.lookup(100).unwrap();
        assert_eq!(app.name(), "Finder");
        assert!(!app.is_observed());
        assert_eq!(f.scheduler.delays(), vec![SETTLE]);

        assert_eq!(f.scheduler.run_all(), 1);
        assert!(app.is_observed());
    }

    #[test]
    fn terminate_before_settle_delay_makes_task_noop() {
        let f = fixture();
        assert!(f.dispatcher.dispatch("application-launched", &payload(100, "Finder")));
        assert!(f.dispatcher.dispatch("application-terminated", &payload(100, "Finder")));
        assert!(f.registry.lookup(100).is_none());
        assert_eq!(f.scheduler.pending(), 1);

        assert_eq!(f.scheduler.run_all(), 1);
        assert!(f.registry.is_empty());
        assert_eq!(f.ax.live_observers(), 0);
        assert_eq!(f.ax.live_applications(), 0);
    }

    #[test]
    fn terminate_after_subscription_detaches_observer() {
        let f = fixture();
        f.dispatcher.dispatch("application-launched", &payload(100, "Finder"));
        f.scheduler.run_all();
        assert_eq!(f.ax.live_observers(), 1);

        f.dispatcher.dispatch("application-terminated", &payload(100, "Finder"));
        assert_eq!(f.ax.live_observers(), 0);
        assert_eq!(f.ax.live_applications(), 0);
    }

    #[test]
    fn terminate_of_unknown_pid_is_handled_noop() {
        let f = fixture();
        f.dispatcher.dispatch("application-launched", &payload(1, "Dock"));
        assert!(f.dispatcher.dispatch("application-terminated", &payload(999, "Nobody")));
        assert_eq!(f.registry.len(), 1);
    }

    #[test]
    fn duplicate_launch_keeps_first_record() {
        let f = fixture();
        assert!(f.dispatcher.dispatch("application-launched", &payload(100, "Finder")));
        assert!(f.dispatcher.dispatch("application-launched", &payload(100, "Impostor")));

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.registry.lookup(100).unwrap().name(), "Finder");
        assert_eq!(f.ax.created(), 2);
        assert_eq!(f.ax.live_applications(), 1);
        assert_eq!(f.scheduler.pending(), 1);
    }

    #[test]
    fn unknown_message_is_not_handled() {
        let f = fixture();
        assert!(!f.dispatcher.dispatch("window-focused", &payload(100, "Finder")));
        assert!(!f.dispatcher.dispatch("", &[]));
        assert!(f.registry.is_empty());
        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.ax.created(), 0);
    }

    #[test]
    fn hidden_and_unhidden_are_not_handled() {
        let f = fixture();
        assert!(!f.dispatcher.dispatch("application-hidden", &payload(100, "Finder")));
        assert!(!f.dispatcher.dispatch("application-unhidden", &payload(100, "Finder")));
        assert!(f.registry.is_empty());
    }

    #[test]
    fn space_changed_is_handled_without_state_change() {
        let f = fixture();
        assert!(f.dispatcher.dispatch("space-changed", &[]));
        assert!(f.registry.is_empty());
        assert_eq!(f.scheduler.pending(), 0);
    }

    #[test]
    fn malformed_payload_is_reported_and_not_handled() {
        let f = fixture();
        assert!(!f.dispatcher.dispatch("application-launched", &[1, 2, 3]));
        assert!(f.registry.is_empty());
        assert_eq!(
            f.reports.try_recv(),
            Ok(Degradation::MalformedPayload {
                message: Message::ApplicationLaunched,
                error: PayloadError::TooShort(3),
            })
        );
    }

    #[test]
    fn construction_failure_is_handled_without_registering() {
        let f = fixture();
        f.ax.fail_construction(100);
        assert!(f.dispatcher.dispatch("application-launched", &payload(100, "Finder")));
        assert!(f.registry.is_empty());
        assert_eq!(f.scheduler.pending(), 0);
    }
}
