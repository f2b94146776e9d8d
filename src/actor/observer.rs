use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::notification::{AxNotification, NotificationRouter};
use crate::common::report::{Degradation, Reporter};
use crate::model::application::{AttachOutcome, pid_t};
use crate::model::registry::Registry;
use crate::sys::accessibility::AxError;
use crate::sys::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
    /// The application terminated before the task ran.
    Gone,
    Failed(AxError),
}

/// Attaches the notification router to newly launched applications once
/// they have had time to settle.
#[derive(Clone)]
pub struct ObserverManager {
    registry: Arc<Registry>,
    scheduler: Arc<dyn Scheduler>,
    router: Arc<NotificationRouter>,
    reporter: Reporter,
}

impl ObserverManager {
    pub fn new(
        registry: Arc<Registry>,
        scheduler: Arc<dyn Scheduler>,
        router: Arc<NotificationRouter>,
        reporter: Reporter,
    ) -> Self {
        ObserverManager { registry, scheduler, router, reporter }
    }

    /// Queues a subscription attempt for `pid` after `delay`. The task looks
    /// the pid up again when it runs, so a terminate in the meantime turns it
    /// into a no-op.
    pub fn schedule_subscription(&self, pid: pid_t, delay: Duration) {
        debug!(pid, ?delay, "scheduling observer subscription");
        let this = self.clone();
        self.scheduler.schedule_after(
            delay,
            Box::new(move || {
                this.subscribe_now(pid);
            }),
        );
    }

    pub fn subscribe_now(&self, pid: pid_t) -> SubscribeOutcome {
        let Some(app) = self.registry.lookup(pid) else {
            debug!(pid, "application gone before observer could attach");
            return SubscribeOutcome::Gone;
        };

        let callback = self.router.callback_for(app.info().clone());
        match app.attach_observer(&AxNotification::names(), callback) {
            Ok(AttachOutcome::Attached) => {
                info!(pid, name = app.name(), "subscribed to notifications");
                SubscribeOutcome::Subscribed
            }
            Ok(AttachOutcome::AlreadyAttached) => {
                debug!(pid, name = app.name(), "observer already attached");
                SubscribeOutcome::AlreadySubscribed
            }
            Ok(AttachOutcome::Destroyed) => {
                debug!(pid, name = app.name(), "application destroyed while subscribing");
                SubscribeOutcome::Gone
            }
            Err(error) => {
                warn!(pid, name = app.name(), %error, "could not subscribe to notifications");
                self.reporter.report(Degradation::ObserverAttachFailed {
                    pid,
                    name: app.name().to_string(),
                    error,
                });
                SubscribeOutcome::Failed(error)
            }
        }
    }
}
