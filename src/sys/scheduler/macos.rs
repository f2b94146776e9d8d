use std::time::Duration;

use dispatchr::queue;
use dispatchr::time::Time;

use super::{Scheduler, Task};

/// Schedules onto the main dispatch queue, which the host services from
/// its main run loop. That is also where accessibility observers deliver,
/// so subscriptions and notifications never race each other.
#[derive(Debug, Default)]
pub struct MainQueue;

impl Scheduler for MainQueue {
    fn schedule_after(&self, delay: Duration, task: Task) {
        let delay_ns = i64::try_from(delay.as_nanos()).unwrap_or(i64::MAX);
        queue::main().after_f_s(Time::new_after(Time::NOW, delay_ns), task, |task| task());
    }
}

/// Drops `value` on the main queue, after main-thread work already queued.
pub fn release_on_main<T: Send + 'static>(value: T) {
    queue::main().after_f_s(Time::NOW, value, |value| drop(value));
}
