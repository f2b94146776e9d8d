pub mod accessibility;
pub mod event_tap;
pub mod run_loop;
pub mod scheduler;
