pub mod daemon;
pub mod dispatcher;
pub mod event_tap;
pub mod notification;
pub mod observer;
