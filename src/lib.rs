pub mod actor;
pub mod common;
pub mod model;
pub mod plugin;
pub mod sys;

#[cfg(test)]
mod testing;

pub use plugin::{Backends, InitError, PLUGIN_NAME, PLUGIN_VERSION, Plugin};
