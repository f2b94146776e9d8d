pub mod application;
pub mod registry;
pub mod server;
