pub mod config;
pub mod controller;

pub use config::{Postern, find_config_file};
pub use controller::SHUTDOWN_BROADCAST;
