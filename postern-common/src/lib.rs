pub mod address;
pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod logging;
pub mod record;
pub mod status;
pub mod traits;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
