pub mod broker;
pub mod config;
pub mod error;
pub mod file;
pub mod memory;
pub mod publisher;
pub mod topic;

pub use broker::{Broker, Delivery};
pub use config::QueueConfig;
pub use error::QueueError;
pub use file::FileBroker;
pub use memory::MemoryBroker;
pub use publisher::{Publisher, decode_envelope};
pub use topic::Topic;
