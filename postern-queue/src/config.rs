use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{broker::Broker, error::QueueError, file::FileBroker, memory::MemoryBroker};

#[derive(Debug, Clone, Default, Deserialize)]
pub enum QueueConfig {
    File {
        path: PathBuf,
        /// How often consumers re-scan for messages published by other processes
        #[serde(default = "default_poll_millis")]
        poll_millis: u64,
    },
    #[default]
    Memory,
}

const fn default_poll_millis() -> u64 {
    500
}

impl QueueConfig {
    /// # Errors
    /// If a file broker cannot prepare its directories
    pub async fn open(&self) -> Result<Arc<dyn Broker>, QueueError> {
        match self {
            Self::File { path, poll_millis } => Ok(Arc::new(
                FileBroker::open(path.clone(), Duration::from_millis(*poll_millis)).await?,
            )),
            Self::Memory => Ok(Arc::new(MemoryBroker::default())),
        }
    }
}
