use std::fmt::Debug;

use async_trait::async_trait;
use ulid::Ulid;

use crate::{error::QueueError, topic::Topic};

/// A message handed to exactly one consumer. It stays claimed until acked or nacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: Ulid,
    pub topic: Topic,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Broker: Debug + Send + Sync {
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<Ulid, QueueError>;

    /// Wait for and claim the oldest message on `topic`.
    async fn consume(&self, topic: Topic) -> Result<Delivery, QueueError>;

    /// Finish with a claimed message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return a claimed message to its topic for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Messages waiting on `topic`, not counting claimed ones.
    async fn pending(&self, topic: Topic) -> Result<usize, QueueError>;
}
