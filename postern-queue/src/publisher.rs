use std::sync::Arc;

use postern_common::{
    envelope::Envelope,
    record::{Entry, Metric},
};
use serde::Serialize;

use crate::{
    broker::{Broker, Delivery},
    error::QueueError,
    topic::Topic,
};

/// Publishes typed records as JSON on their topics.
#[derive(Debug, Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub const fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    async fn publish<T: Serialize + Sync>(&self, topic: Topic, record: &T) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(record)?;
        self.broker.publish(topic, payload).await?;
        Ok(())
    }

    /// Queue an envelope for delivery on its tier.
    ///
    /// # Errors
    /// If the broker rejects the message
    pub async fn envelope(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.publish(Topic::Emails(envelope.queue_level), envelope).await
    }

    /// # Errors
    /// If the broker rejects the message
    pub async fn bounce(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.publish(Topic::Bounces, envelope).await
    }

    /// # Errors
    /// If the broker rejects the message
    pub async fn entry(&self, entry: &Entry) -> Result<(), QueueError> {
        self.publish(Topic::Logs, entry).await
    }

    /// # Errors
    /// If the broker rejects the message
    pub async fn metric(&self, metric: &Metric) -> Result<(), QueueError> {
        self.publish(Topic::Metrics, metric).await
    }
}

/// Decode a consumed envelope.
///
/// # Errors
/// If the payload is not an envelope
pub fn decode_envelope(delivery: &Delivery) -> Result<Envelope, QueueError> {
    Ok(serde_json::from_slice(&delivery.payload)?)
}
