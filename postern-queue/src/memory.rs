use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use ulid::Ulid;

use crate::{
    broker::{Broker, Delivery},
    error::QueueError,
    topic::Topic,
};

#[derive(Debug, Default)]
struct Queues {
    waiting: HashMap<Topic, VecDeque<(Ulid, Vec<u8>)>>,
    inflight: HashMap<Ulid, (Topic, Vec<u8>)>,
}

/// An in-process broker. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<Queues>,
    notify: Notify,
}

impl MemoryBroker {
    /// Payloads currently waiting on `topic`, oldest first.
    pub fn waiting(&self, topic: Topic) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .waiting
            .get(&topic)
            .map(|queue| queue.iter().map(|(_, payload)| payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.queues.lock().inflight.len()
    }

    /// Wait until at least `count` messages are waiting on `topic`, or the timeout passes.
    pub async fn wait_for_count(&self, topic: Topic, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();

            if self.waiting(topic).len() >= count {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.waiting(topic).len() >= count;
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<Ulid, QueueError> {
        let id = Ulid::new();
        self.queues
            .lock()
            .waiting
            .entry(topic)
            .or_default()
            .push_back((id, payload));

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn consume(&self, topic: Topic) -> Result<Delivery, QueueError> {
        loop {
            let notified = self.notify.notified();

            {
                let mut queues = self.queues.lock();
                if let Some((id, payload)) = queues
                    .waiting
                    .get_mut(&topic)
                    .and_then(VecDeque::pop_front)
                {
                    queues.inflight.insert(id, (topic, payload.clone()));
                    return Ok(Delivery { id, topic, payload });
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.queues
            .lock()
            .inflight
            .remove(&delivery.id)
            .map(|_| ())
            .ok_or(QueueError::NotInFlight(delivery.id))
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        {
            let mut queues = self.queues.lock();
            let (topic, payload) = queues
                .inflight
                .remove(&delivery.id)
                .ok_or(QueueError::NotInFlight(delivery.id))?;
            queues
                .waiting
                .entry(topic)
                .or_default()
                .push_front((delivery.id, payload));
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn pending(&self, topic: Topic) -> Result<usize, QueueError> {
        Ok(self
            .queues
            .lock()
            .waiting
            .get(&topic)
            .map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use pretty_assertions::assert_eq;

    use super::MemoryBroker;
    use crate::{broker::Broker, topic::Topic};

    #[tokio::test]
    async fn claimed_messages_wait_for_ack() {
        let broker = MemoryBroker::default();
        broker.publish(Topic::Logs, b"entry".to_vec()).await.unwrap();

        let delivery = broker.consume(Topic::Logs).await.unwrap();
        assert_eq!(broker.pending(Topic::Logs).await.unwrap(), 0);
        assert_eq!(broker.in_flight(), 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
        assert!(broker.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn wait_for_count_sees_later_publishes() {
        let broker = Arc::new(MemoryBroker::default());

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(Topic::Metrics, b"m".to_vec()).await.unwrap();
        });

        assert!(broker.wait_for_count(Topic::Metrics, 1, Duration::from_secs(5)).await);
        assert!(!broker.wait_for_count(Topic::Metrics, 2, Duration::from_millis(20)).await);
    }
}
