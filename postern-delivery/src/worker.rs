//! Sender workers: consume envelopes, deliver them and record the outcome.

use std::{sync::Arc, time::Duration};

use postern_common::{
    Signal,
    envelope::{Envelope, EnvelopeKind},
    internal,
    record::{Entry, Metric},
};
use postern_queue::{Broker, Delivery, Publisher, QueueError, Topic, decode_envelope};
use postern_smtp::rdns::ReverseLookup;
use tokio::{sync::broadcast, task::JoinSet, time::MissedTickBehavior};

use crate::{
    config::{Binding, DeliveryConfig},
    dns::MxResolver,
    engine::DeliveryEngine,
    error::DeliveryError,
};

/// How one consumed message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Bounced(String),
    /// The payload was not an envelope.
    Discarded,
}

#[derive(Debug)]
pub struct SenderWorker {
    name: String,
    engine: DeliveryEngine,
    publisher: Publisher,
    topic: Topic,
    pacing: Duration,
}

impl SenderWorker {
    pub fn new(
        name: impl Into<String>,
        engine: DeliveryEngine,
        publisher: Publisher,
        topic: Topic,
        pacing: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            publisher,
            topic,
            pacing,
        }
    }

    fn broker(&self) -> &Arc<dyn Broker> {
        self.publisher.broker()
    }

    /// Deliver at most one envelope per pacing interval until shutdown.
    ///
    /// A delivery in progress always runs to completion.
    ///
    /// # Errors
    /// When the broker can no longer be consumed from
    pub async fn run(self, mut signal: broadcast::Receiver<Signal>) -> Result<(), QueueError> {
        internal!(level = INFO, "{} :: consuming {}", self.name, self.topic);

        let mut ticker = tokio::time::interval(self.pacing);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = signal.recv() => break,
                _ = ticker.tick() => {}
            }

            let delivery = tokio::select! {
                biased;
                _ = signal.recv() => break,
                delivery = self.broker().consume(self.topic) => delivery?,
            };

            if let Err(err) = self.process(&delivery).await {
                internal!(level = ERROR, "{} :: {} not recorded: {err}", self.name, delivery.id);
                if let Err(err) = self.broker().nack(&delivery).await {
                    internal!(level = ERROR, "{} :: unable to return {}: {err}", self.name, delivery.id);
                }
            }
        }

        internal!(level = INFO, "{} :: stopped", self.name);
        Ok(())
    }

    /// Send one consumed message, publish its log records and acknowledge it.
    ///
    /// # Errors
    /// If the records cannot be published or the message acknowledged. The message
    /// is left unacknowledged in that case.
    pub async fn process(&self, delivery: &Delivery) -> Result<Outcome, QueueError> {
        let mut envelope = match decode_envelope(delivery) {
            Ok(envelope) => envelope,
            Err(err) => {
                internal!(level = ERROR, "{} :: discarding {}: {err}", self.name, delivery.id);
                self.broker().ack(delivery).await?;
                return Ok(Outcome::Discarded);
            }
        };

        internal!(
            level = INFO,
            "{} :: TRY :: {} ({} -> {} -> {})",
            self.name,
            envelope.id,
            envelope.from,
            envelope.via,
            envelope.to
        );

        let outcome = match self.engine.deliver(&envelope).await {
            Ok((server, reply)) => {
                envelope.status = reply;
                internal!(
                    level = INFO,
                    "{} :: SND :: {} via {} [{}]",
                    self.name,
                    envelope.id,
                    server.host,
                    envelope.status
                );
                self.publisher.entry(&Entry::sent(&envelope)).await?;
                Outcome::Sent
            }
            Err(err) => {
                let reason = err.to_string();
                internal!(level = WARN, "{} :: BNC :: {} [{reason}]", self.name, envelope.id);
                self.record_bounce(&mut envelope, &reason).await?;
                Outcome::Bounced(reason)
            }
        };

        self.broker().ack(delivery).await?;
        Ok(outcome)
    }

    async fn record_bounce(&self, envelope: &mut Envelope, reason: &str) -> Result<(), QueueError> {
        envelope.status = reason.to_string();
        envelope.bounce = Some(reason.to_string());

        self.publisher.entry(&Entry::bounced(envelope)).await?;
        self.publisher.bounce(envelope).await?;

        if envelope.kind == EnvelopeKind::Forward {
            self.publisher
                .metric(&Metric::inbound_bounce(envelope, reason))
                .await?;
        }

        Ok(())
    }
}

/// Fail unless every binding's address has a PTR record naming its rdns.
///
/// # Errors
/// [`DeliveryError::ReverseDns`] for the first binding that does not match
pub async fn check_reverse_dns(
    bindings: &[Binding],
    lookup: &dyn ReverseLookup,
) -> Result<(), DeliveryError> {
    for binding in bindings {
        let found = lookup.lookup(binding.ip).await;
        if !found
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&binding.rdns))
        {
            return Err(DeliveryError::ReverseDns {
                ip: binding.ip,
                expected: binding.rdns.clone(),
                found,
            });
        }

        internal!(level = INFO, "{} resolves to {}", binding.ip, binding.rdns);
    }

    Ok(())
}

/// All workers for a configuration, sharing one MX cache.
#[derive(Debug)]
pub struct SenderPool {
    workers: Vec<SenderWorker>,
}

impl SenderPool {
    pub fn new(config: &DeliveryConfig, mx: &Arc<MxResolver>, publisher: &Publisher) -> Self {
        let topic = Topic::Emails(config.queue);

        let workers = config
            .bindings
            .iter()
            .flat_map(|binding| {
                let engine = DeliveryEngine::new(
                    Arc::clone(mx),
                    binding.ip,
                    config.helo_for(binding),
                    config.timeouts,
                )
                .accept_invalid_certs(config.accept_invalid_certs);

                (0..config.workers.max(1)).map(move |index| {
                    SenderWorker::new(
                        format!("{}#{index}", binding.rdns),
                        engine.clone(),
                        publisher.clone(),
                        topic,
                        config.pacing(),
                    )
                })
            })
            .collect();

        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run every worker until shutdown.
    ///
    /// # Errors
    /// The first broker failure that stopped a worker
    pub async fn run(self, signal: &broadcast::Sender<Signal>) -> Result<(), QueueError> {
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            tasks.spawn(worker.run(signal.subscribe()));
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    internal!(level = ERROR, "Sender worker failed: {err}");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
                Err(err) => internal!(level = ERROR, "Sender worker panicked: {err}"),
            }
        }

        result
    }
}
