use std::sync::{Arc, LazyLock};

use futures_util::future::join_all;
use postern_account::{Authenticator, Datastore, DkimSigner, Resolver};
use postern_common::{Signal, internal, listener::Listener, logging};
use postern_delivery::{HickoryMx, MxResolver, SenderPool, check_reverse_dns};
use postern_queue::{Broker, Publisher};
use postern_smtp::{Services, Smtp, rdns::DnsReverseLookup, spf::MailAuthSpf};
use tokio::sync::broadcast;

use crate::config::{DATABASE_URL_ENV, Postern};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM, then tell everything to stop.
///
/// Returns once a second CTRL+C arrives, or never, leaving the caller's other
/// branch to finish as tasks wind down.
#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Postern {
    async fn datastore(&self) -> anyhow::Result<Arc<dyn Datastore>> {
        let url = std::env::var(DATABASE_URL_ENV).ok();
        Ok(self.datastore.connect(url).await?)
    }

    fn services(&self, store: &Arc<dyn Datastore>, broker: Arc<dyn Broker>) -> anyhow::Result<Services> {
        Ok(Services {
            resolver: Arc::new(Resolver::new(Arc::clone(store), &self.cache)),
            signer: Arc::new(DkimSigner::new(Arc::clone(store), self.dkim.selector.clone(), &self.cache)),
            authenticator: Arc::new(Authenticator::new(Arc::clone(store), &self.cache)),
            publisher: Publisher::new(broker),
            spf: Arc::new(MailAuthSpf::from_system_conf(self.hostname())?),
            rdns: Arc::new(DnsReverseLookup::from_system_conf()?),
        })
    }

    /// Run the inbound and submission listeners until shutdown.
    ///
    /// # Errors
    /// If a dependency cannot be opened, a listener is misconfigured or fails
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve(self) -> anyhow::Result<()> {
        logging::init();

        if self.smtp.is_empty() {
            anyhow::bail!("No SMTP listeners configured");
        }

        let store = self.datastore().await?;
        let broker = self.queue.open().await?;
        let smtp = Arc::new(Smtp::new(&self.services(&store, broker)?));

        let listeners: Vec<Listener<Smtp>> = self
            .smtp
            .into_iter()
            .map(|config| Listener::new(Arc::clone(&smtp), config))
            .collect();

        internal!("Initialising {} SMTP listener(s)", listeners.len());
        listeners.iter().try_for_each(Listener::init)?;

        let serving = join_all(
            listeners
                .iter()
                .map(|listener| listener.serve(SHUTDOWN_BROADCAST.subscribe())),
        );

        let ret = tokio::select! {
            results = serving => results.into_iter().try_for_each(|result| result).map_err(Into::into),
            r = shutdown() => r,
        };

        internal!(level = INFO, "Shutting down...");
        ret
    }

    /// Run the sender workers until shutdown.
    ///
    /// Fails before consuming anything if a binding's reverse DNS does not match.
    ///
    /// # Errors
    /// On invalid delivery settings, a reverse DNS mismatch or a broker failure
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn send(self) -> anyhow::Result<()> {
        logging::init();

        let delivery = &self.delivery;
        delivery.validate()?;

        check_reverse_dns(&delivery.bindings, &DnsReverseLookup::from_system_conf()?).await?;

        let broker = self.queue.open().await?;
        let lookup = Arc::new(HickoryMx::from_system_conf(&delivery.mx)?);
        let mx = Arc::new(MxResolver::new(lookup, delivery.mx));
        let pool = SenderPool::new(delivery, &mx, &Publisher::new(broker));

        internal!(level = INFO, "Starting {} sender worker(s) on {}", pool.len(), delivery.queue);

        let ret = tokio::select! {
            r = pool.run(&SHUTDOWN_BROADCAST) => r.map_err(Into::into),
            r = shutdown() => r,
        };

        internal!(level = INFO, "Shutting down...");
        ret
    }
}
