//! A directory-backed broker.
//!
//! Each topic is a directory of `{ulid}.json` files. Publishing writes to a hidden temp
//! file and renames it into place, so readers never see a partial message. Consuming
//! renames the file into the topic's `inflight/` directory; whichever consumer wins the
//! rename owns the message. Acking deletes it, nacking moves it back.
//!
//! On open, anything left in `inflight/` by a crashed worker is moved back to the topic,
//! which makes delivery at-least-once until acknowledged.

use std::{
    fmt,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use postern_common::internal;
use tokio::{fs, sync::Notify};
use ulid::{Generator, Ulid};

use crate::{
    broker::{Broker, Delivery},
    error::QueueError,
    topic::Topic,
};

const EXTENSION: &str = "json";
const INFLIGHT: &str = "inflight";

pub struct FileBroker {
    root: PathBuf,
    poll_interval: Duration,
    notify: Notify,
    ids: Mutex<Generator>,
}

impl fmt::Debug for FileBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBroker")
            .field("root", &self.root)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl FileBroker {
    /// Open (creating if needed) a broker rooted at `root`, restoring in-flight messages.
    ///
    /// # Errors
    /// If `root` contains `..` components or the directories cannot be prepared
    pub async fn open(root: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, QueueError> {
        let root = root.into();
        if root.components().any(|c| c == Component::ParentDir) {
            return Err(QueueError::Config(format!(
                "queue path cannot contain '..' components: {}",
                root.display()
            )));
        }

        let broker = Self {
            root,
            poll_interval,
            notify: Notify::new(),
            ids: Mutex::new(Generator::new()),
        };

        for topic in Topic::ALL {
            fs::create_dir_all(broker.inflight_dir(topic)).await?;
            broker.recover(topic).await?;
        }

        internal!(level = INFO, "Queue opened at {}", broker.root.display());

        Ok(broker)
    }

    fn topic_dir(&self, topic: Topic) -> PathBuf {
        self.root.join(topic.name())
    }

    fn inflight_dir(&self, topic: Topic) -> PathBuf {
        self.topic_dir(topic).join(INFLIGHT)
    }

    /// Ids from one broker sort in publish order, even within a millisecond.
    fn next_id(&self) -> Ulid {
        self.ids.lock().generate().unwrap_or_else(|_| Ulid::new())
    }

    fn file_name(id: Ulid) -> String {
        format!("{id}.{EXTENSION}")
    }

    fn parse_name(path: &Path) -> Option<Ulid> {
        if path.extension()? != EXTENSION {
            return None;
        }
        Ulid::from_string(path.file_stem()?.to_str()?).ok()
    }

    async fn queued(dir: &Path) -> Result<Vec<Ulid>, QueueError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = Self::parse_name(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn recover(&self, topic: Topic) -> Result<(), QueueError> {
        let dir = self.topic_dir(topic);
        let inflight = self.inflight_dir(topic);

        let mut restored = 0;
        for id in Self::queued(&inflight).await? {
            let name = Self::file_name(id);
            fs::rename(inflight.join(&name), dir.join(&name)).await?;
            restored += 1;
        }

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                fs::remove_file(entry.path()).await?;
            }
        }

        if restored > 0 {
            internal!(level = INFO, "Restored {restored} in-flight messages to {topic}");
        }

        Ok(())
    }

    /// The payload is read before the claiming rename, so a consumer dropped
    /// mid-claim leaves the message queued. Only a drop while the rename itself
    /// completes strands it in `inflight/`, and reopening restores it.
    async fn try_claim(&self, topic: Topic) -> Result<Option<Delivery>, QueueError> {
        let dir = self.topic_dir(topic);
        let inflight = self.inflight_dir(topic);

        for id in Self::queued(&dir).await? {
            let name = Self::file_name(id);
            let queued = dir.join(&name);

            let payload = match fs::read(&queued).await {
                Ok(payload) => payload,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            match fs::rename(&queued, inflight.join(&name)).await {
                Ok(()) => return Ok(Some(Delivery { id, topic, payload })),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Broker for FileBroker {
    #[tracing::instrument(level = "trace", skip(self, payload), fields(size = payload.len()))]
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<Ulid, QueueError> {
        let id = self.next_id();
        let dir = self.topic_dir(topic);
        let temp = dir.join(format!(".{id}.tmp"));

        fs::write(&temp, &payload).await?;
        fs::rename(&temp, dir.join(Self::file_name(id))).await?;

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn consume(&self, topic: Topic) -> Result<Delivery, QueueError> {
        loop {
            let notified = self.notify.notified();

            if let Some(delivery) = self.try_claim(topic).await? {
                return Ok(delivery);
            }

            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let path = self
            .inflight_dir(delivery.topic)
            .join(Self::file_name(delivery.id));

        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(QueueError::NotInFlight(delivery.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let name = Self::file_name(delivery.id);

        match fs::rename(
            self.inflight_dir(delivery.topic).join(&name),
            self.topic_dir(delivery.topic).join(&name),
        )
        .await
        {
            Ok(()) => {
                self.notify.notify_waiters();
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(QueueError::NotInFlight(delivery.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn pending(&self, topic: Topic) -> Result<usize, QueueError> {
        Ok(Self::queued(&self.topic_dir(topic)).await?.len())
    }
}
