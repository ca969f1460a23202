//! Versioned `DonationConfig` snapshots with change notification.
//!
//! Readers take an `Arc` snapshot and keep it for the whole transaction, so
//! a reload never changes settings half way through a donation and no lock
//! is held while a gateway call is in flight.

use super::DonationConfig;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Shared holder of the current [`DonationConfig`].
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<ConfigStoreInner>,
}

struct ConfigStoreInner {
    current: RwLock<Arc<DonationConfig>>,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is replaced.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

// -- ConfigStore --------------------------------------------------------

impl ConfigStore {
    pub fn new(initial: DonationConfig) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                current: RwLock::new(Arc::new(initial)),
                version_tx,
            }),
        }
    }

    /// The configuration in force right now.
    pub fn snapshot(&self) -> Arc<DonationConfig> {
        match self.inner.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new configuration and notify watchers.
    ///
    /// Snapshots taken earlier keep the old values.
    pub fn replace(&self, config: DonationConfig) -> u64 {
        let config = Arc::new(config);
        match self.inner.current.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        let mut version = 0;
        self.inner.version_tx.send_modify(|v| {
            *v += 1;
            version = *v;
        });
        version
    }

    pub fn version(&self) -> u64 {
        *self.inner.version_tx.borrow()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

// -- ConfigWatcher ------------------------------------------------------

impl ConfigWatcher {
    /// Wait until the store is replaced.
    ///
    /// Returns `Err` once the [`ConfigStore`] has been dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.version_rx.changed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshots_survive_replacement() {
        let store = ConfigStore::new(DonationConfig::default());
        let mut watcher = store.subscribe();
        let before = store.snapshot();

        let version = store.replace(DonationConfig {
            retry_loop_count: 7,
            ..DonationConfig::default()
        });

        watcher.changed().await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.version(), 1);
        assert_eq!(before.retry_loop_count, 3);
        assert_eq!(store.snapshot().retry_loop_count, 7);
    }
}
