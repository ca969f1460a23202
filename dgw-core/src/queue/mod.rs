//! Durable handoff of transaction snapshots.
//!
//! The `DonationQueue` is responsible for:
//! - Resolving logical queues (`completed`, `pending`, `limbo`, ...) to
//!   backend names, where an empty name disables a queue
//! - Refusing to drop messages for critical queues
//! - Keeping limbo-only PII out of every non-limbo queue
//! - Bounding every backend call by a timeout

mod ledger;
mod memory;
mod postgres;

pub use ledger::{RecordOutcome, StatusLedger};
pub use memory::{InMemoryQueueBackend, InMemoryStatusLedger};
pub use postgres::{PgQueueBackend, PgStatusLedger};

use crate::config::DonationConfig;
use crate::donation::fields;
use async_trait::async_trait;
use dgw_sdk::objects::{OrderId, QueueMessage};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    /// A critical queue has no backend name.
    #[error("queue {0} is not configured")]
    Unroutable(String),

    #[error("queue operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The ledger holds a status this build does not know.
    #[error("corrupt ledger entry for {order_id}: {status}")]
    Ledger { order_id: OrderId, status: String },
}

/// Logical queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueName {
    Completed,
    Pending,
    Limbo,
    /// Card limbo owned by one gateway, `<gateway>-cc-limbo`.
    GatewayLimbo(String),
    Antifraud,
    Init,
}

impl QueueName {
    pub fn key(&self) -> String {
        match self {
            Self::Completed => "completed".to_owned(),
            Self::Pending => "pending".to_owned(),
            Self::Limbo => "limbo".to_owned(),
            Self::GatewayLimbo(gateway) => format!("{gateway}-cc-limbo"),
            Self::Antifraud => "payments-antifraud".to_owned(),
            Self::Init => "payments-init".to_owned(),
        }
    }

    pub fn is_limbo(&self) -> bool {
        matches!(self, Self::Limbo | Self::GatewayLimbo(_))
    }

    /// Losing a message on a critical queue loses a donation.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Pending | Self::Limbo | Self::GatewayLimbo(_)
        )
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Logical queue key to backend queue name. Keys without an entry map to
/// themselves; an empty name disables the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueRoutes {
    routes: BTreeMap<String, String>,
}

impl QueueRoutes {
    pub fn with_route(mut self, key: &str, backend_name: &str) -> Self {
        self.routes
            .insert(key.to_owned(), backend_name.trim().to_owned());
        self
    }

    pub fn resolve(&self, queue: &QueueName) -> Option<String> {
        let key = queue.key();
        match self.routes.get(&key) {
            Some(name) if name.is_empty() => None,
            Some(name) => Some(name.clone()),
            None => Some(key),
        }
    }
}

/// A store of named message queues.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError>;

    /// Oldest message for `order_id`, left in place.
    async fn peek(&self, queue: &str, order_id: &OrderId)
    -> Result<Option<QueueMessage>, QueueError>;

    /// Remove every message for `order_id`, returning the oldest.
    async fn take(&self, queue: &str, order_id: &OrderId)
    -> Result<Option<QueueMessage>, QueueError>;

    /// Messages queued before `cutoff` (unix seconds), oldest first.
    async fn older_than(
        &self,
        queue: &str,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QueueError>;
}

/// What happened to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Delivered,
    /// The queue is disabled or best-effort delivery failed.
    Dropped,
}

/// Routing, scrubbing and timeouts in front of a [`QueueBackend`].
#[derive(Clone)]
pub struct DonationQueue {
    backend: Arc<dyn QueueBackend>,
    routes: QueueRoutes,
    timeout: Duration,
}

impl DonationQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, routes: QueueRoutes, timeout: Duration) -> Self {
        Self {
            backend,
            routes,
            timeout,
        }
    }

    pub fn from_config(backend: Arc<dyn QueueBackend>, config: &DonationConfig) -> Self {
        Self::new(backend, config.queues.clone(), config.queue_timeout)
    }

    /// Publish to `queue`. Failures on critical queues are errors; on other
    /// queues they are logged and reported as [`Published::Dropped`].
    pub async fn publish(
        &self,
        queue: &QueueName,
        message: QueueMessage,
    ) -> Result<Published, QueueError> {
        self.publish_inner(queue, message, queue.is_critical())
            .await
    }

    /// Publish to `queue`, treating it as critical whatever its kind.
    pub async fn publish_required(
        &self,
        queue: &QueueName,
        message: QueueMessage,
    ) -> Result<Published, QueueError> {
        self.publish_inner(queue, message, true).await
    }

    async fn publish_inner(
        &self,
        queue: &QueueName,
        mut message: QueueMessage,
        required: bool,
    ) -> Result<Published, QueueError> {
        let Some(name) = self.routes.resolve(queue) else {
            if required {
                return Err(QueueError::Unroutable(queue.key()));
            }
            debug!(queue = %queue, order_id = %message.order_id, "Queue disabled, message dropped");
            return Ok(Published::Dropped);
        };

        if !queue.is_limbo() {
            message.fields.retain(|name, _| !fields::is_limbo_only(name));
        }

        let order_id = message.order_id.clone();
        match self.bounded(self.backend.push(&name, message)).await {
            Ok(()) => {
                debug!(queue = %queue, order_id = %order_id, "Message published");
                Ok(Published::Delivered)
            }
            Err(e) if !required => {
                warn!(queue = %queue, order_id = %order_id, error = %e, "Best-effort publish failed");
                Ok(Published::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    /// Put the full donor record into a limbo queue, replacing any earlier
    /// entry for the same order.
    pub async fn stage_limbo(
        &self,
        queue: &QueueName,
        message: QueueMessage,
    ) -> Result<(), QueueError> {
        let Some(name) = self.routes.resolve(queue) else {
            return Err(QueueError::Unroutable(queue.key()));
        };
        self.bounded(self.backend.take(&name, &message.order_id))
            .await?;
        self.publish_required(queue, message).await?;
        Ok(())
    }

    pub async fn peek(
        &self,
        queue: &QueueName,
        order_id: &OrderId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        match self.routes.resolve(queue) {
            Some(name) => self.bounded(self.backend.peek(&name, order_id)).await,
            None => Ok(None),
        }
    }

    pub async fn take(
        &self,
        queue: &QueueName,
        order_id: &OrderId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        match self.routes.resolve(queue) {
            Some(name) => self.bounded(self.backend.take(&name, order_id)).await,
            None => Ok(None),
        }
    }

    pub async fn older_than(
        &self,
        queue: &QueueName,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        match self.routes.resolve(queue) {
            Some(name) => {
                self.bounded(self.backend.older_than(&name, cutoff, limit))
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, QueueError>>,
    ) -> Result<T, QueueError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| QueueError::Timeout(self.timeout))?
    }
}
