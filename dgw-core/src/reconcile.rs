//! Finalization: the one place an order's final status is recorded and
//! announced.
//!
//! Every path that settles an order (synchronous gateway reply, donor
//! return, gateway notification, orphan sweep) goes through
//! [`Finalizer::finalize`]. The ledger compare-and-set decides who wins;
//! the winner publishes and then flags the status as announced. A status
//! left unannounced by a failed publish is published by the next caller to
//! finalize the same order.

use crate::queue::{DonationQueue, QueueError, QueueName, RecordOutcome, StatusLedger};
use dgw_sdk::objects::{FinalStatus, QueueMessage, StatusSource};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Field carrying the final status on published records.
pub const FINAL_STATUS_FIELD: &str = "payments_final_status";

/// Fields copied onto the `payments-init` record.
const INIT_FIELDS: [&str; 12] = [
    "amount",
    "currency_code",
    "country",
    "payment_method",
    "payment_submethod",
    "gateway_txn_id",
    "risk_score",
    "validation_action",
    "language",
    "utm_source",
    "utm_medium",
    "utm_campaign",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call recorded and published the status.
    Finalized { previous: Option<FinalStatus> },
    /// The order was already settled but never published; this call
    /// published the recorded status.
    Republished(FinalStatus),
    /// The order already holds this status or a terminal one.
    AlreadyFinal(FinalStatus),
}

impl FinalizeOutcome {
    /// The status the order ended up with.
    pub fn status(&self, attempted: FinalStatus) -> FinalStatus {
        match self {
            Self::Finalized { .. } => attempted,
            Self::Republished(status) | Self::AlreadyFinal(status) => *status,
        }
    }
}

/// Whether the `payments-init` record may be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitRecord {
    BestEffort,
    Required,
}

#[derive(Clone)]
pub struct Finalizer {
    queue: DonationQueue,
    ledger: Arc<dyn StatusLedger>,
}

impl Finalizer {
    pub fn new(queue: DonationQueue, ledger: Arc<dyn StatusLedger>) -> Self {
        Self { queue, ledger }
    }

    pub fn ledger(&self) -> &dyn StatusLedger {
        self.ledger.as_ref()
    }

    /// Settle `message.order_id` on `status`.
    ///
    /// The staged limbo copy, if any, is merged under `message` and removed
    /// only after the critical publish went through, so a failed publish
    /// leaves the donor record in limbo and the ledger status unannounced.
    /// Finalizing an order whose status is recorded but unannounced
    /// publishes the recorded status instead of `status`.
    pub async fn finalize(
        &self,
        limbo: &QueueName,
        message: QueueMessage,
        status: FinalStatus,
        source: StatusSource,
        init: InitRecord,
    ) -> Result<FinalizeOutcome, QueueError> {
        let order_id = message.order_id.clone();

        let (settled, outcome) = match self.ledger.record(&order_id, status, source).await? {
            RecordOutcome::Recorded { previous } => {
                (status, FinalizeOutcome::Finalized { previous })
            }
            RecordOutcome::Unchanged(existing) => {
                if self.ledger.is_announced(&order_id).await? {
                    info!(
                        order_id = %order_id,
                        status = %existing,
                        attempted = %status,
                        "Order already finalized, ignoring"
                    );
                    // A pending order keeps its limbo copy for the final settlement.
                    if existing.is_terminal()
                        && self.queue.take(limbo, &order_id).await?.is_some()
                    {
                        debug!(order_id = %order_id, "Cleared leftover limbo entry");
                    }
                    return Ok(FinalizeOutcome::AlreadyFinal(existing));
                }
                warn!(
                    order_id = %order_id,
                    status = %existing,
                    attempted = %status,
                    "Order finalized but never announced, publishing again"
                );
                (existing, FinalizeOutcome::Republished(existing))
            }
        };

        self.announce(limbo, message, settled, init).await?;
        self.ledger.mark_announced(&order_id, settled).await?;
        self.queue.take(limbo, &order_id).await?;
        debug!(order_id = %order_id, status = %settled, "Order finalized");
        Ok(outcome)
    }

    async fn announce(
        &self,
        limbo: &QueueName,
        message: QueueMessage,
        status: FinalStatus,
        init: InitRecord,
    ) -> Result<(), QueueError> {
        let order_id = message.order_id.clone();
        let staged = self.queue.peek(limbo, &order_id).await?;
        let record = merge(staged, message).with_field(FINAL_STATUS_FIELD, status.as_str());

        let critical = match status {
            FinalStatus::Complete => Some(QueueName::Completed),
            FinalStatus::Pending => Some(QueueName::Pending),
            _ => None,
        };
        if let Some(queue) = critical {
            if let Err(e) = self.queue.publish(&queue, record.clone()).await {
                error!(
                    order_id = %order_id,
                    queue = %queue,
                    status = %status,
                    error = %e,
                    "Failed to publish finalized donation, limbo entry kept"
                );
                return Err(e);
            }
        }

        let init_message = init_record(&record);
        match init {
            InitRecord::Required => {
                self.queue
                    .publish_required(&QueueName::Init, init_message)
                    .await?;
            }
            InitRecord::BestEffort => {
                self.queue.publish(&QueueName::Init, init_message).await?;
            }
        }
        Ok(())
    }
}

/// Staged fields first, newer fields on top.
fn merge(staged: Option<QueueMessage>, message: QueueMessage) -> QueueMessage {
    match staged {
        Some(mut staged) => {
            staged.fields.extend(message.fields);
            staged.date = message.date;
            staged
        }
        None => message,
    }
}

fn init_record(record: &QueueMessage) -> QueueMessage {
    let fields = INIT_FIELDS
        .iter()
        .chain(std::iter::once(&FINAL_STATUS_FIELD))
        .filter_map(|name| record.field(name).map(|v| ((*name).to_owned(), v.to_owned())))
        .collect();
    QueueMessage::new(
        record.order_id.clone(),
        record.gateway.clone(),
        record.date,
        fields,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueueBackend, InMemoryStatusLedger, QueueBackend, QueueRoutes};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn setup() -> (Finalizer, InMemoryQueueBackend, InMemoryStatusLedger) {
        let backend = InMemoryQueueBackend::new();
        let ledger = InMemoryStatusLedger::new();
        let queue = DonationQueue::new(
            Arc::new(backend.clone()),
            QueueRoutes::default(),
            Duration::from_secs(1),
        );
        (
            Finalizer::new(queue, Arc::new(ledger.clone())),
            backend,
            ledger,
        )
    }

    fn message(order: &str, fields: &[(&str, &str)]) -> QueueMessage {
        let fields: BTreeMap<String, String> = fields
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        QueueMessage::new(order.parse().unwrap(), "test", 1_700_000_000, fields)
    }

    #[tokio::test]
    async fn complete_publishes_once_and_clears_limbo() {
        let (finalizer, backend, _ledger) = setup();
        backend
            .push(
                "limbo",
                message("o-1", &[("amount", "10.00"), ("first_name", "Ada")]),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            finalizer
                .finalize(
                    &QueueName::Limbo,
                    message("o-1", &[("gateway_txn_id", "T1")]),
                    FinalStatus::Complete,
                    StatusSource::Asynchronous,
                    InitRecord::BestEffort,
                )
                .await
                .unwrap();
        }

        let completed = backend.messages("completed").await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].field("amount"), Some("10.00"));
        assert_eq!(completed[0].field("gateway_txn_id"), Some("T1"));
        assert_eq!(completed[0].field("first_name"), None);
        assert_eq!(completed[0].field(FINAL_STATUS_FIELD), Some("complete"));
        assert_eq!(backend.messages("payments-init").await.len(), 1);
        assert!(backend.messages("limbo").await.is_empty());
    }

    #[tokio::test]
    async fn failed_only_writes_init_record() {
        let (finalizer, backend, ledger) = setup();
        let outcome = finalizer
            .finalize(
                &QueueName::Limbo,
                message("o-2", &[("amount", "3.00")]),
                FinalStatus::Failed,
                StatusSource::Synchronous,
                InitRecord::Required,
            )
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Finalized { previous: None });
        assert!(backend.messages("completed").await.is_empty());
        let init = backend.messages("payments-init").await;
        assert_eq!(init[0].field(FINAL_STATUS_FIELD), Some("failed"));
        assert_eq!(
            ledger.current(&"o-2".parse().unwrap()).await.unwrap(),
            Some(FinalStatus::Failed)
        );
    }

    #[tokio::test]
    async fn later_status_loses_to_terminal() {
        let (finalizer, backend, _ledger) = setup();
        let limbo = QueueName::Limbo;
        finalizer
            .finalize(
                &limbo,
                message("o-3", &[]),
                FinalStatus::Failed,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await
            .unwrap();
        let outcome = finalizer
            .finalize(
                &limbo,
                message("o-3", &[]),
                FinalStatus::Complete,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::AlreadyFinal(FinalStatus::Failed));
        assert_eq!(outcome.status(FinalStatus::Complete), FinalStatus::Failed);
        assert!(backend.messages("completed").await.is_empty());
    }

    #[tokio::test]
    async fn failed_critical_publish_keeps_limbo() {
        let backend = InMemoryQueueBackend::new();
        let queue = DonationQueue::new(
            Arc::new(backend.clone()),
            QueueRoutes::default().with_route("completed", ""),
            Duration::from_secs(1),
        );
        let finalizer = Finalizer::new(queue, Arc::new(InMemoryStatusLedger::new()));
        backend
            .push("limbo", message("o-4", &[("amount", "5.00")]))
            .await
            .unwrap();

        let result = finalizer
            .finalize(
                &QueueName::Limbo,
                message("o-4", &[]),
                FinalStatus::Complete,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await;
        assert!(matches!(result, Err(QueueError::Unroutable(_))));
        assert_eq!(backend.messages("limbo").await.len(), 1);
    }

    /// Fails the first `failures` pushes to `completed`.
    struct FlakyBackend {
        inner: InMemoryQueueBackend,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl QueueBackend for FlakyBackend {
        async fn push(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError> {
            use std::sync::atomic::Ordering;
            if queue == "completed"
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(QueueError::Timeout(Duration::from_secs(1)));
            }
            self.inner.push(queue, message).await
        }

        async fn peek(
            &self,
            queue: &str,
            order_id: &dgw_sdk::objects::OrderId,
        ) -> Result<Option<QueueMessage>, QueueError> {
            self.inner.peek(queue, order_id).await
        }

        async fn take(
            &self,
            queue: &str,
            order_id: &dgw_sdk::objects::OrderId,
        ) -> Result<Option<QueueMessage>, QueueError> {
            self.inner.take(queue, order_id).await
        }

        async fn older_than(
            &self,
            queue: &str,
            cutoff: i64,
            limit: usize,
        ) -> Result<Vec<QueueMessage>, QueueError> {
            self.inner.older_than(queue, cutoff, limit).await
        }
    }

    #[tokio::test]
    async fn unannounced_status_is_published_on_retry() {
        let backend = InMemoryQueueBackend::new();
        let ledger = InMemoryStatusLedger::new();
        let queue = DonationQueue::new(
            Arc::new(FlakyBackend {
                inner: backend.clone(),
                failures: 1.into(),
            }),
            QueueRoutes::default(),
            Duration::from_secs(1),
        );
        let finalizer = Finalizer::new(queue, Arc::new(ledger.clone()));
        let order = "o-5".parse().unwrap();
        backend
            .push("limbo", message("o-5", &[("amount", "7.00")]))
            .await
            .unwrap();

        let finalize = async || {
            finalizer
                .finalize(
                    &QueueName::Limbo,
                    message("o-5", &[("gateway_txn_id", "T5")]),
                    FinalStatus::Complete,
                    StatusSource::Asynchronous,
                    InitRecord::BestEffort,
                )
                .await
        };

        assert!(matches!(finalize().await, Err(QueueError::Timeout(_))));
        assert_eq!(ledger.current(&order).await.unwrap(), Some(FinalStatus::Complete));
        assert!(!ledger.is_announced(&order).await.unwrap());
        assert_eq!(backend.messages("limbo").await.len(), 1);

        assert_eq!(
            finalize().await.unwrap(),
            FinalizeOutcome::Republished(FinalStatus::Complete)
        );
        assert!(ledger.is_announced(&order).await.unwrap());
        let completed = backend.messages("completed").await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].field("amount"), Some("7.00"));
        assert!(backend.messages("limbo").await.is_empty());

        assert_eq!(
            finalize().await.unwrap(),
            FinalizeOutcome::AlreadyFinal(FinalStatus::Complete)
        );
        assert_eq!(backend.messages("completed").await.len(), 1);
    }

    #[tokio::test]
    async fn losing_status_publishes_the_recorded_one() {
        let backend = InMemoryQueueBackend::new();
        let ledger = InMemoryStatusLedger::new();
        let queue = DonationQueue::new(
            Arc::new(FlakyBackend {
                inner: backend.clone(),
                failures: 1.into(),
            }),
            QueueRoutes::default(),
            Duration::from_secs(1),
        );
        let finalizer = Finalizer::new(queue, Arc::new(ledger.clone()));

        let first = finalizer
            .finalize(
                &QueueName::Limbo,
                message("o-6", &[]),
                FinalStatus::Complete,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await;
        assert!(first.is_err());

        let late = finalizer
            .finalize(
                &QueueName::Limbo,
                message("o-6", &[]),
                FinalStatus::Failed,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await
            .unwrap();
        assert_eq!(late, FinalizeOutcome::Republished(FinalStatus::Complete));
        let completed = backend.messages("completed").await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].field(FINAL_STATUS_FIELD), Some("complete"));
    }

    #[tokio::test]
    async fn settled_order_clears_leftover_limbo() {
        let (finalizer, backend, _ledger) = setup();
        finalizer
            .finalize(
                &QueueName::Limbo,
                message("o-7", &[]),
                FinalStatus::Failed,
                StatusSource::Synchronous,
                InitRecord::Required,
            )
            .await
            .unwrap();
        backend
            .push("limbo", message("o-7", &[("amount", "9.00")]))
            .await
            .unwrap();

        let outcome = finalizer
            .finalize(
                &QueueName::Limbo,
                message("o-7", &[]),
                FinalStatus::Pending,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::AlreadyFinal(FinalStatus::Failed));
        assert!(backend.messages("limbo").await.is_empty());
        assert!(backend.messages("pending").await.is_empty());
        assert_eq!(backend.messages("payments-init").await.len(), 1);
    }
}
