use super::QueueError;
use async_trait::async_trait;
use dgw_sdk::objects::StatusSource;
use dgw_sdk::objects::{FinalStatus, OrderId};

/// Result of a compare-and-set on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// This caller moved the order to the new status.
    Recorded { previous: Option<FinalStatus> },
    /// The order already had this status, or may not leave its status.
    Unchanged(FinalStatus),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

/// The single source of truth for an order's final status.
///
/// `record` must be atomic per order: when two callers race to finalize the
/// same order, exactly one of them sees [`RecordOutcome::Recorded`].
///
/// Each recorded status also carries an announced flag. Recording a new
/// status clears it; the finalizer sets it once the status has reached the
/// downstream queues. A status that is recorded but not announced is owed a
/// publish by whoever finalizes the order next.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    async fn current(&self, order_id: &OrderId) -> Result<Option<FinalStatus>, QueueError>;

    async fn record(
        &self,
        order_id: &OrderId,
        status: FinalStatus,
        source: StatusSource,
    ) -> Result<RecordOutcome, QueueError>;

    /// Whether the current status has been published downstream.
    async fn is_announced(&self, order_id: &OrderId) -> Result<bool, QueueError>;

    /// Flag `status` as published. A no-op when the order has since moved
    /// to another status.
    async fn mark_announced(
        &self,
        order_id: &OrderId,
        status: FinalStatus,
    ) -> Result<(), QueueError>;
}

/// Shared transition decision for ledger implementations.
pub(super) fn decide(
    current: Option<FinalStatus>,
    status: FinalStatus,
    source: StatusSource,
) -> RecordOutcome {
    match current {
        Some(current) if current == status => RecordOutcome::Unchanged(current),
        Some(current) if !FinalStatus::can_transition(Some(current), status, source) => {
            RecordOutcome::Unchanged(current)
        }
        previous => RecordOutcome::Recorded { previous },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revised_orders_can_settle_synchronously() {
        assert_eq!(
            decide(
                Some(FinalStatus::Revised),
                FinalStatus::Complete,
                StatusSource::Synchronous
            ),
            RecordOutcome::Recorded {
                previous: Some(FinalStatus::Revised)
            }
        );
    }

    #[test]
    fn repeating_a_status_is_unchanged() {
        assert_eq!(
            decide(
                Some(FinalStatus::Pending),
                FinalStatus::Pending,
                StatusSource::Asynchronous
            ),
            RecordOutcome::Unchanged(FinalStatus::Pending)
        );
        assert_eq!(
            decide(
                Some(FinalStatus::Cancelled),
                FinalStatus::Complete,
                StatusSource::Asynchronous
            ),
            RecordOutcome::Unchanged(FinalStatus::Cancelled)
        );
    }
}
