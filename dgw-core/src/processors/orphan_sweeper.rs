//! The OrphanSweeper is responsible for:
//! - Scanning a gateway's limbo queue for entries older than the horizon
//! - Asking the gateway what became of each one
//! - Finalizing known outcomes and moving the rest to `pending`
//! - Clearing entries the ledger already holds as terminal, publishing
//!   their status first if that never went out

use crate::config::{ConfigStore, ConfigWatcher};
use crate::gateway::GatewayAdapter;
use crate::queue::DonationQueue;
use crate::reconcile::{FinalizeOutcome, Finalizer, InitRecord};
use crate::utils::unix_now;
use dgw_sdk::objects::{FinalStatus, QueueMessage, StatusSource};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    /// Settled as complete, failed or cancelled.
    pub finalized: usize,
    pub moved_to_pending: usize,
    /// Already settled and published elsewhere; limbo copy cleared.
    pub already_final: usize,
    /// Settled earlier but never published; published this pass.
    pub republished: usize,
    /// Could not be handled this pass; retried on the next.
    pub errors: usize,
}

pub struct OrphanSweeper<G: GatewayAdapter + ?Sized> {
    gateway: Arc<G>,
    queue: DonationQueue,
    finalizer: Finalizer,
    config: ConfigStore,
    config_watcher: ConfigWatcher,
    shutdown_rx: watch::Receiver<bool>,
}

impl<G: GatewayAdapter + ?Sized> OrphanSweeper<G> {
    pub fn new(
        gateway: Arc<G>,
        queue: DonationQueue,
        finalizer: Finalizer,
        config: ConfigStore,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let config_watcher = config.subscribe();
        Self {
            gateway,
            queue,
            finalizer,
            config,
            config_watcher,
            shutdown_rx,
        }
    }

    fn interval(&self) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(self.config.snapshot().orphans.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        let gateway = self.gateway.name().to_owned();
        let mut interval = self.interval();
        info!(gateway = %gateway, "OrphanSweeper started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(gateway = %gateway, "OrphanSweeper shutting down");
                        break;
                    }
                }

                Ok(()) = self.config_watcher.changed() => {
                    interval = self.interval();
                    info!(
                        gateway = %gateway,
                        interval_secs = self.config.snapshot().orphans.interval.as_secs(),
                        "OrphanSweeper picked up new configuration"
                    );
                }

                _ = interval.tick() => {
                    if !self.config.snapshot().orphans.enabled {
                        debug!(gateway = %gateway, "Orphan sweep disabled");
                        continue;
                    }
                    let report = self.sweep_once(unix_now()).await;
                    if report.examined > 0 {
                        info!(
                            gateway = %gateway,
                            examined = report.examined,
                            finalized = report.finalized,
                            moved_to_pending = report.moved_to_pending,
                            already_final = report.already_final,
                            republished = report.republished,
                            errors = report.errors,
                            "Orphan sweep pass complete"
                        );
                    } else {
                        debug!(gateway = %gateway, "Orphan sweep found nothing");
                    }
                }
            }
        }

        info!(gateway = %gateway, "OrphanSweeper shutdown complete");
    }

    /// One pass over limbo entries older than the horizon, as of `now`.
    pub async fn sweep_once(&self, now: i64) -> SweepReport {
        let config = self.config.snapshot();
        let limbo = self.gateway.limbo_queue();
        let cutoff = now - config.orphans.horizon.as_secs() as i64;
        let mut report = SweepReport::default();

        let entries = match self
            .queue
            .older_than(&limbo, cutoff, config.orphans.max_per_execute)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(gateway = self.gateway.name(), queue = %limbo, error = %e, "Failed to list limbo entries");
                report.errors += 1;
                return report;
            }
        };

        for entry in entries {
            report.examined += 1;
            let order_id = entry.order_id.clone();

            let settled = match self.finalizer.ledger().current(&order_id).await {
                Ok(status) => status.filter(|s| s.is_terminal()),
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "Failed to read final status");
                    report.errors += 1;
                    continue;
                }
            };

            let (status, message) = match settled {
                // Settled elsewhere: the gateway is not asked again.
                Some(status) => (status, entry),
                None => {
                    let known = match self
                        .gateway
                        .query_status(&order_id, config.gateway_timeout)
                        .await
                    {
                        Ok(mapped) => mapped.and_then(|m| {
                            let status = m.outcome.final_status()?;
                            Some((status, m.gateway_txn_id))
                        }),
                        Err(e) => {
                            warn!(
                                order_id = %order_id,
                                gateway = self.gateway.name(),
                                error = %e,
                                "Gateway status query failed, retrying next pass"
                            );
                            report.errors += 1;
                            continue;
                        }
                    };
                    match known {
                        Some((status, txn_id)) => (status, with_txn_id(entry, txn_id)),
                        None => (FinalStatus::Pending, entry),
                    }
                }
            };

            match self
                .finalizer
                .finalize(
                    &limbo,
                    message,
                    status,
                    StatusSource::Asynchronous,
                    InitRecord::BestEffort,
                )
                .await
            {
                Ok(FinalizeOutcome::Finalized { .. }) if status == FinalStatus::Pending => {
                    info!(order_id = %order_id, gateway = self.gateway.name(), "Orphan moved to pending");
                    report.moved_to_pending += 1;
                }
                Ok(FinalizeOutcome::Finalized { .. }) => {
                    info!(
                        order_id = %order_id,
                        gateway = self.gateway.name(),
                        status = %status,
                        "Orphan finalized from gateway status"
                    );
                    report.finalized += 1;
                }
                Ok(FinalizeOutcome::Republished(existing)) => {
                    warn!(
                        order_id = %order_id,
                        gateway = self.gateway.name(),
                        status = %existing,
                        "Published settled order that was never announced"
                    );
                    report.republished += 1;
                }
                Ok(FinalizeOutcome::AlreadyFinal(_)) => {
                    debug!(order_id = %order_id, "Cleared limbo entry for settled order");
                    report.already_final += 1;
                }
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "Failed to finalize orphan");
                    report.errors += 1;
                }
            }
        }

        report
    }
}

fn with_txn_id(entry: QueueMessage, txn_id: Option<String>) -> QueueMessage {
    match txn_id {
        Some(id) => entry.with_field("gateway_txn_id", id),
        None => entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DonationConfig;
    use crate::donation::{DonationData, FieldMap};
    use crate::fraud::VerificationResult;
    use crate::gateway::{
        GatewayError, GatewayFlow, GatewayOutcome, GatewayRequest, MappedResponse, RawResponse,
        RequestOptions, TransportError,
    };
    use crate::queue::{
        InMemoryQueueBackend, InMemoryStatusLedger, QueueBackend, QueueRoutes, StatusLedger,
    };
    use async_trait::async_trait;
    use dgw_sdk::objects::{GatewayNotification, OrderId};
    use std::collections::HashMap;
    use std::time::Duration;

    const NOW: i64 = 1_800_000_000;

    /// Knows the outcome of some orders and nothing about the rest.
    struct StatusOnlyGateway {
        known: HashMap<String, GatewayOutcome>,
    }

    #[async_trait]
    impl GatewayAdapter for StatusOnlyGateway {
        fn name(&self) -> &str {
            "status"
        }
        fn flow(&self) -> GatewayFlow {
            GatewayFlow::Redirect
        }
        fn supports_currency(&self, _currency: &str) -> bool {
            true
        }
        fn required_fields(&self) -> &[&'static str] {
            &[]
        }
        fn build_request(
            &self,
            _data: &DonationData,
            _options: &RequestOptions,
        ) -> Result<GatewayRequest, GatewayError> {
            Err(GatewayError::Request("unused".to_owned()))
        }
        async fn send(
            &self,
            _request: &GatewayRequest,
            _timeout: Duration,
        ) -> Result<RawResponse, TransportError> {
            Err(TransportError::Timeout)
        }
        fn map_response(&self, _response: &RawResponse) -> Result<MappedResponse, GatewayError> {
            Err(GatewayError::Malformed("unused".to_owned()))
        }
        fn verify_notification(
            &self,
            _notification: &GatewayNotification,
        ) -> Result<MappedResponse, GatewayError> {
            Err(GatewayError::Unsigned)
        }
        async fn query_status(
            &self,
            order_id: &OrderId,
            _timeout: Duration,
        ) -> Result<Option<MappedResponse>, GatewayError> {
            Ok(self.known.get(order_id.as_str()).map(|outcome| MappedResponse {
                outcome: outcome.clone(),
                gateway_txn_id: Some(format!("T-{order_id}")),
                verification: VerificationResult::default(),
            }))
        }
    }

    struct Harness {
        sweeper: OrphanSweeper<StatusOnlyGateway>,
        backend: InMemoryQueueBackend,
        ledger: InMemoryStatusLedger,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness(known: &[(&str, GatewayOutcome)]) -> Harness {
        let backend = InMemoryQueueBackend::new();
        let ledger = InMemoryStatusLedger::new();
        let queue = DonationQueue::new(
            Arc::new(backend.clone()),
            QueueRoutes::default(),
            Duration::from_secs(1),
        );
        let finalizer = Finalizer::new(queue.clone(), Arc::new(ledger.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gateway = StatusOnlyGateway {
            known: known
                .iter()
                .map(|(id, outcome)| ((*id).to_owned(), outcome.clone()))
                .collect(),
        };
        Harness {
            sweeper: OrphanSweeper::new(
                Arc::new(gateway),
                queue,
                finalizer,
                ConfigStore::new(DonationConfig::default()),
                shutdown_rx,
            ),
            backend,
            ledger,
            _shutdown_tx: shutdown_tx,
        }
    }

    async fn stage(backend: &InMemoryQueueBackend, order: &str, age_secs: i64) {
        let fields = FieldMap::from([("amount".to_owned(), "10.00".to_owned())]);
        backend
            .push(
                "limbo",
                QueueMessage::new(order.parse().unwrap(), "status", NOW - age_secs, fields),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_orphan_moves_to_pending_exactly_once() {
        let h = harness(&[]);
        stage(&h.backend, "orphan", 30 * 60).await;

        let first = h.sweeper.sweep_once(NOW).await;
        assert_eq!(first.moved_to_pending, 1);
        let second = h.sweeper.sweep_once(NOW + 600).await;
        assert_eq!(second, SweepReport::default());

        assert_eq!(h.backend.messages("pending").await.len(), 1);
        assert!(h.backend.messages("limbo").await.is_empty());
    }

    #[tokio::test]
    async fn test_young_entries_are_left_alone() {
        let h = harness(&[]);
        stage(&h.backend, "fresh", 5 * 60).await;

        let report = h.sweeper.sweep_once(NOW).await;
        assert_eq!(report.examined, 0);
        assert_eq!(h.backend.messages("limbo").await.len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_outcome_is_finalized() {
        let h = harness(&[
            ("paid", GatewayOutcome::Approved),
            (
                "refused",
                GatewayOutcome::Declined {
                    code: "05".to_owned(),
                    message: "refused".to_owned(),
                },
            ),
        ]);
        stage(&h.backend, "paid", 3600).await;
        stage(&h.backend, "refused", 3600).await;

        let report = h.sweeper.sweep_once(NOW).await;
        assert_eq!(report.finalized, 2);

        let completed = h.backend.messages("completed").await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].field("gateway_txn_id"), Some("T-paid"));
        assert_eq!(
            h.ledger.current(&"refused".parse().unwrap()).await.unwrap(),
            Some(FinalStatus::Failed)
        );
        assert!(h.backend.messages("pending").await.is_empty());
    }

    #[tokio::test]
    async fn test_settled_entry_is_cleared_not_resettled() {
        let h = harness(&[("done", GatewayOutcome::Cancelled)]);
        stage(&h.backend, "done", 3600).await;
        let order: OrderId = "done".parse().unwrap();
        h.ledger
            .record(&order, FinalStatus::Complete, StatusSource::Synchronous)
            .await
            .unwrap();
        h.ledger
            .mark_announced(&order, FinalStatus::Complete)
            .await
            .unwrap();

        let report = h.sweeper.sweep_once(NOW).await;
        assert_eq!(report.already_final, 1);
        assert!(h.backend.messages("limbo").await.is_empty());
        assert!(h.backend.messages("pending").await.is_empty());
        assert!(h.backend.messages("completed").await.is_empty());
        assert_eq!(
            h.ledger.current(&order).await.unwrap(),
            Some(FinalStatus::Complete)
        );

        let again = h.sweeper.sweep_once(NOW + 600).await;
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn test_unannounced_settlement_is_published() {
        let h = harness(&[]);
        stage(&h.backend, "lost", 3600).await;
        let order: OrderId = "lost".parse().unwrap();
        h.ledger
            .record(&order, FinalStatus::Complete, StatusSource::Asynchronous)
            .await
            .unwrap();

        let report = h.sweeper.sweep_once(NOW).await;
        assert_eq!(report.republished, 1);
        let completed = h.backend.messages("completed").await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].field("amount"), Some("10.00"));
        assert!(h.backend.messages("limbo").await.is_empty());
        assert!(h.ledger.is_announced(&order).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(&[]);
        let Harness {
            sweeper,
            _shutdown_tx: shutdown_tx,
            ..
        } = h;
        let handle = tokio::spawn(sweeper.run());
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
