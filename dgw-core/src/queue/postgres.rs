//! Postgres-backed queue and ledger.
//!
//! Tables are created by the worker's migrations:
//! `donation_queue_messages` holds queued messages as JSONB and
//! `donation_final_status` holds one row per finalized order.

use super::ledger::decide;
use super::{QueueBackend, QueueError, RecordOutcome, StatusLedger};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use dgw_sdk::objects::{FinalStatus, OrderId, QueueMessage, StatusSource};
use kanau::processor::Processor;
use sqlx::types::Json;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Queue queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
/// Append a message to a queue.
pub struct PushQueueMessage {
    pub queue: String,
    pub message: QueueMessage,
}

impl Processor<PushQueueMessage> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PushQueueMessage")]
    async fn process(&self, insert: PushQueueMessage) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO donation_queue_messages (queue, order_id, queued_at, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&insert.queue)
        .bind(insert.message.order_id.as_str())
        .bind(insert.message.date)
        .bind(Json(&insert.message))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Oldest message for an order, left in place.
pub struct PeekQueueMessage {
    pub queue: String,
    pub order_id: OrderId,
}

impl Processor<PeekQueueMessage> for DatabaseProcessor {
    type Output = Option<QueueMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PeekQueueMessage")]
    async fn process(&self, query: PeekQueueMessage) -> Result<Option<QueueMessage>, sqlx::Error> {
        let body: Option<Json<QueueMessage>> = sqlx::query_scalar(
            r#"
            SELECT body
            FROM donation_queue_messages
            WHERE queue = $1 AND order_id = $2
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(&query.queue)
        .bind(query.order_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(body.map(|Json(message)| message))
    }
}

#[derive(Debug, Clone)]
/// Delete every message for an order, returning the oldest.
pub struct TakeQueueMessage {
    pub queue: String,
    pub order_id: OrderId,
}

impl Processor<TakeQueueMessage> for DatabaseProcessor {
    type Output = Option<QueueMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TakeQueueMessage")]
    async fn process(&self, cmd: TakeQueueMessage) -> Result<Option<QueueMessage>, sqlx::Error> {
        let mut removed: Vec<(i64, Json<QueueMessage>)> = sqlx::query_as(
            r#"
            DELETE FROM donation_queue_messages
            WHERE queue = $1 AND order_id = $2
            RETURNING id, body
            "#,
        )
        .bind(&cmd.queue)
        .bind(cmd.order_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        removed.sort_by_key(|(id, _)| *id);
        Ok(removed.into_iter().next().map(|(_, Json(message))| message))
    }
}

#[derive(Debug, Clone)]
/// Messages queued before a cutoff, oldest first.
pub struct ListAgedQueueMessages {
    pub queue: String,
    pub cutoff: i64,
    pub limit: i64,
}

impl Processor<ListAgedQueueMessages> for DatabaseProcessor {
    type Output = Vec<QueueMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListAgedQueueMessages")]
    async fn process(&self, query: ListAgedQueueMessages) -> Result<Vec<QueueMessage>, sqlx::Error> {
        let bodies: Vec<Json<QueueMessage>> = sqlx::query_scalar(
            r#"
            SELECT body
            FROM donation_queue_messages
            WHERE queue = $1 AND queued_at < $2
            ORDER BY queued_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(&query.queue)
        .bind(query.cutoff)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(bodies.into_iter().map(|Json(message)| message).collect())
    }
}

// ---------------------------------------------------------------------------
// Ledger queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GetFinalStatus {
    pub order_id: OrderId,
}

impl Processor<GetFinalStatus> for DatabaseProcessor {
    type Output = Option<FinalStatus>;
    type Error = QueueError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetFinalStatus")]
    async fn process(&self, query: GetFinalStatus) -> Result<Option<FinalStatus>, QueueError> {
        let status: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT status
            FROM donation_final_status
            WHERE order_id = $1
            "#,
        )
        .bind(query.order_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        parse_status(&query.order_id, status.flatten())
    }
}

#[derive(Debug, Clone)]
/// Compare-and-set an order's final status.
///
/// A placeholder row is inserted first so the `FOR UPDATE` lock serialises
/// concurrent finalizers of the same order.
pub struct RecordFinalStatus {
    pub order_id: OrderId,
    pub status: FinalStatus,
    pub source: StatusSource,
}

impl Processor<RecordFinalStatus> for DatabaseProcessor {
    type Output = RecordOutcome;
    type Error = QueueError;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordFinalStatus")]
    async fn process(&self, cmd: RecordFinalStatus) -> Result<RecordOutcome, QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO donation_final_status (order_id, status)
            VALUES ($1, NULL)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(cmd.order_id.as_str())
        .execute(&mut *tx)
        .await?;

        let current: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status
            FROM donation_final_status
            WHERE order_id = $1
            FOR UPDATE
            "#,
        )
        .bind(cmd.order_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let current = parse_status(&cmd.order_id, current)?;

        let outcome = decide(current, cmd.status, cmd.source);
        if outcome.is_recorded() {
            sqlx::query(
                r#"
                UPDATE donation_final_status
                SET status = $2, announced = FALSE, updated_at = NOW()
                WHERE order_id = $1
                "#,
            )
            .bind(cmd.order_id.as_str())
            .bind(cmd.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }
}

#[derive(Debug, Clone)]
pub struct IsFinalStatusAnnounced {
    pub order_id: OrderId,
}

impl Processor<IsFinalStatusAnnounced> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IsFinalStatusAnnounced")]
    async fn process(&self, query: IsFinalStatusAnnounced) -> Result<bool, sqlx::Error> {
        let announced: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT announced
            FROM donation_final_status
            WHERE order_id = $1
            "#,
        )
        .bind(query.order_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(announced.unwrap_or(false))
    }
}

#[derive(Debug, Clone)]
/// Flag a status as published, only while it is still the order's status.
pub struct MarkFinalStatusAnnounced {
    pub order_id: OrderId,
    pub status: FinalStatus,
}

impl Processor<MarkFinalStatusAnnounced> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkFinalStatusAnnounced")]
    async fn process(&self, cmd: MarkFinalStatusAnnounced) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE donation_final_status
            SET announced = TRUE, updated_at = NOW()
            WHERE order_id = $1 AND status = $2
            "#,
        )
        .bind(cmd.order_id.as_str())
        .bind(cmd.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_status(
    order_id: &OrderId,
    status: Option<String>,
) -> Result<Option<FinalStatus>, QueueError> {
    status
        .map(|s| {
            FinalStatus::from_str(&s).map_err(|_| QueueError::Ledger {
                order_id: order_id.clone(),
                status: s,
            })
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

/// [`QueueBackend`] over the `donation_queue_messages` table.
#[derive(Clone)]
pub struct PgQueueBackend {
    db: DatabaseProcessor,
}

impl PgQueueBackend {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QueueBackend for PgQueueBackend {
    async fn push(&self, queue: &str, message: QueueMessage) -> Result<(), QueueError> {
        self.db
            .process(PushQueueMessage {
                queue: queue.to_owned(),
                message,
            })
            .await?;
        Ok(())
    }

    async fn peek(
        &self,
        queue: &str,
        order_id: &OrderId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self
            .db
            .process(PeekQueueMessage {
                queue: queue.to_owned(),
                order_id: order_id.clone(),
            })
            .await?)
    }

    async fn take(
        &self,
        queue: &str,
        order_id: &OrderId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self
            .db
            .process(TakeQueueMessage {
                queue: queue.to_owned(),
                order_id: order_id.clone(),
            })
            .await?)
    }

    async fn older_than(
        &self,
        queue: &str,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        Ok(self
            .db
            .process(ListAgedQueueMessages {
                queue: queue.to_owned(),
                cutoff,
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await?)
    }
}

/// [`StatusLedger`] over the `donation_final_status` table.
#[derive(Clone)]
pub struct PgStatusLedger {
    db: DatabaseProcessor,
}

impl PgStatusLedger {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusLedger for PgStatusLedger {
    async fn current(&self, order_id: &OrderId) -> Result<Option<FinalStatus>, QueueError> {
        self.db
            .process(GetFinalStatus {
                order_id: order_id.clone(),
            })
            .await
    }

    async fn record(
        &self,
        order_id: &OrderId,
        status: FinalStatus,
        source: StatusSource,
    ) -> Result<RecordOutcome, QueueError> {
        self.db
            .process(RecordFinalStatus {
                order_id: order_id.clone(),
                status,
                source,
            })
            .await
    }

    async fn is_announced(&self, order_id: &OrderId) -> Result<bool, QueueError> {
        Ok(self
            .db
            .process(IsFinalStatusAnnounced {
                order_id: order_id.clone(),
            })
            .await?)
    }

    async fn mark_announced(
        &self,
        order_id: &OrderId,
        status: FinalStatus,
    ) -> Result<(), QueueError> {
        Ok(self
            .db
            .process(MarkFinalStatusAnnounced {
                order_id: order_id.clone(),
                status,
            })
            .await?)
    }
}
