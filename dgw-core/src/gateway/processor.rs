//! The generic donation driver.
//!
//! The driver is responsible for:
//! - Staging donor data and minting anti-forgery tokens
//! - Validation, currency fallback and fraud scoring
//! - Calling the gateway with bounded retries
//! - Staging limbo records and donor sessions for asynchronous returns
//! - Handing every settled attempt to the [`Finalizer`]

use super::{
    GatewayAdapter, GatewayOutcome, GatewayRequest, MappedResponse, OrchestrationError,
    RawResponse, RequestOptions, Transaction, TransactionState, TransportError,
};
use crate::config::DonationConfig;
use crate::currency::convert;
use crate::donation::{DonationData, FieldMap, ValidationContext, fields, messages, validate};
use crate::fraud::{FraudFilterChain, RiskAssessment, VerificationResult};
use crate::queue::{DonationQueue, QueueName, StatusLedger};
use crate::reconcile::{Finalizer, InitRecord};
use crate::result::{PaymentResult, TransactionResults};
use crate::session::{SessionRecord, SessionStore};
use crate::utils::{backoff::retry_delay, unix_now};
use dgw_sdk::objects::{FinalStatus, OrderId, QueueMessage, RiskAction, StatusSource};
use dgw_sdk::signature::mint_donor_token;
use itertools::Itertools;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Answer of [`DonationProcessor::validate_form`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormCheck {
    Proceed,
    /// Show the form again with the collected errors.
    Redisplay,
}

impl FormCheck {
    pub fn redisplay_form(self) -> bool {
        self == Self::Redisplay
    }
}

/// Drives donation attempts through one gateway.
pub struct DonationProcessor<G: GatewayAdapter + ?Sized> {
    pub(super) gateway: Arc<G>,
    pub(super) config: Arc<DonationConfig>,
    fraud: Arc<FraudFilterChain>,
    queue: DonationQueue,
    pub(super) sessions: Arc<dyn SessionStore>,
    pub(super) finalizer: Finalizer,
}

impl<G: GatewayAdapter + ?Sized> DonationProcessor<G> {
    pub fn new(
        gateway: Arc<G>,
        config: Arc<DonationConfig>,
        fraud: Arc<FraudFilterChain>,
        queue: DonationQueue,
        ledger: Arc<dyn StatusLedger>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let finalizer = Finalizer::new(queue.clone(), ledger);
        Self {
            gateway,
            config,
            fraud,
            queue,
            sessions,
            finalizer,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &DonationConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Staging and validation
    // ------------------------------------------------------------------

    /// Stage a new attempt from request data, the donor session and the
    /// gateway defaults, in that order of precedence.
    pub async fn begin(
        &self,
        request: &FieldMap,
        posted: bool,
    ) -> Result<Transaction, OrchestrationError> {
        let requested = request
            .get(fields::ORDER_ID)
            .and_then(|value| value.parse::<OrderId>().ok());
        let session = match &requested {
            Some(order_id) => self.sessions.get(order_id).await?,
            None => None,
        };
        let (session_fields, session_token) = match session {
            Some(record) => (record.donor, Some(record.token)),
            None => (FieldMap::new(), None),
        };

        let mut data = DonationData::stage(request, &session_fields, &self.gateway.defaults());
        let order_id = data.ensure_order_id();
        let token = session_token
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| mint_donor_token(&self.config.token_salt, &order_id));

        debug!(
            order_id = %order_id,
            gateway = self.gateway.name(),
            posted,
            "Transaction staged"
        );
        Ok(Transaction::new(
            self.gateway.name(),
            data,
            order_id,
            token,
            posted,
        ))
    }

    /// Validate the staged data and, if clean, run the fraud filters.
    ///
    /// Returns whether the transaction is now validated.
    pub async fn revalidate(&self, tx: &mut Transaction) -> Result<bool, OrchestrationError> {
        let gateway = self.gateway.as_ref();
        let supports = |currency: &str| gateway.supports_currency(currency);
        let ctx = ValidationContext {
            config: &self.config,
            required_fields: gateway.required_fields(),
            supports_currency: &supports,
            today: OffsetDateTime::now_utc().date(),
        };

        let errors = validate(tx.data(), &ctx);
        if !errors.is_empty() {
            debug!(
                order_id = %tx.order_id(),
                gateway = gateway.name(),
                fields = %errors.keys().join(","),
                "Donor data failed validation"
            );
            tx.set_field_errors(errors);
            if tx.state() == TransactionState::Validated {
                tx.advance(TransactionState::Initial)?;
            }
            return Ok(false);
        }
        tx.set_field_errors(Default::default());

        let mut risk = self.fraud.assess(tx.data()).await;
        if tx
            .data()
            .currency_code()
            .is_some_and(|currency| self.config.three_d_secure.requires(currency, tx.data().country()))
        {
            risk.require_three_d_secure();
        }
        info!(
            order_id = %tx.order_id(),
            gateway = gateway.name(),
            score = %risk.score,
            action = %risk.action,
            three_d_secure = risk.three_d_secure,
            "Fraud assessment"
        );
        self.queue
            .publish(&QueueName::Antifraud, self.antifraud_message(tx, &risk))
            .await?;
        tx.set_risk(risk);
        tx.advance(TransactionState::Validated)?;
        Ok(true)
    }

    /// Validate for form display, converting to the fallback currency once
    /// when the donor's currency is unsupported.
    pub async fn validate_form(
        &self,
        tx: &mut Transaction,
    ) -> Result<FormCheck, OrchestrationError> {
        if self.revalidate(tx).await? {
            return Ok(FormCheck::Proceed);
        }
        if !self.fall_back_to_default_currency(tx)? {
            return Ok(FormCheck::Redisplay);
        }

        let valid = self.revalidate(tx).await?;
        if valid && !self.config.notify_on_convert {
            return Ok(FormCheck::Proceed);
        }
        tx.add_notice(fields::GENERAL, messages::FALLBACK_CURRENCY_NOTICE);
        Ok(FormCheck::Redisplay)
    }

    /// Convert the amount into the fallback currency. Returns whether the
    /// donor data changed.
    fn fall_back_to_default_currency(
        &self,
        tx: &mut Transaction,
    ) -> Result<bool, OrchestrationError> {
        let Some(fallback) = self.config.fallback_currency() else {
            return Ok(false);
        };
        if !tx.field_errors().contains_key(fields::CURRENCY_CODE) {
            return Ok(false);
        }
        let (Some(current), Some(amount)) = (
            tx.data().currency_code().map(str::to_owned),
            tx.data().amount(),
        ) else {
            return Ok(false);
        };

        let gateway = self.gateway.name();
        if current == fallback || !self.gateway.supports_currency(&fallback) {
            error!(
                order_id = %tx.order_id(),
                gateway,
                currency = %current,
                fallback = %fallback,
                "Fallback currency is not supported by the gateway"
            );
            return Err(OrchestrationError::Configuration(format!(
                "fallback currency {fallback} is not supported by gateway {gateway}"
            )));
        }
        if !self.config.rates.contains(&fallback) {
            return Err(OrchestrationError::Configuration(format!(
                "fallback currency {fallback} has no exchange rate"
            )));
        }

        let converted = match convert(amount, &current, &fallback, &self.config.rates) {
            Ok(converted) => converted,
            Err(e) => {
                debug!(order_id = %tx.order_id(), error = %e, "Cannot convert to fallback currency");
                return Ok(false);
            }
        };

        tx.data_mut().add_request_data(FieldMap::from([
            (fields::AMOUNT.to_owned(), converted.to_string()),
            (fields::CURRENCY_CODE.to_owned(), fallback.clone()),
        ]))?;
        tx.set_final_status(FinalStatus::Revised, StatusSource::Synchronous);
        info!(
            order_id = %tx.order_id(),
            gateway,
            from = %current,
            to = %fallback,
            amount = %converted,
            "Unsupported currency converted to fallback"
        );
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Payment
    // ------------------------------------------------------------------

    /// Run the attempt against the gateway.
    pub async fn do_payment(
        &self,
        tx: &mut Transaction,
    ) -> Result<PaymentResult, OrchestrationError> {
        if tx.state() == TransactionState::Initial && !self.revalidate(tx).await? {
            return Ok(self.refresh(tx));
        }
        let risk = match (tx.state(), tx.risk()) {
            (TransactionState::Validated, Some(risk)) => risk.clone(),
            (from, _) => {
                return Err(OrchestrationError::InvalidTransition {
                    from,
                    to: TransactionState::Submitted,
                });
            }
        };

        if let Some(result) = self.already_settled(tx).await? {
            return Ok(result);
        }

        let order_id = tx.order_id().clone();
        let gateway = self.gateway.name();

        if risk.action == RiskAction::Reject {
            warn!(
                order_id = %order_id,
                gateway,
                score = %risk.score,
                "Donation rejected by fraud filters"
            );
            tx.add_error(fields::GENERAL, messages::PROCESSING_ERROR);
            return self
                .settle(tx, FinalStatus::Failed, StatusSource::Synchronous, InitRecord::BestEffort)
                .await;
        }

        let return_url = self.config.pages.return_url().map_err(|e| {
            OrchestrationError::Configuration(format!("invalid return url: {e}"))
        })?;
        let options = RequestOptions {
            order_id: order_id.clone(),
            three_d_secure: risk.action == RiskAction::Challenge,
            return_url,
        };
        let request = self.gateway.build_request(tx.data(), &options)?;

        self.stage_for_return(tx).await?;
        tx.advance(TransactionState::Submitted)?;
        info!(
            order_id = %order_id,
            gateway,
            amount = tx.data().get(fields::AMOUNT).unwrap_or_default(),
            currency = tx.data().currency_code().unwrap_or_default(),
            three_d_secure = options.three_d_secure,
            "Submitting donation to gateway"
        );

        let response = match self.send_with_retry(&request, &order_id).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    order_id = %order_id,
                    gateway,
                    error = %e,
                    attempts = self.config.retry_loop_count.max(1),
                    "Gateway unreachable, donation left in limbo for reconciliation"
                );
                tx.add_error(
                    messages::INTERNAL_GATEWAY_UNREACHABLE_CODE,
                    messages::INTERNAL_GATEWAY_UNREACHABLE,
                );
                tx.advance(TransactionState::AwaitingAsyncNotification)?;
                return Ok(self.refresh(tx));
            }
        };
        tx.advance(TransactionState::ResponseReceived)?;

        let mapped = match self.gateway.map_response(&response) {
            Ok(mapped) => mapped,
            Err(e) => {
                error!(
                    order_id = %order_id,
                    gateway,
                    http_status = response.status,
                    error = %e,
                    "Malformed gateway response"
                );
                tx.add_error(fields::GENERAL, messages::PROCESSING_ERROR);
                return self
                    .settle(tx, FinalStatus::Failed, StatusSource::Synchronous, InitRecord::Required)
                    .await;
            }
        };
        tx.set_gateway_txn_id(mapped.gateway_txn_id.clone());
        self.apply_response(tx, mapped).await
    }

    /// Orders the ledger holds as pending or terminal are answered from the
    /// ledger and never sent to the gateway again.
    async fn already_settled(
        &self,
        tx: &mut Transaction,
    ) -> Result<Option<PaymentResult>, OrchestrationError> {
        let status = match self.finalizer.ledger().current(tx.order_id()).await? {
            Some(status) if status.is_terminal() || status == FinalStatus::Pending => status,
            _ => return Ok(None),
        };
        warn!(
            order_id = %tx.order_id(),
            gateway = self.gateway.name(),
            status = %status,
            "Payment attempted for settled order, gateway not called"
        );
        tx.adopt_final_status(status);
        tx.set_results(TransactionResults {
            errors: tx.errors().clone(),
            redirect: None,
        });
        Ok(Some(PaymentResult::from_results(tx.results(), Some(status))))
    }

    async fn apply_response(
        &self,
        tx: &mut Transaction,
        mapped: MappedResponse,
    ) -> Result<PaymentResult, OrchestrationError> {
        let sync = StatusSource::Synchronous;
        match mapped.outcome {
            GatewayOutcome::Redirect { url } => {
                self.await_return(tx, url.clone(), PaymentResult::redirect(url))
                    .await
            }
            GatewayOutcome::Iframe { url } => {
                self.await_return(tx, url.clone(), PaymentResult::iframe(url))
                    .await
            }
            GatewayOutcome::Approved => {
                if self.rejected_after_auth(tx, &mapped.verification).await? {
                    self.cancel_authorisation(tx).await;
                    tx.add_error(fields::GENERAL, messages::PROCESSING_ERROR);
                    return self
                        .settle(tx, FinalStatus::Failed, sync, InitRecord::BestEffort)
                        .await;
                }
                self.settle(tx, FinalStatus::Complete, sync, InitRecord::BestEffort)
                    .await
            }
            GatewayOutcome::Pending => {
                self.settle(tx, FinalStatus::Pending, sync, InitRecord::BestEffort)
                    .await
            }
            GatewayOutcome::Declined { code, message } => {
                info!(
                    order_id = %tx.order_id(),
                    gateway = self.gateway.name(),
                    code = %code,
                    "Donation declined by gateway"
                );
                tx.add_error(&code, &message);
                self.settle(tx, FinalStatus::Failed, sync, InitRecord::BestEffort)
                    .await
            }
            GatewayOutcome::Cancelled => {
                self.settle(tx, FinalStatus::Cancelled, sync, InitRecord::BestEffort)
                    .await
            }
        }
    }

    /// Leave the attempt waiting for the donor to come back.
    async fn await_return(
        &self,
        tx: &mut Transaction,
        url: String,
        result: PaymentResult,
    ) -> Result<PaymentResult, OrchestrationError> {
        // Re-stage so the limbo copy carries the gateway transaction id.
        self.queue
            .stage_limbo(&self.gateway.limbo_queue(), self.record_for(tx))
            .await?;
        tx.advance(TransactionState::AwaitingAsyncNotification)?;
        debug!(
            order_id = %tx.order_id(),
            gateway = self.gateway.name(),
            "Donor handed to hosted page"
        );
        tx.set_results(TransactionResults {
            errors: Default::default(),
            redirect: Some(url),
        });
        Ok(result)
    }

    /// Re-score with the card verification results. Returns whether the
    /// donation must now be rejected.
    async fn rejected_after_auth(
        &self,
        tx: &mut Transaction,
        verification: &VerificationResult,
    ) -> Result<bool, OrchestrationError> {
        if verification.is_empty() {
            return Ok(false);
        }
        let post = match (self.gateway.response_codes(), tx.risk()) {
            (Some(codes), Some(prior)) => self.fraud.rescore(prior, codes.outcomes(verification)),
            _ => return Ok(false),
        };

        info!(
            order_id = %tx.order_id(),
            gateway = self.gateway.name(),
            score = %post.score,
            action = %post.action,
            "Post-authorisation fraud assessment"
        );
        self.queue
            .publish(&QueueName::Antifraud, self.antifraud_message(tx, &post))
            .await?;
        let rejected = post.action == RiskAction::Reject;
        tx.set_risk(post);
        Ok(rejected)
    }

    async fn cancel_authorisation(&self, tx: &Transaction) {
        let order_id = tx.order_id();
        match self
            .gateway
            .cancel(order_id, self.config.gateway_timeout)
            .await
        {
            Ok(()) => info!(order_id = %order_id, gateway = self.gateway.name(), "Authorisation cancelled"),
            Err(e) => error!(
                order_id = %order_id,
                gateway = self.gateway.name(),
                error = %e,
                "Failed to cancel authorisation"
            ),
        }
    }

    /// Send with up to `retry_loop_count` attempts. Only transport failures
    /// are retried.
    async fn send_with_retry(
        &self,
        request: &GatewayRequest,
        order_id: &OrderId,
    ) -> Result<RawResponse, TransportError> {
        let attempts = self.config.retry_loop_count.max(1);
        let timeout = self.config.gateway_timeout;
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(timeout, self.gateway.send(request, timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            match result {
                Ok(response) => return Ok(response),
                Err(e) if attempt + 1 < attempts => {
                    let delay = retry_delay(self.config.retry_backoff, attempt);
                    attempt += 1;
                    warn!(
                        order_id = %order_id,
                        gateway = self.gateway.name(),
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Gateway call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Record the outcome and build the caller's result.
    async fn settle(
        &self,
        tx: &mut Transaction,
        status: FinalStatus,
        source: StatusSource,
        init: InitRecord,
    ) -> Result<PaymentResult, OrchestrationError> {
        let outcome = self
            .finalizer
            .finalize(
                &self.gateway.limbo_queue(),
                self.record_for(tx),
                status,
                source,
                init,
            )
            .await?;
        let settled = outcome.status(status);
        tx.adopt_final_status(settled);
        tx.advance(if settled.is_terminal() {
            TransactionState::Finalized
        } else {
            TransactionState::AwaitingAsyncNotification
        })?;

        tx.set_results(TransactionResults {
            errors: tx.errors().clone(),
            redirect: None,
        });
        Ok(PaymentResult::from_results(tx.results(), tx.final_status()))
    }

    pub(super) fn refresh(&self, tx: &mut Transaction) -> PaymentResult {
        let errors = tx.display_errors();
        tx.set_results(TransactionResults {
            errors: errors.clone(),
            redirect: None,
        });
        PaymentResult::refresh(errors)
    }

    /// Stage the donor record in limbo and remember the donor for the return.
    async fn stage_for_return(&self, tx: &Transaction) -> Result<(), OrchestrationError> {
        self.queue
            .stage_limbo(&self.gateway.limbo_queue(), self.record_for(tx))
            .await?;
        self.store_session(tx).await
    }

    pub(super) async fn store_session(&self, tx: &Transaction) -> Result<(), OrchestrationError> {
        self.sessions
            .set(
                tx.order_id(),
                SessionRecord {
                    donor: tx.data().session_fields(),
                    token: tx.token().to_owned(),
                },
            )
            .await?;
        Ok(())
    }

    /// The donor record as published. Card number and CVV never leave the
    /// process.
    fn record_for(&self, tx: &Transaction) -> QueueMessage {
        let mut message = QueueMessage::new(
            tx.order_id().clone(),
            self.gateway.name(),
            unix_now(),
            tx.data().session_fields(),
        );
        if let Some(id) = tx.gateway_txn_id() {
            message = message.with_field("gateway_txn_id", id);
        }
        if let Some(risk) = tx.risk() {
            message = message
                .with_field("risk_score", risk.score.to_string())
                .with_field("validation_action", risk.action.as_str());
        }
        message
    }

    fn antifraud_message(&self, tx: &Transaction, risk: &RiskAssessment) -> QueueMessage {
        let mut record = FieldMap::from([
            ("risk_score".to_owned(), risk.score.to_string()),
            ("validation_action".to_owned(), risk.action.as_str().to_owned()),
            (
                "score_breakdown".to_owned(),
                serde_json::to_string(&risk.breakdown).unwrap_or_default(),
            ),
        ]);
        for name in [
            fields::USER_IP,
            fields::PAYMENT_METHOD,
            fields::COUNTRY,
            fields::UTM_SOURCE,
        ] {
            if let Some(value) = tx.data().get(name) {
                record.insert(name.to_owned(), value.to_owned());
            }
        }
        QueueMessage::new(tx.order_id().clone(), self.gateway.name(), unix_now(), record)
    }
}
