//! Entry points for donor requests, donor returns and gateway notifications.

use super::{
    DonationProcessor, ForbiddenReason, GatewayAdapter, GatewayError, GatewayOutcome,
    MappedResponse, OrchestrationError, Transaction,
};
use crate::donation::{FieldMap, fields, messages};
use crate::reconcile::{FinalizeOutcome, InitRecord};
use crate::result::{ErrorMap, PaymentResult, TransactionResults};
use crate::utils::unix_now;
use dgw_sdk::objects::{FinalStatus, GatewayNotification, OrderId, QueueMessage, StatusSource};
use dgw_sdk::signature::verify_donor_token;
use tracing::{error, info, warn};

/// A donor coming back from a hosted payment page.
#[derive(Debug, Clone)]
pub struct ResultRequest {
    pub order_id: OrderId,
    /// Token echoed back through the return URL.
    pub token: Option<String>,
    pub notification: GatewayNotification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAck {
    /// The notification settled the order, or published a settlement an
    /// earlier delivery recorded but failed to announce.
    Applied(FinalStatus),
    /// The order was already settled; nothing was published.
    Duplicate(FinalStatus),
}

impl<G: GatewayAdapter + ?Sized> DonationProcessor<G> {
    /// Handle a donor request: either process it right away or remember the
    /// donor and show a form.
    pub async fn handle_donation_request(
        &self,
        tx: &mut Transaction,
        presented_token: Option<&str>,
    ) -> Result<PaymentResult, OrchestrationError> {
        let immediate = tx.posted()
            || tx
                .data()
                .get(fields::REDIRECT)
                .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        if tx.posted() {
            let valid = presented_token
                .is_some_and(|token| self.token_matches(tx.order_id(), tx.token(), token));
            if !valid {
                warn!(
                    order_id = %tx.order_id(),
                    gateway = self.gateway.name(),
                    "Posted form failed token check"
                );
                tx.add_notice(fields::GENERAL, messages::TOKEN_MISMATCH);
                return Ok(self.refresh(tx));
            }
        }

        if immediate {
            if self.validate_form(tx).await?.redisplay_form() {
                return Ok(self.refresh(tx));
            }
            return self.do_payment(tx).await;
        }

        self.store_session(tx).await?;
        let form = tx
            .data()
            .get(fields::FFNAME)
            .unwrap_or(self.config.default_form.as_str())
            .to_owned();
        Ok(PaymentResult::form(form))
    }

    /// Settle an order from a donor return.
    ///
    /// Requests without donor session data or with a bad token are refused.
    pub async fn process_response(
        &self,
        request: ResultRequest,
    ) -> Result<PaymentResult, OrchestrationError> {
        let order_id = request.order_id;
        let gateway = self.gateway.name();

        let Some(session) = self.sessions.get(&order_id).await? else {
            error!(order_id = %order_id, gateway, "Result request without donor session");
            return Err(OrchestrationError::Forbidden(ForbiddenReason::NoSession));
        };
        let token_ok = request
            .token
            .as_deref()
            .is_some_and(|token| self.token_matches(&order_id, &session.token, token));
        if !token_ok {
            error!(order_id = %order_id, gateway, "Result request failed token check");
            return Err(OrchestrationError::Forbidden(
                ForbiddenReason::TokenMismatch,
            ));
        }
        if request.notification.order_id != order_id {
            error!(
                order_id = %order_id,
                notified = %request.notification.order_id,
                gateway,
                "Return parameters name a different order"
            );
            return Err(GatewayError::Malformed("order id mismatch".to_owned()).into());
        }

        let mapped = self.verified(&request.notification)?;
        let status = settled_status(&mapped)?;
        let message = QueueMessage::new(order_id.clone(), gateway, unix_now(), session.donor);
        let message = with_txn_id(message, &mapped);

        let outcome = self
            .finalizer
            .finalize(
                &self.gateway.limbo_queue(),
                message,
                status,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await?;
        let settled = outcome.status(status);
        info!(
            order_id = %order_id,
            gateway,
            status = %settled,
            duplicate = matches!(outcome, FinalizeOutcome::AlreadyFinal(_)),
            "Donor returned from gateway"
        );

        let mut errors = ErrorMap::new();
        if settled == status {
            if let GatewayOutcome::Declined { code, message } = mapped.outcome {
                errors.insert(code, message);
            }
        }
        Ok(PaymentResult::from_results(
            Some(&TransactionResults {
                errors,
                redirect: None,
            }),
            Some(settled),
        ))
    }

    /// Settle an order from a server-to-server gateway notification.
    pub async fn process_notification(
        &self,
        notification: GatewayNotification,
    ) -> Result<NotificationAck, OrchestrationError> {
        let gateway = self.gateway.name();
        if notification.gateway != gateway {
            return Err(OrchestrationError::WrongGateway {
                expected: gateway.to_owned(),
                got: notification.gateway,
            });
        }

        let mapped = self.verified(&notification)?;
        let status = settled_status(&mapped)?;
        let message = QueueMessage::new(
            notification.order_id.clone(),
            gateway,
            unix_now(),
            FieldMap::new(),
        );
        let message = with_txn_id(message, &mapped);

        let outcome = self
            .finalizer
            .finalize(
                &self.gateway.limbo_queue(),
                message,
                status,
                StatusSource::Asynchronous,
                InitRecord::BestEffort,
            )
            .await?;
        info!(
            order_id = %notification.order_id,
            gateway,
            status = %outcome.status(status),
            "Gateway notification processed"
        );
        Ok(match outcome {
            FinalizeOutcome::Finalized { .. } => NotificationAck::Applied(status),
            FinalizeOutcome::Republished(existing) => NotificationAck::Applied(existing),
            FinalizeOutcome::AlreadyFinal(existing) => NotificationAck::Duplicate(existing),
        })
    }

    fn verified(
        &self,
        notification: &GatewayNotification,
    ) -> Result<MappedResponse, OrchestrationError> {
        self.gateway.verify_notification(notification).map_err(|e| {
            error!(
                order_id = %notification.order_id,
                gateway = self.gateway.name(),
                error = %e,
                "Gateway notification rejected"
            );
            e.into()
        })
    }

    fn token_matches(&self, order_id: &OrderId, expected: &str, presented: &str) -> bool {
        presented == expected
            && verify_donor_token(&self.config.token_salt, order_id, presented).is_ok()
    }
}

fn settled_status(mapped: &MappedResponse) -> Result<FinalStatus, GatewayError> {
    mapped
        .outcome
        .final_status()
        .ok_or_else(|| GatewayError::Malformed("notification carries no final status".to_owned()))
}

fn with_txn_id(message: QueueMessage, mapped: &MappedResponse) -> QueueMessage {
    match &mapped.gateway_txn_id {
        Some(id) => message.with_field("gateway_txn_id", id.as_str()),
        None => message,
    }
}
