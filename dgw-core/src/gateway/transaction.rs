use super::OrchestrationError;
use crate::donation::{DonationData, FieldErrors};
use crate::fraud::RiskAssessment;
use crate::result::{ErrorMap, TransactionResults};
use dgw_sdk::objects::{FinalStatus, OrderId, StatusSource};

/// Where an attempt is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Initial,
    Validated,
    Submitted,
    AwaitingAsyncNotification,
    ResponseReceived,
    Finalized,
}

impl TransactionState {
    pub fn can_advance(self, to: Self) -> bool {
        use TransactionState::*;
        matches!(
            (self, to),
            (Initial, Validated)
                | (Validated, Validated)
                | (Validated, Initial)
                | (Validated, Submitted)
                | (Validated, Finalized)
                | (Submitted, ResponseReceived)
                | (Submitted, AwaitingAsyncNotification)
                | (ResponseReceived, Finalized)
                | (ResponseReceived, AwaitingAsyncNotification)
                | (AwaitingAsyncNotification, ResponseReceived)
                | (AwaitingAsyncNotification, Finalized)
        )
    }
}

/// One donation attempt, owned by the request handling it.
#[derive(Debug, Clone)]
pub struct Transaction {
    gateway: String,
    order_id: OrderId,
    data: DonationData,
    token: String,
    posted: bool,
    state: TransactionState,
    final_status: Option<FinalStatus>,
    errors: ErrorMap,
    field_errors: FieldErrors,
    notices: ErrorMap,
    risk: Option<RiskAssessment>,
    gateway_txn_id: Option<String>,
    results: Option<TransactionResults>,
}

impl Transaction {
    pub(crate) fn new(
        gateway: &str,
        data: DonationData,
        order_id: OrderId,
        token: String,
        posted: bool,
    ) -> Self {
        Self {
            gateway: gateway.to_owned(),
            order_id,
            data,
            token,
            posted,
            state: TransactionState::Initial,
            final_status: None,
            errors: ErrorMap::new(),
            field_errors: FieldErrors::new(),
            notices: ErrorMap::new(),
            risk: None,
            gateway_txn_id: None,
            results: None,
        }
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn data(&self) -> &DonationData {
        &self.data
    }

    /// The donor's anti-forgery token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The request came from a submitted form.
    pub fn posted(&self) -> bool {
        self.posted
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn final_status(&self) -> Option<FinalStatus> {
        self.final_status
    }

    /// Transaction errors by code.
    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn field_errors(&self) -> &FieldErrors {
        &self.field_errors
    }

    pub fn risk(&self) -> Option<&RiskAssessment> {
        self.risk.as_ref()
    }

    pub fn gateway_txn_id(&self) -> Option<&str> {
        self.gateway_txn_id.as_deref()
    }

    pub fn results(&self) -> Option<&TransactionResults> {
        self.results.as_ref()
    }

    /// Everything the donor should see when the form is shown again.
    pub fn display_errors(&self) -> ErrorMap {
        let mut all = self.notices.clone();
        all.extend(self.field_errors.clone());
        all.extend(self.errors.clone());
        all
    }

    // ---- driver-side mutation ----

    pub(crate) fn data_mut(&mut self) -> &mut DonationData {
        &mut self.data
    }

    pub(crate) fn advance(&mut self, to: TransactionState) -> Result<(), OrchestrationError> {
        if !self.state.can_advance(to) {
            return Err(OrchestrationError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Apply a status if the lifecycle allows it. Returns whether it changed.
    pub(crate) fn set_final_status(&mut self, status: FinalStatus, source: StatusSource) -> bool {
        if self.final_status == Some(status)
            || !FinalStatus::can_transition(self.final_status, status, source)
        {
            return false;
        }
        self.final_status = Some(status);
        true
    }

    /// Adopt the status the ledger already holds for this order.
    pub(crate) fn adopt_final_status(&mut self, status: FinalStatus) {
        self.final_status = Some(status);
    }

    pub(crate) fn set_field_errors(&mut self, errors: FieldErrors) {
        self.field_errors = errors;
    }

    pub(crate) fn add_error(&mut self, code: &str, message: &str) {
        self.errors.insert(code.to_owned(), message.to_owned());
    }

    pub(crate) fn add_notice(&mut self, key: &str, message: &str) {
        self.notices.insert(key.to_owned(), message.to_owned());
    }

    pub(crate) fn set_risk(&mut self, risk: RiskAssessment) {
        self.risk = Some(risk);
    }

    pub(crate) fn set_gateway_txn_id(&mut self, id: Option<String>) {
        if id.is_some() {
            self.gateway_txn_id = id;
        }
    }

    pub(crate) fn set_results(&mut self, results: TransactionResults) {
        self.results = Some(results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donation::FieldMap;

    fn transaction() -> Transaction {
        let mut data = DonationData::stage(&FieldMap::new(), &FieldMap::new(), &FieldMap::new());
        let order_id = data.ensure_order_id();
        Transaction::new("test", data, order_id, "token".to_owned(), true)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut tx = transaction();
        for state in [
            TransactionState::Validated,
            TransactionState::Submitted,
            TransactionState::ResponseReceived,
            TransactionState::Finalized,
        ] {
            tx.advance(state).unwrap();
        }
        assert_eq!(tx.state(), TransactionState::Finalized);
    }

    #[test]
    fn test_finalized_is_a_dead_end() {
        let mut tx = transaction();
        tx.advance(TransactionState::Validated).unwrap();
        tx.advance(TransactionState::Finalized).unwrap();
        for state in [
            TransactionState::Initial,
            TransactionState::Validated,
            TransactionState::Submitted,
            TransactionState::AwaitingAsyncNotification,
            TransactionState::ResponseReceived,
        ] {
            assert!(matches!(
                tx.advance(state),
                Err(OrchestrationError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_cannot_submit_unvalidated() {
        let mut tx = transaction();
        assert!(tx.advance(TransactionState::Submitted).is_err());
        assert_eq!(tx.state(), TransactionState::Initial);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut tx = transaction();
        assert!(tx.set_final_status(FinalStatus::Revised, StatusSource::Synchronous));
        assert!(tx.set_final_status(FinalStatus::Complete, StatusSource::Synchronous));
        assert!(!tx.set_final_status(FinalStatus::Failed, StatusSource::Asynchronous));
        assert_eq!(tx.final_status(), Some(FinalStatus::Complete));
    }

    #[test]
    fn test_display_errors_merge() {
        let mut tx = transaction();
        tx.add_notice("general", "notice");
        tx.set_field_errors(FieldErrors::from([("amount".to_owned(), "bad".to_owned())]));
        tx.add_error("internal-0001", "retry");
        let all = tx.display_errors();
        assert_eq!(all.len(), 3);
        assert_eq!(all["amount"], "bad");
    }
}
