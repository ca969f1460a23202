//! The value the caller branches on after every donation operation.

use crate::donation::messages;
use dgw_sdk::objects::FinalStatus;
use std::collections::BTreeMap;

/// Error code (or field name) to message key.
pub type ErrorMap = BTreeMap<String, String>;

/// What an attempt has produced so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionResults {
    /// Transaction errors by code, or field errors by field name.
    pub errors: ErrorMap,
    pub redirect: Option<String>,
}

/// The six things a caller can be told to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failure(ErrorMap),
    Redirect(String),
    Iframe(String),
    Form(String),
    Refresh(ErrorMap),
}

/// Immutable outcome of a donation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    outcome: PaymentOutcome,
    empty: bool,
}

impl PaymentResult {
    fn of(outcome: PaymentOutcome) -> Self {
        Self {
            outcome,
            empty: false,
        }
    }

    pub fn success() -> Self {
        Self::of(PaymentOutcome::Success)
    }

    pub fn failure(errors: ErrorMap) -> Self {
        Self::of(PaymentOutcome::Failure(errors))
    }

    /// Failure standing for "nothing has happened yet".
    pub fn empty() -> Self {
        let errors = ErrorMap::from([(
            messages::INTERNAL_NO_RESULTS_CODE.to_owned(),
            messages::INTERNAL_NO_RESULTS.to_owned(),
        )]);
        Self {
            outcome: PaymentOutcome::Failure(errors),
            empty: true,
        }
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self::of(PaymentOutcome::Redirect(url.into()))
    }

    pub fn iframe(name: impl Into<String>) -> Self {
        Self::of(PaymentOutcome::Iframe(name.into()))
    }

    pub fn form(name: impl Into<String>) -> Self {
        Self::of(PaymentOutcome::Form(name.into()))
    }

    pub fn refresh(errors: ErrorMap) -> Self {
        Self::of(PaymentOutcome::Refresh(errors))
    }

    /// Build a result from what a transaction produced.
    ///
    /// Order matters: a failed (or cancelled) status wins, then missing
    /// results, then errors, then a redirect; anything else is a success.
    pub fn from_results(
        results: Option<&TransactionResults>,
        status: Option<FinalStatus>,
    ) -> Self {
        if matches!(status, Some(FinalStatus::Failed | FinalStatus::Cancelled)) {
            return Self::failure(results.map(|r| r.errors.clone()).unwrap_or_default());
        }
        let Some(results) = results else {
            return Self::empty();
        };
        if !results.errors.is_empty() {
            return Self::refresh(results.errors.clone());
        }
        if let Some(url) = &results.redirect {
            return Self::redirect(url.clone());
        }
        Self::success()
    }

    pub fn outcome(&self) -> &PaymentOutcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> PaymentOutcome {
        self.outcome
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PaymentOutcome::Failure(_))
    }

    /// The "no results yet" failure, as opposed to a real decline.
    pub fn is_empty_results(&self) -> bool {
        self.empty
    }

    pub fn errors(&self) -> Option<&ErrorMap> {
        match &self.outcome {
            PaymentOutcome::Failure(e) | PaymentOutcome::Refresh(e) => Some(e),
            _ => None,
        }
    }

    pub fn redirect_url(&self) -> Option<&str> {
        match &self.outcome {
            PaymentOutcome::Redirect(url) => Some(url),
            _ => None,
        }
    }
}

/// Errors split by who can act on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBuckets {
    /// `internal*` codes: the donor may simply try again.
    pub retry: ErrorMap,
    /// Everything else, shown as general errors.
    pub general: ErrorMap,
}

impl ErrorBuckets {
    pub fn split(errors: &ErrorMap) -> Self {
        let (retry, general) = errors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(code, _)| code.starts_with("internal"));
        Self { retry, general }
    }
}
