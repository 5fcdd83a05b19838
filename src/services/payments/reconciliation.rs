//! Pure callback state machine.
//!
//! Given the stored status of a purchase and what the provider told us, decide
//! the status to write (if any) and where to send the payer. No I/O happens here.

use super::gateway::COMPLETED;
use crate::entities::PaymentStatus;
use uuid::Uuid;

/// What the `status` query parameter of a callback announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSignal {
    /// Payer cancelled or the provider failed the session before execute
    Cancelled,
    /// Session reached the end of the redirect flow; execute decides
    Proceed,
}

impl CallbackSignal {
    pub fn from_status(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "cancel" || s == "failure" => CallbackSignal::Cancelled,
            _ => CallbackSignal::Proceed,
        }
    }
}

/// Coarse error code carried on the failure redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    MissingParams,
    InvalidPurchase,
    Cancelled,
    PaymentFailed,
    Refunded,
    ServerError,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::MissingParams => "missing_params",
            FailureCode::InvalidPurchase => "invalid_purchase",
            FailureCode::Cancelled => "cancelled",
            FailureCode::PaymentFailed => "payment_failed",
            FailureCode::Refunded => "refunded",
            FailureCode::ServerError => "server_error",
        }
    }
}

/// Where the payer lands after the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Success { purchase_id: Uuid },
    Failure(FailureCode),
}

impl Redirect {
    pub fn to_url(&self, site_base: &str) -> String {
        let base = site_base.trim_end_matches('/');
        match self {
            Redirect::Success { purchase_id } => {
                format!("{}/payment/success?purchaseId={}", base, purchase_id)
            }
            Redirect::Failure(code) => format!("{}/payment/failed?error={}", base, code.as_str()),
        }
    }

    /// Label used for the callback outcome metric
    pub fn outcome(&self) -> &'static str {
        match self {
            Redirect::Success { .. } => "success",
            Redirect::Failure(code) => code.as_str(),
        }
    }
}

/// A write to apply (guarded on `pending`) followed by a redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: Option<PaymentStatus>,
    pub trx_id: Option<String>,
    pub redirect: Redirect,
}

impl Transition {
    fn redirect_only(redirect: Redirect) -> Self {
        Self {
            status: None,
            trx_id: None,
            redirect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPlan {
    /// Decided without talking to the provider
    Settle(Transition),
    /// Ask the provider to execute the payment, then `settle`
    Execute,
}

/// Provider verdict after execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionVerdict {
    Completed { trx_id: Option<String> },
    NotCompleted,
}

/// Decides what a callback does for a purchase in `current` state.
/// Terminal purchases never reach the provider again.
pub fn plan(purchase_id: Uuid, current: PaymentStatus, signal: CallbackSignal) -> CallbackPlan {
    match (current, signal) {
        (PaymentStatus::Pending, CallbackSignal::Cancelled) => CallbackPlan::Settle(Transition {
            status: Some(PaymentStatus::Failed),
            trx_id: None,
            redirect: Redirect::Failure(FailureCode::Cancelled),
        }),
        (PaymentStatus::Pending, CallbackSignal::Proceed) => CallbackPlan::Execute,
        (PaymentStatus::Completed, _) => {
            CallbackPlan::Settle(Transition::redirect_only(Redirect::Success { purchase_id }))
        }
        (PaymentStatus::Failed, CallbackSignal::Cancelled) => CallbackPlan::Settle(
            Transition::redirect_only(Redirect::Failure(FailureCode::Cancelled)),
        ),
        (PaymentStatus::Failed, CallbackSignal::Proceed) => CallbackPlan::Settle(
            Transition::redirect_only(Redirect::Failure(FailureCode::PaymentFailed)),
        ),
        (PaymentStatus::Refunded, _) => CallbackPlan::Settle(Transition::redirect_only(
            Redirect::Failure(FailureCode::Refunded),
        )),
    }
}

/// Maps the provider's execute verdict for a pending purchase
pub fn settle(purchase_id: Uuid, verdict: ExecutionVerdict) -> Transition {
    match verdict {
        ExecutionVerdict::Completed { trx_id } => Transition {
            status: Some(PaymentStatus::Completed),
            trx_id,
            redirect: Redirect::Success { purchase_id },
        },
        ExecutionVerdict::NotCompleted => Transition {
            status: Some(PaymentStatus::Failed),
            trx_id: None,
            redirect: Redirect::Failure(FailureCode::PaymentFailed),
        },
    }
}

/// Status a pending purchase should take given a provider status query.
/// `None` leaves it pending (e.g. still `Initiated`).
pub fn classify_query(transaction_status: Option<&str>) -> Option<PaymentStatus> {
    match transaction_status {
        Some(COMPLETED) => Some(PaymentStatus::Completed),
        Some("Failed" | "Cancelled" | "Expired" | "Declined") => Some(PaymentStatus::Failed),
        _ => None,
    }
}

/// Verdict for an execute that did not report completion, taken from a
/// follow-up status query. A retried execute answers with an error body
/// (e.g. 2062 already completed), so only the query can settle the payment.
pub fn confirm_by_query(
    transaction_status: Option<&str>,
    trx_id: Option<String>,
) -> ExecutionVerdict {
    match classify_query(transaction_status) {
        Some(PaymentStatus::Completed) => ExecutionVerdict::Completed { trx_id },
        _ => ExecutionVerdict::NotCompleted,
    }
}
