use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Status string the provider uses for a settled transaction
pub const COMPLETED: &str = "Completed";

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    /// Merchant-side reference; the purchase id
    pub invoice_number: String,
    pub callback_url: String,
}

/// A provider-side session the payer is redirected into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub payment_id: String,
    pub redirect_url: String,
}

/// What the provider reports about a payment after execute or status query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaymentOutcome {
    pub payment_id: String,
    pub trx_id: Option<String>,
    pub transaction_status: Option<String>,
    pub status_code: Option<String>,
    pub status_message: Option<String>,
}

impl PaymentOutcome {
    pub fn is_completed(&self) -> bool {
        self.transaction_status.as_deref() == Some(COMPLETED)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub payment_id: String,
    pub trx_id: String,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefundOutcome {
    pub refund_trx_id: Option<String>,
    pub transaction_status: Option<String>,
    pub status_message: Option<String>,
}

impl RefundOutcome {
    pub fn is_completed(&self) -> bool {
        self.transaction_status.as_deref() == Some(COMPLETED)
    }
}

/// Create → redirect → execute payment provider.
///
/// `Err` means the provider could not be reached or refused the request
/// outright; a provider answer about the payment itself comes back as `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<PaymentSession, ServiceError>;

    async fn execute_payment(&self, payment_id: &str) -> Result<PaymentOutcome, ServiceError>;

    async fn query_payment(&self, payment_id: &str) -> Result<PaymentOutcome, ServiceError>;

    async fn refund_payment(&self, request: &RefundRequest) -> Result<RefundOutcome, ServiceError>;
}
