//! bKash tokenized checkout client.
//!
//! Every call except the token grant carries the cached `id_token` in the
//! `Authorization` header (no scheme prefix) together with `X-APP-Key`.

use super::gateway::{
    CreatePaymentRequest, PaymentGateway, PaymentOutcome, PaymentSession, RefundOutcome,
    RefundRequest,
};
use super::token_cache::{Clock, GrantedToken, SystemClock, TokenCache};
use crate::{config::BkashConfig, errors::ServiceError};
use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

const GRANT_PATH: &str = "/tokenized/checkout/token/grant";
const CREATE_PATH: &str = "/tokenized/checkout/create";
const EXECUTE_PATH: &str = "/tokenized/checkout/execute";
const QUERY_PATH: &str = "/tokenized/checkout/payment/status";
const REFUND_PATH: &str = "/tokenized/checkout/payment/refund";

/// bKash checkout URL mode
const MODE_CHECKOUT_URL: &str = "0011";
const INTENT_SALE: &str = "sale";

#[derive(Debug, Serialize)]
struct GrantTokenBody<'a> {
    app_key: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct GrantTokenResponse {
    id_token: Option<String>,
    expires_in: Option<u64>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
    msg: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody<'a> {
    mode: &'a str,
    payer_reference: &'a str,
    #[serde(rename = "callbackURL")]
    callback_url: &'a str,
    amount: String,
    currency: &'a str,
    intent: &'a str,
    merchant_invoice_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    #[serde(rename = "paymentID")]
    payment_id: Option<String>,
    #[serde(rename = "bkashURL")]
    bkash_url: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: Option<String>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct PaymentIdBody<'a> {
    #[serde(rename = "paymentID")]
    payment_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
    #[serde(rename = "paymentID")]
    payment_id: Option<String>,
    #[serde(rename = "trxID")]
    trx_id: Option<String>,
    #[serde(rename = "transactionStatus")]
    transaction_status: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: Option<String>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

impl PaymentStatusResponse {
    fn into_outcome(self, requested_id: &str) -> PaymentOutcome {
        PaymentOutcome {
            payment_id: self.payment_id.unwrap_or_else(|| requested_id.to_string()),
            trx_id: self.trx_id,
            transaction_status: self.transaction_status,
            status_code: self.status_code,
            status_message: self.status_message,
        }
    }
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    #[serde(rename = "paymentID")]
    payment_id: &'a str,
    #[serde(rename = "trxID")]
    trx_id: &'a str,
    amount: String,
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    #[serde(rename = "refundTrxID")]
    refund_trx_id: Option<String>,
    #[serde(rename = "transactionStatus")]
    transaction_status: Option<String>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

/// Renders an amount the way the provider expects it ("500.00")
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// HTTP client for the bKash tokenized checkout API
pub struct BkashClient {
    http: reqwest::Client,
    config: BkashConfig,
    currency: String,
    tokens: TokenCache,
}

impl BkashClient {
    pub fn new(config: BkashConfig, currency: String) -> Result<Self, ServiceError> {
        Self::with_clock(config, currency, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BkashConfig,
        currency: String,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        let tokens = TokenCache::new(clock, config.token_refresh_margin_secs);

        Ok(Self {
            http,
            config,
            currency,
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Returns a valid bearer token, exchanging credentials when the cache is stale
    pub async fn access_token(&self) -> Result<String, ServiceError> {
        self.tokens.get_or_refresh(|| self.grant_token()).await
    }

    #[instrument(skip(self))]
    async fn grant_token(&self) -> Result<GrantedToken, ServiceError> {
        counter!("payments.token_grants", 1);
        let response = self
            .http
            .post(self.url(GRANT_PATH))
            .header("username", &self.config.username)
            .header("password", &self.config.password)
            .json(&GrantTokenBody {
                app_key: &self.config.app_key,
                app_secret: &self.config.app_secret,
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "bKash token grant request failed");
                ServiceError::GatewayAuthFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "bKash token grant rejected");
            return Err(ServiceError::GatewayAuthFailed(format!(
                "token grant returned {}",
                status
            )));
        }

        let body: GrantTokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayAuthFailed(e.to_string()))?;

        match body.id_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(GrantedToken {
                token,
                expires_in: body.expires_in,
            }),
            None => Err(ServiceError::GatewayAuthFailed(
                body.status_message
                    .or(body.msg)
                    .unwrap_or_else(|| "token grant returned no id_token".to_string()),
            )),
        }
    }

    /// Authorized POST; `on_error` wraps transport, HTTP status and decode failures.
    async fn post<B, R>(
        &self,
        path: &'static str,
        body: &B,
        on_error: fn(String) -> ServiceError,
    ) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        crate::tracing::with_metrics(path, || async move {
            let token = self.access_token().await?;
            let response = self
                .http
                .post(self.url(path))
                .header("Authorization", token)
                .header("X-APP-Key", &self.config.app_key)
                .json(body)
                .send()
                .await
                .map_err(|e| on_error(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // Provider revoked the token early; the next call grants a new one.
                self.tokens.invalidate().await;
            }
            if !status.is_success() {
                return Err(on_error(format!("{} returned {}", path, status)));
            }

            response.json().await.map_err(|e| on_error(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl PaymentGateway for BkashClient {
    #[instrument(skip(self, request), fields(invoice = %request.invoice_number))]
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let body = CreatePaymentBody {
            mode: MODE_CHECKOUT_URL,
            payer_reference: " ",
            callback_url: &request.callback_url,
            amount: format_amount(request.amount),
            currency: &self.currency,
            intent: INTENT_SALE,
            merchant_invoice_number: &request.invoice_number,
        };

        let response: CreatePaymentResponse = self
            .post(CREATE_PATH, &body, ServiceError::GatewaySessionFailed)
            .await?;

        match (response.payment_id, response.bkash_url) {
            (Some(payment_id), Some(redirect_url)) => {
                debug!(%payment_id, "bKash payment session created");
                Ok(PaymentSession {
                    payment_id,
                    redirect_url,
                })
            }
            _ => Err(ServiceError::GatewaySessionFailed(format!(
                "{}: {}",
                response.status_code.unwrap_or_default(),
                response
                    .status_message
                    .unwrap_or_else(|| "no payment session returned".to_string())
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn execute_payment(&self, payment_id: &str) -> Result<PaymentOutcome, ServiceError> {
        let response: PaymentStatusResponse = self
            .post(
                EXECUTE_PATH,
                &PaymentIdBody { payment_id },
                ServiceError::GatewayExecutionFailed,
            )
            .await?;
        Ok(response.into_outcome(payment_id))
    }

    #[instrument(skip(self))]
    async fn query_payment(&self, payment_id: &str) -> Result<PaymentOutcome, ServiceError> {
        let response: PaymentStatusResponse = self
            .post(
                QUERY_PATH,
                &PaymentIdBody { payment_id },
                ServiceError::GatewayRequestFailed,
            )
            .await?;
        Ok(response.into_outcome(payment_id))
    }

    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    async fn refund_payment(&self, request: &RefundRequest) -> Result<RefundOutcome, ServiceError> {
        let body = RefundBody {
            payment_id: &request.payment_id,
            trx_id: &request.trx_id,
            amount: format_amount(request.amount),
            reason: &request.reason,
        };
        let response: RefundResponse = self
            .post(REFUND_PATH, &body, ServiceError::GatewayRequestFailed)
            .await?;

        Ok(RefundOutcome {
            refund_trx_id: response.refund_trx_id,
            transaction_status: response.transaction_status,
            status_message: response.status_message,
        })
    }
}
