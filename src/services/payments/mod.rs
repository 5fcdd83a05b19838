//! bKash single-paper purchases: session creation, the redirect callback,
//! purchase checks and the admin refund / reconcile operations.

pub mod bkash;
pub mod gateway;
pub mod reconciliation;
pub mod token_cache;

pub use bkash::BkashClient;
pub use gateway::{
    CreatePaymentRequest, PaymentGateway, PaymentOutcome, PaymentSession, RefundOutcome,
    RefundRequest,
};
pub use reconciliation::{FailureCode, Redirect};

use crate::{
    auth::AuthUser,
    cache::InMemoryCache,
    entities::{order, purchase, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::{
        catalog::{paper_unit_price, CatalogService},
        orders::OrderListing,
    },
};
use chrono::{Duration, Utc};
use metrics::counter;
use reconciliation::{CallbackPlan, CallbackSignal, ExecutionVerdict, Transition};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Pending purchases that never got a gateway session are failed after this long
const ORPHAN_AFTER_MINUTES: i64 = 60;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub paper_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStart {
    pub payment_id: String,
    pub redirect_url: String,
    pub purchase_id: Uuid,
}

/// Query string bKash appends to the callback URL
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    #[serde(rename = "paymentID", alias = "paymentId")]
    pub payment_id: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "purchaseId")]
    pub purchase_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PurchaseCheckQuery {
    pub paper_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCheck {
    pub has_purchased: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RefundPurchaseRequest {
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub purchase_id: Uuid,
    pub refund_trx_id: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub purchase_id: Uuid,
    pub status: PaymentStatus,
    pub changed: bool,
}

/// Payment flow over a [`PaymentGateway`]
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<CatalogService>,
    gateway: Arc<dyn PaymentGateway>,
    listing_cache: InMemoryCache<OrderListing>,
    site_base: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<CatalogService>,
        gateway: Arc<dyn PaymentGateway>,
        listing_cache: InMemoryCache<OrderListing>,
        site_base: impl Into<String>,
    ) -> Self {
        Self {
            db,
            catalog,
            gateway,
            listing_cache,
            site_base: site_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Absolute redirect target for a callback outcome
    pub fn redirect_url(&self, redirect: &Redirect) -> String {
        redirect.to_url(&self.site_base)
    }

    /// Records a pending bKash purchase of one premium paper and opens a
    /// gateway session for it.
    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn start_payment(
        &self,
        user: &AuthUser,
        paper_id: Uuid,
    ) -> Result<PaymentStart, ServiceError> {
        let paper = self.catalog.get_paper(paper_id).await?;
        if !paper.is_premium {
            return Err(ServiceError::NotPremium(paper_id));
        }
        let amount = paper_unit_price(&paper);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Paper {} has no payable price",
                paper_id
            )));
        }

        let purchase_id = self
            .record_pending(user, paper_id, amount)
            .await
            .map_err(|e| {
                error!(error = %e, "Purchase insert failed");
                ServiceError::persistence(e)
            })?;
        self.listing_cache.invalidate_all();

        let request = CreatePaymentRequest {
            amount,
            invoice_number: purchase_id.to_string(),
            callback_url: format!(
                "{}/api/payment/callback?purchaseId={}",
                self.site_base, purchase_id
            ),
        };

        let session = match self.gateway.create_payment(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(%purchase_id, error = %e, "Gateway session failed; failing purchase");
                if let Err(mark_err) = self
                    .transition(purchase_id, PaymentStatus::Pending, PaymentStatus::Failed, None)
                    .await
                {
                    error!(%purchase_id, error = %mark_err, "Could not fail orphaned purchase");
                }
                return Err(e);
            }
        };

        purchase::Entity::update_many()
            .col_expr(
                purchase::Column::GatewayPaymentId,
                Expr::value(session.payment_id.clone()),
            )
            .col_expr(purchase::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(purchase::Column::Id.eq(purchase_id))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::persistence)?;

        counter!("payments.sessions_created", 1);
        info!(%purchase_id, payment_id = %session.payment_id, "Payment session created");

        Ok(PaymentStart {
            payment_id: session.payment_id,
            redirect_url: session.redirect_url,
            purchase_id,
        })
    }

    async fn record_pending(
        &self,
        user: &AuthUser,
        paper_id: Uuid,
        amount: Decimal,
    ) -> Result<Uuid, sea_orm::DbErr> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let purchase_id = Uuid::new_v4();
        let transaction_id = Uuid::new_v4().to_string();
        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            transaction_id: Set(transaction_id.clone()),
            user_id: Set(user.user_id),
            payment_method: Set(PaymentMethod::Bkash),
            subtotal: Set(amount),
            delivery_charge: Set(Decimal::ZERO),
            total: Set(amount),
            contact_name: Set(user.name.clone()),
            contact_email: Set(user.email.clone()),
            contact_phone: Set(None),
            address: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        purchase::ActiveModel {
            id: Set(purchase_id),
            order_id: Set(order_id),
            user_id: Set(user.user_id),
            paper_id: Set(Some(paper_id)),
            booklet_id: Set(None),
            quantity: Set(1),
            unit_price: Set(amount),
            amount: Set(amount),
            payment_method: Set(PaymentMethod::Bkash),
            transaction_id: Set(transaction_id),
            payment_status: Set(PaymentStatus::Pending),
            gateway_payment_id: Set(None),
            gateway_trx_id: Set(None),
            address: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(purchase_id)
    }

    /// Redirect entry point. Never fails: every error becomes a failure redirect.
    #[instrument(skip(self, params), fields(purchase_id = ?params.purchase_id))]
    pub async fn handle_callback(&self, params: CallbackParams) -> Redirect {
        let redirect = match self.process_callback(params).await {
            Ok(redirect) => redirect,
            Err(e) => {
                error!(error = %e, "Payment callback failed");
                Redirect::Failure(FailureCode::ServerError)
            }
        };
        counter!("payments.callbacks", 1, "outcome" => redirect.outcome());
        redirect
    }

    async fn process_callback(&self, params: CallbackParams) -> Result<Redirect, ServiceError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (payment_id, raw_purchase_id) =
            match (non_empty(params.payment_id), non_empty(params.purchase_id)) {
                (Some(p), Some(q)) => (p, q),
                _ => return Ok(Redirect::Failure(FailureCode::MissingParams)),
            };

        let Ok(purchase_id) = Uuid::parse_str(raw_purchase_id.trim()) else {
            return Ok(Redirect::Failure(FailureCode::InvalidPurchase));
        };
        let Some(purchase) = purchase::Entity::find_by_id(purchase_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(Redirect::Failure(FailureCode::InvalidPurchase));
        };

        if purchase.payment_method != PaymentMethod::Bkash {
            return Ok(Redirect::Failure(FailureCode::InvalidPurchase));
        }
        if let Some(stored) = purchase.gateway_payment_id.as_deref() {
            if stored != payment_id {
                warn!(%purchase_id, "Callback payment id does not match stored session");
                return Ok(Redirect::Failure(FailureCode::InvalidPurchase));
            }
        }

        let signal = CallbackSignal::from_status(params.status.as_deref());
        let transition = match reconciliation::plan(purchase_id, purchase.payment_status, signal) {
            CallbackPlan::Settle(transition) => transition,
            CallbackPlan::Execute => {
                let outcome = match self.gateway.execute_payment(&payment_id).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(%purchase_id, error = %e, "Execute failed; purchase left pending");
                        return Ok(Redirect::Failure(FailureCode::ServerError));
                    }
                };
                let verdict = if outcome.is_completed() {
                    ExecutionVerdict::Completed {
                        trx_id: outcome.trx_id,
                    }
                } else {
                    match self.gateway.query_payment(&payment_id).await {
                        Ok(query) => reconciliation::confirm_by_query(
                            query.transaction_status.as_deref(),
                            query.trx_id,
                        ),
                        Err(e) => {
                            warn!(%purchase_id, error = %e, "Status query failed; purchase left pending");
                            return Ok(Redirect::Failure(FailureCode::ServerError));
                        }
                    }
                };
                reconciliation::settle(purchase_id, verdict)
            }
        };

        self.apply(purchase_id, signal, transition).await
    }

    /// Writes a transition guarded on `pending`. A lost race re-reads the
    /// winner's terminal state and redirects by that instead.
    async fn apply(
        &self,
        purchase_id: Uuid,
        signal: CallbackSignal,
        transition: Transition,
    ) -> Result<Redirect, ServiceError> {
        let Some(status) = transition.status else {
            return Ok(transition.redirect);
        };

        let changed = self
            .transition(purchase_id, PaymentStatus::Pending, status, transition.trx_id)
            .await?;
        if changed {
            info!(%purchase_id, %status, "Purchase settled by callback");
            return Ok(transition.redirect);
        }

        let current = purchase::Entity::find_by_id(purchase_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))?;
        match reconciliation::plan(purchase_id, current.payment_status, signal) {
            CallbackPlan::Settle(settled) => Ok(settled.redirect),
            CallbackPlan::Execute => Err(ServiceError::InternalError(format!(
                "Purchase {} still pending after guarded update",
                purchase_id
            ))),
        }
    }

    /// Moves a purchase from `from` to `to`; false when it was no longer in `from`
    async fn transition(
        &self,
        purchase_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        trx_id: Option<String>,
    ) -> Result<bool, ServiceError> {
        let mut update = purchase::Entity::update_many()
            .col_expr(purchase::Column::PaymentStatus, Expr::value(to))
            .col_expr(purchase::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(trx_id) = trx_id {
            update = update.col_expr(purchase::Column::GatewayTrxId, Expr::value(trx_id));
        }

        let result = update
            .filter(purchase::Column::Id.eq(purchase_id))
            .filter(purchase::Column::PaymentStatus.eq(from))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::persistence)?;

        let changed = result.rows_affected > 0;
        if changed {
            self.listing_cache.invalidate_all();
        }
        Ok(changed)
    }

    /// True iff the user has a completed purchase of the paper
    pub async fn check_purchase_status(
        &self,
        user_id: Uuid,
        paper_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let completed = purchase::Entity::find()
            .filter(purchase::Column::UserId.eq(user_id))
            .filter(purchase::Column::PaperId.eq(paper_id))
            .filter(purchase::Column::PaymentStatus.eq(PaymentStatus::Completed))
            .count(&*self.db)
            .await?;
        Ok(completed > 0)
    }

    async fn find_purchase(&self, purchase_id: Uuid) -> Result<purchase::Model, ServiceError> {
        purchase::Entity::find_by_id(purchase_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase {} not found", purchase_id)))
    }

    /// Refunds a completed bKash purchase in full
    #[instrument(skip(self, reason))]
    pub async fn refund(
        &self,
        purchase_id: Uuid,
        reason: String,
    ) -> Result<RefundReceipt, ServiceError> {
        let purchase = self.find_purchase(purchase_id).await?;
        if purchase.payment_method != PaymentMethod::Bkash
            || purchase.payment_status != PaymentStatus::Completed
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Purchase {} is not a completed bKash payment",
                purchase_id
            )));
        }
        let (Some(payment_id), Some(trx_id)) = (purchase.gateway_payment_id, purchase.gateway_trx_id)
        else {
            return Err(ServiceError::InvalidOperation(format!(
                "Purchase {} has no gateway transaction to refund",
                purchase_id
            )));
        };

        let outcome = self
            .gateway
            .refund_payment(&RefundRequest {
                payment_id,
                trx_id,
                amount: purchase.amount,
                reason,
            })
            .await?;
        if !outcome.is_completed() {
            return Err(ServiceError::GatewayRequestFailed(
                outcome
                    .status_message
                    .unwrap_or_else(|| "refund was not completed".to_string()),
            ));
        }

        if !self
            .transition(purchase_id, PaymentStatus::Completed, PaymentStatus::Refunded, None)
            .await?
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Purchase {} changed while refunding",
                purchase_id
            )));
        }

        counter!("payments.refunds", 1);
        info!(%purchase_id, refund_trx_id = ?outcome.refund_trx_id, "Purchase refunded");
        Ok(RefundReceipt {
            purchase_id,
            refund_trx_id: outcome.refund_trx_id,
            status: PaymentStatus::Refunded,
        })
    }

    /// Settles a pending bKash purchase from the gateway's own record, or fails
    /// it when no session was ever opened and it is older than an hour.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, purchase_id: Uuid) -> Result<ReconcileOutcome, ServiceError> {
        let purchase = self.find_purchase(purchase_id).await?;
        let unchanged = |status| ReconcileOutcome {
            purchase_id,
            status,
            changed: false,
        };

        if purchase.payment_status.is_terminal() {
            return Ok(unchanged(purchase.payment_status));
        }
        if purchase.payment_method != PaymentMethod::Bkash {
            return Err(ServiceError::InvalidOperation(format!(
                "Purchase {} is not a bKash payment",
                purchase_id
            )));
        }

        let (target, trx_id) = match purchase.gateway_payment_id.as_deref() {
            None => {
                let cutoff = Utc::now() - Duration::minutes(ORPHAN_AFTER_MINUTES);
                if purchase.created_at >= cutoff {
                    return Ok(unchanged(PaymentStatus::Pending));
                }
                (PaymentStatus::Failed, None)
            }
            Some(payment_id) => {
                let outcome = self.gateway.query_payment(payment_id).await?;
                match reconciliation::classify_query(outcome.transaction_status.as_deref()) {
                    Some(PaymentStatus::Completed) => (PaymentStatus::Completed, outcome.trx_id),
                    Some(status) => (status, None),
                    None => return Ok(unchanged(PaymentStatus::Pending)),
                }
            }
        };

        let changed = self
            .transition(purchase_id, PaymentStatus::Pending, target, trx_id)
            .await?;
        if !changed {
            let current = self.find_purchase(purchase_id).await?;
            return Ok(unchanged(current.payment_status));
        }

        info!(%purchase_id, status = %target, "Purchase reconciled");
        Ok(ReconcileOutcome {
            purchase_id,
            status: target,
            changed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::gateway::MockPaymentGateway;
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::paper;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    const SITE: &str = "http://localhost:3000";

    async fn memory_db() -> Arc<DatabaseConnection> {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(pool)
    }

    async fn seed_paper(db: &DatabaseConnection, is_premium: bool, price: Option<Decimal>) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        paper::ActiveModel {
            id: Set(id),
            title: Set("Physics Paper 2".into()),
            level: Set("A Level".into()),
            subject: Set("Physics".into()),
            year: Set(2023),
            paper_number: Set(Some("2".into())),
            description: Set(None),
            file_url: Set("papers/physics-2023-p2.pdf".into()),
            cover_image_url: Set(None),
            is_premium: Set(is_premium),
            price: Set(price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();
        id
    }

    fn user() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: Some("student@example.com".into()),
            name: Some("Student".into()),
            roles: vec![],
        }
    }

    fn service(db: Arc<DatabaseConnection>, gateway: MockPaymentGateway) -> PaymentService {
        PaymentService::new(
            db.clone(),
            Arc::new(CatalogService::new(db)),
            Arc::new(gateway),
            InMemoryCache::default(),
            SITE,
        )
    }

    fn session_gateway() -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().times(1).returning(|req| {
            Ok(PaymentSession {
                payment_id: "TR0011abc".into(),
                redirect_url: format!("https://sandbox.bka.sh/checkout?inv={}", req.invoice_number),
            })
        });
        gateway
    }

    async fn status_of(db: &DatabaseConnection, id: Uuid) -> purchase::Model {
        purchase::Entity::find_by_id(id).one(db).await.unwrap().unwrap()
    }

    fn callback(purchase_id: Uuid, status: &str) -> CallbackParams {
        CallbackParams {
            payment_id: Some("TR0011abc".into()),
            status: Some(status.into()),
            purchase_id: Some(purchase_id.to_string()),
        }
    }

    #[tokio::test]
    async fn start_payment_records_pending_purchase_with_session() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .withf(|req| {
                req.amount == dec!(500) && req.callback_url.starts_with(SITE)
                    && req.callback_url.contains(&req.invoice_number)
            })
            .times(1)
            .returning(|_| {
                Ok(PaymentSession {
                    payment_id: "TR0011abc".into(),
                    redirect_url: "https://sandbox.bka.sh/checkout".into(),
                })
            });
        let svc = service(db.clone(), gateway);

        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let stored = status_of(&db, start.purchase_id).await;
        assert_eq!(start.payment_id, "TR0011abc");
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.payment_method, PaymentMethod::Bkash);
        assert_eq!(stored.gateway_payment_id.as_deref(), Some("TR0011abc"));
        assert_eq!(stored.amount, dec!(500));
    }

    #[tokio::test]
    async fn start_payment_rejects_free_paper() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, false, Some(dec!(500))).await;
        let svc = service(db, MockPaymentGateway::new());

        let err = svc.start_payment(&user(), paper_id).await.unwrap_err();
        assert_matches!(err, ServiceError::NotPremium(id) if id == paper_id);
    }

    #[tokio::test]
    async fn start_payment_unknown_paper_is_not_found() {
        let db = memory_db().await;
        let svc = service(db, MockPaymentGateway::new());

        let err = svc.start_payment(&user(), Uuid::new_v4()).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    #[tokio::test]
    async fn failed_session_fails_the_new_purchase() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(250))).await;
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .times(1)
            .returning(|_| Err(ServiceError::GatewaySessionFailed("2001: Invalid App Key".into())));
        let svc = service(db.clone(), gateway);

        let err = svc.start_payment(&user(), paper_id).await.unwrap_err();
        assert_matches!(err, ServiceError::GatewaySessionFailed(_));

        let lines = purchase::Entity::find().all(&*db).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_callback_fails_without_execute() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway.expect_execute_payment().never();
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let redirect = svc.handle_callback(callback(start.purchase_id, "cancel")).await;

        assert_eq!(redirect, Redirect::Failure(FailureCode::Cancelled));
        assert_eq!(
            svc.redirect_url(&redirect),
            "http://localhost:3000/payment/failed?error=cancelled"
        );
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn completed_callback_is_idempotent() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let buyer = user();
        let mut gateway = session_gateway();
        gateway
            .expect_execute_payment()
            .withf(|id| id == "TR0011abc")
            .times(1)
            .returning(|id| {
                Ok(PaymentOutcome {
                    payment_id: id.to_string(),
                    trx_id: Some("9ABC123".into()),
                    transaction_status: Some("Completed".into()),
                    ..Default::default()
                })
            });
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&buyer, paper_id).await.unwrap();
        assert!(!svc.check_purchase_status(buyer.user_id, paper_id).await.unwrap());

        let first = svc.handle_callback(callback(start.purchase_id, "success")).await;
        let second = svc.handle_callback(callback(start.purchase_id, "success")).await;

        let expected = Redirect::Success {
            purchase_id: start.purchase_id,
        };
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        let stored = status_of(&db, start.purchase_id).await;
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
        assert_eq!(stored.gateway_trx_id.as_deref(), Some("9ABC123"));
        assert_ne!(stored.transaction_id, "9ABC123");
        assert!(svc.check_purchase_status(buyer.user_id, paper_id).await.unwrap());
    }

    #[tokio::test]
    async fn unsuccessful_execution_fails_purchase() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway.expect_execute_payment().times(1).returning(|id| {
            Ok(PaymentOutcome {
                payment_id: id.to_string(),
                status_code: Some("2056".into()),
                status_message: Some("Invalid Payment State".into()),
                ..Default::default()
            })
        });
        gateway.expect_query_payment().times(1).returning(|id| {
            Ok(PaymentOutcome {
                payment_id: id.to_string(),
                transaction_status: Some("Failed".into()),
                ..Default::default()
            })
        });
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let redirect = svc.handle_callback(callback(start.purchase_id, "success")).await;

        assert_eq!(redirect, Redirect::Failure(FailureCode::PaymentFailed));
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn gateway_error_leaves_purchase_pending() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway
            .expect_execute_payment()
            .times(1)
            .returning(|_| Err(ServiceError::GatewayExecutionFailed("timeout".into())));
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let redirect = svc.handle_callback(callback(start.purchase_id, "success")).await;

        assert_eq!(redirect, Redirect::Failure(FailureCode::ServerError));
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn retried_callback_after_execute_error_settles_from_status_query() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        let mut seq = mockall::Sequence::new();
        gateway
            .expect_execute_payment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ServiceError::GatewayExecutionFailed("timeout".into())));
        // bKash already executed the first attempt; the retry is refused.
        gateway
            .expect_execute_payment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| {
                Ok(PaymentOutcome {
                    payment_id: id.to_string(),
                    status_code: Some("2062".into()),
                    status_message: Some("The payment has already been completed".into()),
                    ..Default::default()
                })
            });
        gateway
            .expect_query_payment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| {
                Ok(PaymentOutcome {
                    payment_id: id.to_string(),
                    trx_id: Some("9ABC123".into()),
                    transaction_status: Some("Completed".into()),
                    ..Default::default()
                })
            });
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let first = svc.handle_callback(callback(start.purchase_id, "success")).await;
        assert_eq!(first, Redirect::Failure(FailureCode::ServerError));
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Pending
        );

        let retried = svc.handle_callback(callback(start.purchase_id, "success")).await;
        assert_eq!(
            retried,
            Redirect::Success {
                purchase_id: start.purchase_id
            }
        );
        let settled = status_of(&db, start.purchase_id).await;
        assert_eq!(settled.payment_status, PaymentStatus::Completed);
        assert_eq!(settled.gateway_trx_id.as_deref(), Some("9ABC123"));
    }

    #[tokio::test]
    async fn failed_status_query_leaves_purchase_pending() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway.expect_execute_payment().times(1).returning(|id| {
            Ok(PaymentOutcome {
                payment_id: id.to_string(),
                status_code: Some("2062".into()),
                ..Default::default()
            })
        });
        gateway
            .expect_query_payment()
            .times(1)
            .returning(|_| Err(ServiceError::GatewayExecutionFailed("timeout".into())));
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let redirect = svc.handle_callback(callback(start.purchase_id, "success")).await;

        assert_eq!(redirect, Redirect::Failure(FailureCode::ServerError));
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn callback_rejects_missing_and_unknown_purchases() {
        let db = memory_db().await;
        let svc = service(db, MockPaymentGateway::new());

        let missing = svc.handle_callback(CallbackParams::default()).await;
        let garbage = svc
            .handle_callback(CallbackParams {
                payment_id: Some("TR0011abc".into()),
                status: Some("success".into()),
                purchase_id: Some("not-a-uuid".into()),
            })
            .await;
        let unknown = svc.handle_callback(callback(Uuid::new_v4(), "success")).await;

        assert_eq!(missing, Redirect::Failure(FailureCode::MissingParams));
        assert_eq!(garbage, Redirect::Failure(FailureCode::InvalidPurchase));
        assert_eq!(unknown, Redirect::Failure(FailureCode::InvalidPurchase));
    }

    #[tokio::test]
    async fn callback_with_foreign_payment_id_is_refused() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway.expect_execute_payment().never();
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let redirect = svc
            .handle_callback(CallbackParams {
                payment_id: Some("TR0099other".into()),
                status: Some("success".into()),
                purchase_id: Some(start.purchase_id.to_string()),
            })
            .await;

        assert_eq!(redirect, Redirect::Failure(FailureCode::InvalidPurchase));
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn refund_moves_completed_purchase_to_refunded() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway.expect_execute_payment().times(1).returning(|id| {
            Ok(PaymentOutcome {
                payment_id: id.to_string(),
                trx_id: Some("9ABC123".into()),
                transaction_status: Some("Completed".into()),
                ..Default::default()
            })
        });
        gateway
            .expect_refund_payment()
            .withf(|req| req.trx_id == "9ABC123" && req.amount == dec!(500))
            .times(1)
            .returning(|_| {
                Ok(RefundOutcome {
                    refund_trx_id: Some("9XYZ999".into()),
                    transaction_status: Some("Completed".into()),
                    status_message: None,
                })
            });
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();
        svc.handle_callback(callback(start.purchase_id, "success")).await;

        let receipt = svc
            .refund(start.purchase_id, "duplicate payment".into())
            .await
            .unwrap();

        assert_eq!(receipt.status, PaymentStatus::Refunded);
        assert_eq!(
            status_of(&db, start.purchase_id).await.payment_status,
            PaymentStatus::Refunded
        );
        let replay = svc.handle_callback(callback(start.purchase_id, "success")).await;
        assert_eq!(replay, Redirect::Failure(FailureCode::Refunded));
    }

    #[tokio::test]
    async fn refund_requires_completed_purchase() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let svc = service(db, session_gateway());
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let err = svc
            .refund(start.purchase_id, "customer request".into())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidOperation(_));
    }

    #[tokio::test]
    async fn reconcile_settles_from_gateway_query() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = session_gateway();
        gateway.expect_query_payment().times(1).returning(|id| {
            Ok(PaymentOutcome {
                payment_id: id.to_string(),
                trx_id: Some("9ABC123".into()),
                transaction_status: Some("Completed".into()),
                ..Default::default()
            })
        });
        let svc = service(db.clone(), gateway);
        let start = svc.start_payment(&user(), paper_id).await.unwrap();

        let outcome = svc.reconcile(start.purchase_id).await.unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.status, PaymentStatus::Completed);
        assert_eq!(
            status_of(&db, start.purchase_id).await.gateway_trx_id.as_deref(),
            Some("9ABC123")
        );
    }

    #[tokio::test]
    async fn reconcile_fails_stale_purchase_without_session() {
        let db = memory_db().await;
        let paper_id = seed_paper(&db, true, Some(dec!(500))).await;
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_query_payment().never();
        let svc = service(db.clone(), gateway);
        let purchase_id = svc
            .record_pending(&user(), paper_id, dec!(500))
            .await
            .unwrap();

        let fresh = svc.reconcile(purchase_id).await.unwrap();
        assert!(!fresh.changed);

        purchase::Entity::update_many()
            .col_expr(
                purchase::Column::CreatedAt,
                Expr::value(Utc::now() - Duration::hours(2)),
            )
            .filter(purchase::Column::Id.eq(purchase_id))
            .exec(&*db)
            .await
            .unwrap();

        let stale = svc.reconcile(purchase_id).await.unwrap();
        assert!(stale.changed);
        assert_eq!(stale.status, PaymentStatus::Failed);
    }
}
