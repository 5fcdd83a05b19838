//! Back-office endpoints. Every handler takes [`AdminUser`], which resolves the
//! caller's profile and rejects non-administrators with 403.

use crate::handlers::common::{created_response, success_response, validate_input, ApiJson};
use crate::{
    auth::AuthUser,
    entities::{booklet, paper, user_profile},
    errors::ServiceError,
    services::{
        catalog::{CreateBookletRequest, CreatePaperRequest, UpdatePaperRequest},
        orders::{Invoice, OrderListQuery, OrderListing, UpdateOrderStatusRequest},
        payments::{ReconcileOutcome, RefundPurchaseRequest, RefundReceipt},
    },
    AppState,
};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// An authenticated caller that passed the administrator gate
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        state
            .services
            .profiles
            .require_admin(&user)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(AdminUser(user))
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetAdminRequest {
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateResult {
    pub transaction_id: String,
    pub updated_lines: u64,
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/orders", get(list_orders))
        .route(
            "/api/admin/orders/:transaction_id/invoice",
            get(get_invoice),
        )
        .route(
            "/api/admin/orders/:transaction_id/status",
            put(update_order_status),
        )
        .route("/api/admin/purchases/:id/refund", post(refund_purchase))
        .route("/api/admin/purchases/:id/reconcile", post(reconcile_purchase))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/:id/admin", put(set_admin))
        .route("/api/admin/papers", post(create_paper))
        .route("/api/admin/papers/:id", put(update_paper))
        .route("/api/admin/booklets", post(create_booklet))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    tag = "Admin",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders, newest first", body = OrderListing),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not an administrator", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.orders.list_orders(query).await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/{transaction_id}/invoice",
    tag = "Admin",
    params(("transaction_id" = String, Path, description = "Checkout transaction id")),
    responses(
        (status = 200, description = "Invoice", body = Invoice),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn get_invoice(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.orders.invoice(&transaction_id).await?,
    ))
}

/// Mark every pending line of a checkout completed (delivered) or failed
#[utoipa::path(
    put,
    path = "/api/admin/orders/{transaction_id}/status",
    tag = "Admin",
    params(("transaction_id" = String, Path, description = "Checkout transaction id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Lines updated", body = StatusUpdateResult),
        (status = 400, description = "Unsupported target status or nothing pending", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(transaction_id): Path<String>,
    ApiJson(payload): ApiJson<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated_lines = state
        .services
        .orders
        .update_status(&transaction_id, payload.status)
        .await?;
    Ok(success_response(StatusUpdateResult {
        transaction_id,
        updated_lines,
    }))
}

#[utoipa::path(
    post,
    path = "/api/admin/purchases/{id}/refund",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Purchase id")),
    request_body = RefundPurchaseRequest,
    responses(
        (status = 200, description = "Refunded", body = RefundReceipt),
        (status = 400, description = "Purchase cannot be refunded", body = crate::errors::ErrorResponse),
        (status = 404, description = "Purchase not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn refund_purchase(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<RefundPurchaseRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    tracing::info!(purchase_id = %id, admin = %admin.user_id, "Refund requested");
    Ok(success_response(
        state.services.payments.refund(id, payload.reason).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/purchases/{id}/reconcile",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Purchase id")),
    responses(
        (status = 200, description = "Reconciliation result", body = ReconcileOutcome),
        (status = 404, description = "Purchase not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn reconcile_purchase(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.payments.reconcile(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "Admin",
    responses((status = 200, description = "User profiles", body = Vec<user_profile::Model>)),
    security(("Bearer" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.profiles.list_profiles().await?))
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/admin",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SetAdminRequest,
    responses(
        (status = 200, description = "Updated profile", body = user_profile::Model),
        (status = 400, description = "Master administrator cannot be demoted", body = crate::errors::ErrorResponse),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn set_admin(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<SetAdminRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.profiles.set_admin(id, payload.is_admin).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/papers",
    tag = "Admin",
    request_body = CreatePaperRequest,
    responses(
        (status = 201, description = "Paper created", body = paper::Model),
        (status = 400, description = "Invalid paper", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn create_paper(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(payload): ApiJson<CreatePaperRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(created_response(
        state.services.catalog.create_paper(payload).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/admin/papers/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Paper id")),
    request_body = UpdatePaperRequest,
    responses(
        (status = 200, description = "Paper updated", body = paper::Model),
        (status = 404, description = "Paper not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn update_paper(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<UpdatePaperRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.catalog.update_paper(id, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/booklets",
    tag = "Admin",
    request_body = CreateBookletRequest,
    responses(
        (status = 201, description = "Booklet created", body = booklet::Model),
        (status = 400, description = "Invalid booklet", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn create_booklet(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(payload): ApiJson<CreateBookletRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(created_response(
        state.services.catalog.create_booklet(payload).await?,
    ))
}
