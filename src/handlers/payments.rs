use crate::handlers::common::{success_response, ApiJson};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::{
        CallbackParams, CreatePaymentBody, PaymentStart, PurchaseCheck, PurchaseCheckQuery,
    },
    AppState,
};
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Router,
};

/// Routes that need a signed-in user
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payment/create", post(create_payment))
        .route("/api/payment/check", get(check_purchase))
}

/// Provider redirect target; unauthenticated
pub fn payment_callback_routes() -> Router<AppState> {
    Router::new().route("/api/payment/callback", get(payment_callback))
}

/// Start a bKash payment for a premium paper
#[utoipa::path(
    post,
    path = "/api/payment/create",
    tag = "Payments",
    request_body = CreatePaymentBody,
    responses(
        (status = 200, description = "Payment session created", body = PaymentStart),
        (status = 400, description = "Paper is not premium or has no price", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Paper not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(payload): ApiJson<CreatePaymentBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let start = state
        .services
        .payments
        .start_payment(&user, payload.paper_id)
        .await?;
    Ok(success_response(start))
}

/// bKash returns the payer here; always answers with a redirect
#[utoipa::path(
    get,
    path = "/api/payment/callback",
    tag = "Payments",
    params(CallbackParams),
    responses(
        (status = 303, description = "Redirect to the payment success or failure page")
    )
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    query: Option<Query<CallbackParams>>,
) -> Redirect {
    let params = query.map(|Query(params)| params).unwrap_or_default();
    let payments = &state.services.payments;
    let outcome = payments.handle_callback(params).await;
    Redirect::to(&payments.redirect_url(&outcome))
}

/// Whether the caller owns a completed purchase of the paper
#[utoipa::path(
    get,
    path = "/api/payment/check",
    tag = "Payments",
    params(PurchaseCheckQuery),
    responses(
        (status = 200, description = "Purchase state", body = PurchaseCheck),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn check_purchase(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PurchaseCheckQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let has_purchased = state
        .services
        .payments
        .check_purchase_status(user.user_id, query.paper_id)
        .await?;
    Ok(success_response(PurchaseCheck { has_purchased }))
}
