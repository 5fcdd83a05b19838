use crate::handlers::common::{created_response, ApiJson};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{PlaceOrderRequest, PlacedOrder},
    AppState,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Router,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/api/checkout", post(place_order))
}

/// Place a cash-on-delivery order for the cart
#[utoipa::path(
    post,
    path = "/api/checkout",
    tag = "Checkout",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = PlacedOrder),
        (status = 400, description = "Empty cart or invalid contact form", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "A cart item does not exist", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order could not be stored", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(payload): ApiJson<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = state.services.orders.place_order(&user, payload).await?;
    Ok(created_response(placed))
}
