use crate::handlers::common::success_response;
use crate::{
    auth::AuthUser,
    entities::user_profile,
    errors::ServiceError,
    services::orders::LibraryItem,
    AppState,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/account/profile", get(get_profile))
        .route("/api/account/purchases", get(list_purchases))
}

/// The caller's profile, created from token claims on first access
#[utoipa::path(
    get,
    path = "/api/account/profile",
    tag = "Account",
    responses(
        (status = 200, description = "Profile", body = user_profile::Model),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.profiles.get_or_create(&user).await?,
    ))
}

/// Completed purchases (download library)
#[utoipa::path(
    get,
    path = "/api/account/purchases",
    tag = "Account",
    responses(
        (status = 200, description = "Completed purchases", body = Vec<LibraryItem>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = []))
)]
pub async fn list_purchases(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(
        state.services.orders.library(user.user_id).await?,
    ))
}
