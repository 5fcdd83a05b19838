use crate::handlers::common::success_response;
use crate::{
    entities::{booklet, paper},
    errors::ServiceError,
    services::catalog::PaperFilter,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use uuid::Uuid;

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/papers", get(list_papers))
        .route("/api/papers/:id", get(get_paper))
        .route("/api/booklets", get(list_booklets))
}

#[utoipa::path(
    get,
    path = "/api/papers",
    tag = "Catalog",
    params(PaperFilter),
    responses((status = 200, description = "Papers, newest year first", body = Vec<paper::Model>))
)]
pub async fn list_papers(
    State(state): State<AppState>,
    Query(filter): Query<PaperFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.catalog.list_papers(filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/papers/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "Paper id")),
    responses(
        (status = 200, description = "Paper", body = paper::Model),
        (status = 404, description = "Paper not found", body = crate::errors::ErrorResponse)
    )
)]
pub async fn get_paper(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.catalog.get_paper(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/booklets",
    tag = "Catalog",
    responses((status = 200, description = "Booklets", body = Vec<booklet::Model>))
)]
pub async fn list_booklets(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(success_response(state.services.catalog.list_booklets().await?))
}
