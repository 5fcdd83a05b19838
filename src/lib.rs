//! Exam Archive API Library
//!
//! Storefront backend for past exam papers and booklets: catalog, cash-on-delivery
//! checkout, bKash payments for premium papers, and the admin back office.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::auth::{AuthConfig, AuthRouterExt, AuthService};
use crate::config::AppConfig;
use crate::services::payments::PaymentGateway;

/// Upper bound for one HTTP request, gateway round-trips included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(AuthConfig::from(config.as_ref())));
        let services = handlers::AppServices::new(db.clone(), config.clone(), gateway);
        Self {
            db,
            config,
            services,
            auth,
        }
    }
}

/// Full HTTP surface: public catalog and payment callback, bearer-protected
/// user and admin routes, health, and Swagger UI.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .merge(handlers::catalog::catalog_routes())
        .merge(handlers::payments::payment_callback_routes());

    let authenticated = Router::new()
        .merge(handlers::checkout::checkout_routes())
        .merge(handlers::payments::payment_routes())
        .merge(handlers::account::account_routes())
        .merge(handlers::admin::admin_routes())
        .with_auth(state.auth.clone());

    Router::new()
        .route("/", get(|| async { "exam-archive-api up" }))
        .merge(public)
        .merge(authenticated)
        .with_state(state.clone())
        .nest("/health", health::health_routes(state.db.clone()))
        .merge(openapi::swagger_ui())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}
