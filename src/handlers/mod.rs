pub mod account;
pub mod admin;
pub mod catalog;
pub mod checkout;
pub mod common;
pub mod payments;

use crate::{
    cache::InMemoryCache,
    config::AppConfig,
    db::DbPool,
    services::{
        catalog::CatalogService, orders::OrderService, payments::PaymentGateway,
        payments::PaymentService, profiles::ProfileService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub profiles: Arc<ProfileService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service over one pool. The order-listing cache is shared so
    /// that payment status changes invalidate admin listings too.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let listing_cache = InMemoryCache::default();

        let catalog = Arc::new(CatalogService::new(db_pool.clone()));
        let profiles = Arc::new(ProfileService::new(db_pool.clone(), config.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            catalog.clone(),
            profiles.clone(),
            listing_cache.clone(),
            config.delivery_fee(),
        ));
        let payments = Arc::new(PaymentService::new(
            db_pool,
            catalog.clone(),
            gateway,
            listing_cache,
            config.site_url.clone(),
        ));

        Self {
            catalog,
            profiles,
            orders,
            payments,
        }
    }
}
