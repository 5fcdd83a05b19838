use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Exam Archive API",
        version = "1.0.0",
        description = r#"
# Exam Archive API

Storefront backend for past exam papers and printed booklets.

- **Catalog**: papers (free or premium) and booklets
- **Checkout**: cash-on-delivery orders with a flat delivery fee for booklets
- **Payments**: bKash checkout for single premium papers
- **Admin**: order listing, invoices, status changes, refunds and user management

## Authentication

User endpoints require a bearer token issued by the identity provider:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors use one JSON shape:

```json
{
  "error": "Not Found",
  "message": "Not found: Paper 550e8400-e29b-41d4-a716-446655440000 not found",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Catalog", description = "Papers and booklets"),
        (name = "Checkout", description = "Cash-on-delivery orders"),
        (name = "Payments", description = "bKash payments"),
        (name = "Account", description = "The signed-in user"),
        (name = "Admin", description = "Administrative endpoints")
    ),
    paths(
        crate::handlers::catalog::list_papers,
        crate::handlers::catalog::get_paper,
        crate::handlers::catalog::list_booklets,
        crate::handlers::checkout::place_order,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::payment_callback,
        crate::handlers::payments::check_purchase,
        crate::handlers::account::get_profile,
        crate::handlers::account::list_purchases,
        crate::handlers::admin::list_orders,
        crate::handlers::admin::get_invoice,
        crate::handlers::admin::update_order_status,
        crate::handlers::admin::refund_purchase,
        crate::handlers::admin::reconcile_purchase,
        crate::handlers::admin::list_users,
        crate::handlers::admin::set_admin,
        crate::handlers::admin::create_paper,
        crate::handlers::admin::update_paper,
        crate::handlers::admin::create_booklet,
    ),
    components(
        schemas(
            crate::entities::paper::Model,
            crate::entities::booklet::Model,
            crate::entities::user_profile::Model,
            crate::entities::PaymentMethod,
            crate::entities::PaymentStatus,
            crate::services::catalog::ProductKind,
            crate::services::catalog::CreatePaperRequest,
            crate::services::catalog::UpdatePaperRequest,
            crate::services::catalog::CreateBookletRequest,
            crate::services::profiles::ContactDetails,
            crate::services::orders::CartLine,
            crate::services::orders::PlaceOrderRequest,
            crate::services::orders::PlacedOrder,
            crate::services::orders::OrderSummary,
            crate::services::orders::OrderListing,
            crate::services::orders::InvoiceLine,
            crate::services::orders::Invoice,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::orders::LibraryItem,
            crate::services::payments::CreatePaymentBody,
            crate::services::payments::PaymentStart,
            crate::services::payments::PurchaseCheck,
            crate::services::payments::RefundPurchaseRequest,
            crate::services::payments::RefundReceipt,
            crate::services::payments::ReconcileOutcome,
            crate::handlers::admin::SetAdminRequest,
            crate::handlers::admin::StatusUpdateResult,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_storefront_paths() {
        let json = serde_json::to_string_pretty(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Exam Archive API"));
        assert!(json.contains("/api/checkout"));
        assert!(json.contains("/api/payment/callback"));
        assert!(json.contains("/api/admin/orders/{transaction_id}/invoice"));
        assert!(json.contains("\"Bearer\""));
    }
}
