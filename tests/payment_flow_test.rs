//! End-to-end bKash payment tests against a wiremock gateway.
//!
//! Tests cover:
//! - Session creation for premium papers
//! - Callback success, cancellation and replay
//! - Token reuse across gateway calls
//! - Callback parameter validation

mod common;

use axum::http::{Method, StatusCode};
use common::{location, response_json, TestApp, SITE_URL};
use exam_archive_api::entities::{PaymentMethod, PaymentStatus};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

const PAYMENT_ID: &str = "TR0011sandbox";

async fn start_payment(app: &TestApp, user: &exam_archive_api::auth::AuthUser, paper_id: Uuid) -> Uuid {
    let response = app
        .request_as(
            user,
            Method::POST,
            "/api/payment/create",
            Some(json!({ "paperId": paper_id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["paymentId"], PAYMENT_ID);
    assert!(body["redirectUrl"].as_str().unwrap().contains(PAYMENT_ID));
    Uuid::parse_str(body["purchaseId"].as_str().unwrap()).unwrap()
}

fn callback_uri(purchase_id: Uuid, status: &str) -> String {
    format!(
        "/api/payment/callback?purchaseId={}&paymentID={}&status={}",
        purchase_id, PAYMENT_ID, status
    )
}

#[tokio::test]
async fn successful_callback_completes_purchase_and_redirects() {
    let app = TestApp::new().await;
    app.mount_token_grant(1).await;
    app.mount_create_payment(PAYMENT_ID).await;
    app.mount_execute_payment("Completed", 1).await;

    let user = app.customer();
    let paper = app.seed_paper(true, Some(dec!(500))).await;
    let purchase_id = start_payment(&app, &user, paper.id).await;

    let pending = app.purchase(purchase_id).await;
    assert_eq!(pending.payment_status, PaymentStatus::Pending);
    assert_eq!(pending.payment_method, PaymentMethod::Bkash);
    assert_eq!(pending.gateway_payment_id.as_deref(), Some(PAYMENT_ID));
    assert_eq!(pending.amount, dec!(500));

    let response = app
        .request(Method::GET, &callback_uri(purchase_id, "success"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("{}/payment/success?purchaseId={}", SITE_URL, purchase_id)
    );

    let settled = app.purchase(purchase_id).await;
    assert_eq!(settled.payment_status, PaymentStatus::Completed);
    assert_eq!(settled.gateway_trx_id.as_deref(), Some("BFK0SANDBOX"));

    let check = app
        .request_as(
            &user,
            Method::GET,
            &format!("/api/payment/check?paperId={}", paper.id),
            None,
        )
        .await;
    assert_eq!(check.status(), StatusCode::OK);
    assert_eq!(response_json(check).await["hasPurchased"], true);
}

#[tokio::test]
async fn replayed_callback_does_not_execute_twice() {
    let app = TestApp::new().await;
    app.mount_token_grant(1).await;
    app.mount_create_payment(PAYMENT_ID).await;
    app.mount_execute_payment("Completed", 1).await;

    let user = app.customer();
    let paper = app.seed_paper(true, Some(dec!(250))).await;
    let purchase_id = start_payment(&app, &user, paper.id).await;
    let expected = format!("{}/payment/success?purchaseId={}", SITE_URL, purchase_id);

    for _ in 0..2 {
        let response = app
            .request(Method::GET, &callback_uri(purchase_id, "success"), None, None)
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), expected);
    }

    assert_eq!(
        app.purchase(purchase_id).await.payment_status,
        PaymentStatus::Completed
    );
}

#[tokio::test]
async fn cancelled_callback_fails_purchase_without_execute() {
    let app = TestApp::new().await;
    app.mount_token_grant(1).await;
    app.mount_create_payment(PAYMENT_ID).await;
    app.mount_execute_payment("Completed", 0).await;

    let user = app.customer();
    let paper = app.seed_paper(true, Some(dec!(500))).await;
    let purchase_id = start_payment(&app, &user, paper.id).await;

    let response = app
        .request(Method::GET, &callback_uri(purchase_id, "cancel"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("{}/payment/failed?error=cancelled", SITE_URL)
    );
    assert_eq!(
        app.purchase(purchase_id).await.payment_status,
        PaymentStatus::Failed
    );

    let check = app
        .request_as(
            &user,
            Method::GET,
            &format!("/api/payment/check?paperId={}", paper.id),
            None,
        )
        .await;
    assert_eq!(response_json(check).await["hasPurchased"], false);
}

#[tokio::test]
async fn incomplete_execution_fails_purchase() {
    let app = TestApp::new().await;
    app.mount_token_grant(1).await;
    app.mount_create_payment(PAYMENT_ID).await;
    app.mount_execute_payment("Initiated", 1).await;
    app.mount_query_payment("Initiated", 1).await;

    let user = app.customer();
    let paper = app.seed_paper(true, Some(dec!(500))).await;
    let purchase_id = start_payment(&app, &user, paper.id).await;

    let response = app
        .request(Method::GET, &callback_uri(purchase_id, "success"), None, None)
        .await;
    assert_eq!(
        location(&response),
        format!("{}/payment/failed?error=payment_failed", SITE_URL)
    );
    assert_eq!(
        app.purchase(purchase_id).await.payment_status,
        PaymentStatus::Failed
    );
}

#[tokio::test]
async fn refused_execute_is_settled_by_status_query() {
    let app = TestApp::new().await;
    app.mount_token_grant(1).await;
    app.mount_create_payment(PAYMENT_ID).await;
    app.mount_execute_refused("2062", 1).await;
    app.mount_query_payment("Completed", 1).await;

    let user = app.customer();
    let paper = app.seed_paper(true, Some(dec!(500))).await;
    let purchase_id = start_payment(&app, &user, paper.id).await;

    let response = app
        .request(Method::GET, &callback_uri(purchase_id, "success"), None, None)
        .await;
    assert_eq!(
        location(&response),
        format!("{}/payment/success?purchaseId={}", SITE_URL, purchase_id)
    );
    let settled = app.purchase(purchase_id).await;
    assert_eq!(settled.payment_status, PaymentStatus::Completed);
    assert_eq!(settled.gateway_trx_id.as_deref(), Some("BFK0SANDBOX"));
}

#[tokio::test]
async fn malformed_payment_body_is_a_validation_error() {
    let app = TestApp::new().await;
    let user = app.customer();

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/payment/create",
            Some(json!({ "paperId": "abc" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["message"].as_str().is_some());

    let missing = app
        .request_as(&user, Method::POST, "/api/payment/create", Some(json!({})))
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_premium_paper_is_rejected_before_gateway() {
    let app = TestApp::new().await;
    app.mount_token_grant(0).await;

    let user = app.customer();
    let paper = app.seed_paper(false, None).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/payment/create",
            Some(json!({ "paperId": paper.id })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .request_as(
            &user,
            Method::POST,
            "/api/payment/create",
            Some(json!({ "paperId": Uuid::new_v4() })),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn payment_create_requires_authentication() {
    let app = TestApp::new().await;
    let paper = app.seed_paper(true, Some(dec!(500))).await;

    let response = app
        .request(
            Method::POST,
            "/api/payment/create",
            Some(json!({ "paperId": paper.id })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_callbacks_redirect_to_failure_page() {
    let app = TestApp::new().await;

    let missing = app
        .request(Method::GET, "/api/payment/callback?status=success", None, None)
        .await;
    assert_eq!(missing.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&missing),
        format!("{}/payment/failed?error=missing_params", SITE_URL)
    );

    let bare = app
        .request(Method::GET, "/api/payment/callback", None, None)
        .await;
    assert_eq!(
        location(&bare),
        format!("{}/payment/failed?error=missing_params", SITE_URL)
    );

    let unknown = app
        .request(
            Method::GET,
            &callback_uri(Uuid::new_v4(), "success"),
            None,
            None,
        )
        .await;
    assert_eq!(
        location(&unknown),
        format!("{}/payment/failed?error=invalid_purchase", SITE_URL)
    );

    let garbage = app
        .request(
            Method::GET,
            "/api/payment/callback?purchaseId=not-a-uuid&paymentID=abc&status=success",
            None,
            None,
        )
        .await;
    assert_eq!(
        location(&garbage),
        format!("{}/payment/failed?error=invalid_purchase", SITE_URL)
    );
}
