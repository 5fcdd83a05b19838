#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use exam_archive_api::{
    auth::AuthUser,
    build_router,
    config::{AppConfig, BkashConfig},
    db::{self, DbConfig},
    entities::{booklet, paper, purchase},
    services::payments::{BkashClient, PaymentGateway},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const MASTER_ADMIN_EMAIL: &str = "admin@example.com";
pub const SITE_URL: &str = "http://storefront.test";

pub const GRANT_PATH: &str = "/tokenized/checkout/token/grant";
pub const CREATE_PATH: &str = "/tokenized/checkout/create";
pub const EXECUTE_PATH: &str = "/tokenized/checkout/execute";
pub const QUERY_PATH: &str = "/tokenized/checkout/payment/status";

/// Application over an in-memory SQLite database with bKash served by wiremock.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub bkash: MockServer,
}

impl TestApp {
    pub async fn new() -> Self {
        let bkash = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.site_url = SITE_URL.to_string();
        cfg.master_admin_email = Some(MASTER_ADMIN_EMAIL.to_string());
        cfg.bkash = BkashConfig {
            base_url: bkash.uri(),
            app_key: "test-app-key".to_string(),
            app_secret: "test-app-secret".to_string(),
            username: "sandbox-merchant".to_string(),
            password: "sandbox-pass".to_string(),
            ..BkashConfig::default()
        };

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..DbConfig::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let gateway: Arc<dyn PaymentGateway> = Arc::new(
            BkashClient::new(cfg.bkash.clone(), cfg.currency.clone()).expect("bkash client"),
        );
        let state = AppState::new(Arc::new(pool), Arc::new(cfg), gateway);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            bkash,
        }
    }

    pub fn customer(&self) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: Some("student@example.com".to_string()),
            name: Some("Test Student".to_string()),
            roles: vec![],
        }
    }

    pub fn master_admin(&self) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: Some(MASTER_ADMIN_EMAIL.to_string()),
            name: Some("Archive Admin".to_string()),
            roles: vec![],
        }
    }

    pub fn token_for(&self, user: &AuthUser) -> String {
        self.state.auth.issue_token(user).expect("issue token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn request_as(
        &self,
        user: &AuthUser,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token_for(user);
        self.request(method, uri, body, Some(&token)).await
    }

    pub async fn seed_paper(&self, is_premium: bool, price: Option<Decimal>) -> paper::Model {
        let now = Utc::now();
        paper::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set("Chemistry Paper 1".to_string()),
            level: Set("O Level".to_string()),
            subject: Set("Chemistry".to_string()),
            year: Set(2022),
            paper_number: Set(Some("1".to_string())),
            description: Set(Some("May/June session".to_string())),
            file_url: Set("papers/chemistry-2022-p1.pdf".to_string()),
            cover_image_url: Set(None),
            is_premium: Set(is_premium),
            price: Set(price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed paper")
    }

    pub async fn seed_booklet(&self, price: Decimal) -> booklet::Model {
        let now = Utc::now();
        booklet::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set("Physics Topical Booklet".to_string()),
            description: Set(None),
            price: Set(price),
            cover_image_url: Set(None),
            level: Set(Some("A Level".to_string())),
            subject: Set(Some("Physics".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed booklet")
    }

    pub async fn purchases_for(&self, transaction_id: &str) -> Vec<purchase::Model> {
        purchase::Entity::find()
            .filter(purchase::Column::TransactionId.eq(transaction_id))
            .all(self.state.db.as_ref())
            .await
            .expect("load purchases")
    }

    pub async fn purchase(&self, id: Uuid) -> purchase::Model {
        purchase::Entity::find_by_id(id)
            .one(self.state.db.as_ref())
            .await
            .expect("load purchase")
            .expect("purchase exists")
    }

    /// Token grant stub; `expected` is the exact number of grants allowed
    pub async fn mount_token_grant(&self, expected: u64) {
        Mock::given(method("POST"))
            .and(path(GRANT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id_token": "sandbox-id-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "sandbox-refresh-token"
            })))
            .expect(expected)
            .mount(&self.bkash)
            .await;
    }

    pub async fn mount_create_payment(&self, payment_id: &str) {
        Mock::given(method("POST"))
            .and(path(CREATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentID": payment_id,
                "bkashURL": format!("https://sandbox.payment.bkash.com/?paymentId={}", payment_id),
                "statusCode": "0000",
                "statusMessage": "Successful"
            })))
            .mount(&self.bkash)
            .await;
    }

    /// Execute stub; `expected` is the exact number of execute calls allowed
    pub async fn mount_execute_payment(&self, transaction_status: &str, expected: u64) {
        Mock::given(method("POST"))
            .and(path(EXECUTE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentID": "TR0011sandbox",
                "trxID": "BFK0SANDBOX",
                "transactionStatus": transaction_status,
                "statusCode": "0000",
                "statusMessage": "Successful"
            })))
            .expect(expected)
            .mount(&self.bkash)
            .await;
    }

    /// Execute stub answering with a provider error body and no transaction status
    pub async fn mount_execute_refused(&self, status_code: &str, expected: u64) {
        Mock::given(method("POST"))
            .and(path(EXECUTE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statusCode": status_code,
                "statusMessage": "The payment has already been completed"
            })))
            .expect(expected)
            .mount(&self.bkash)
            .await;
    }

    pub async fn mount_query_payment(&self, transaction_status: &str, expected: u64) {
        Mock::given(method("POST"))
            .and(path(QUERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentID": "TR0011sandbox",
                "trxID": "BFK0SANDBOX",
                "transactionStatus": transaction_status,
                "statusCode": "0000",
                "statusMessage": "Successful"
            })))
            .expect(expected)
            .mount(&self.bkash)
            .await;
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Money fields serialize as strings; accept numbers too
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a money value: {other}"),
    }
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get("location")
        .expect("redirect location")
        .to_str()
        .expect("ascii location")
        .to_string()
}

pub fn contact_form() -> Value {
    json!({
        "fullName": "Test Student",
        "email": "student@example.com",
        "phone": "01711000000",
        "address": "House 7, Road 2, Mirpur, Dhaka"
    })
}
