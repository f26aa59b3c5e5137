#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::{AppConfig, PaymentsConfig},
    db::{self, DbConfig},
    entities::user,
    repositories::{SeaOrmUserRepository, UserRepository},
    services::stripe::{PaymentIntent, PaymentProcessor, ProcessorError},
    AppState,
};
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// In-process stand-in for the payment processor. Intents start in
/// `requires_payment_method` and can be settled with [`FakeProcessor::succeed`].
#[derive(Default)]
pub struct FakeProcessor {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    created: Mutex<Vec<(i64, String, BTreeMap<String, String>)>>,
    fail_with: Mutex<Option<ProcessorError>>,
}

impl FakeProcessor {
    pub fn succeed(&self, id: &str) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(id) {
            intent.status = "succeeded".to_string();
        }
    }

    pub fn fail_next(&self, err: ProcessorError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    /// `(amount_minor, currency, metadata)` per create call
    pub fn created(&self) -> Vec<(i64, String, BTreeMap<String, String>)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<PaymentIntent, ProcessorError> {
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }

        let mut created = self.created.lock().unwrap();
        created.push((amount_minor, currency.to_string(), metadata.clone()));
        let id = format!("pi_test_{}", created.len());
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: Some(format!("{}_secret_x", id)),
            amount: amount_minor,
            currency: currency.to_string(),
            status: "requires_payment_method".to_string(),
            metadata,
        };
        self.intents.lock().unwrap().insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProcessorError> {
        self.intents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessorError::Rejected {
                status: 404,
                message: format!("No such payment_intent: '{}'", id),
            })
    }
}

/// Router over a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    users: Arc<dyn UserRepository>,
    auth: AuthService,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_payments(PaymentsConfig::default()).await
    }

    pub async fn with_payments(payments: PaymentsConfig) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            0,
            "development".to_string(),
        );
        cfg.payments = payments;

        // One connection so every query sees the same in-memory database
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

        let db = Arc::new(pool);
        let processor = Arc::new(FakeProcessor::default());
        let state = AppState::new(db.clone(), cfg.clone(), processor.clone());
        let users: Arc<dyn UserRepository> = Arc::new(SeaOrmUserRepository::new(db));
        let auth = AuthService::new(AuthConfig::from(&cfg), users.clone());

        Self {
            router: storefront_api::build_router(state.clone()),
            state,
            processor,
            users,
            auth,
        }
    }

    /// Creates a user and returns it with a valid bearer token.
    pub async fn user(&self, name: &str, is_admin: bool) -> (user::Model, String) {
        let email = format!("{}@example.com", name.to_lowercase());
        let model = self
            .users
            .create(name, &email, is_admin)
            .await
            .expect("create user");
        let token = self.auth.issue_token(&model).expect("issue token");
        (model, token)
    }

    /// Signs a token for `model` whether or not it is stored.
    pub fn token_for(&self, model: &user::Model) -> String {
        self.auth.issue_token(model).expect("issue token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
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

    /// Sends a request and returns the status with the parsed JSON body
    /// (`Value::Null` for empty or non-JSON bodies).
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn order_count(&self) -> usize {
        use sea_orm::EntityTrait;
        storefront_api::entities::Order::find()
            .all(self.state.db.as_ref())
            .await
            .expect("count orders")
            .len()
    }
}

pub fn order_body(items: &[(&str, f64)], total: f64) -> Value {
    serde_json::json!({
        "orderItems": items
            .iter()
            .map(|(name, price)| serde_json::json!({
                "name": name,
                "price": price,
                "product": format!("plan-{}", name.to_lowercase()),
            }))
            .collect::<Vec<_>>(),
        "paymentMethod": "Card",
        "itemsPrice": total,
        "taxPrice": 0,
        "totalPrice": total,
    })
}
