mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use common::TestApp;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::checkout::{
    CardConfirmer, CardOutcome, Cart, CartItem, CheckoutError, CheckoutFlow, HttpCheckoutBackend,
};
use storefront_api::config::PaymentsConfig;
use storefront_api::services::stripe::{PaymentProcessor, ProcessorError, StripePaymentProcessor};
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INTENT_URI: &str = "/api/payment/create-payment-intent";

#[tokio::test]
async fn intent_is_created_in_minor_units_for_the_caller() {
    let app = TestApp::new().await;
    let (buyer, token) = app.user("Asha", false).await;

    let (status, body) = app
        .json(Method::POST, INTENT_URI, Some(json!({"amount": 49.99})), Some(&token))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clientSecret"], "pi_test_1_secret_x");
    assert_eq!(body["paymentIntentId"], "pi_test_1");

    let created = app.processor.created();
    assert_eq!(created.len(), 1);
    let (amount, currency, metadata) = &created[0];
    assert_eq!(*amount, 4999);
    assert_eq!(currency, "inr");
    assert_eq!(metadata.get("user_id"), Some(&buyer.id.to_string()));
}

#[tokio::test]
async fn every_call_creates_a_new_intent() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Asha", false).await;

    for _ in 0..2 {
        let (status, _) = app
            .json(Method::POST, INTENT_URI, Some(json!({"amount": 10})), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(app.processor.created().len(), 2);
}

#[tokio::test]
async fn invalid_amounts_never_reach_the_processor() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Asha", false).await;

    for body in [json!({"amount": 0}), json!({"amount": -5}), json!({})] {
        let (status, response) = app
            .json(Method::POST, INTENT_URI, Some(body.clone()), Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(response["message"].as_str().unwrap().contains("Amount"));
    }
    assert!(app.processor.created().is_empty());
}

#[tokio::test]
async fn processor_failure_is_a_bad_gateway() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Asha", false).await;
    app.processor
        .fail_next(ProcessorError::Unreachable("connection reset".into()));

    let (status, body) = app
        .json(Method::POST, INTENT_URI, Some(json!({"amount": 49.99})), Some(&token))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.get("clientSecret").is_none());
}

#[tokio::test]
async fn intent_requires_authentication() {
    let app = TestApp::new().await;

    let (status, _) = app
        .json(Method::POST, INTENT_URI, Some(json!({"amount": 49.99})), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.processor.created().is_empty());
}

fn stripe_config(server: &MockServer) -> PaymentsConfig {
    PaymentsConfig {
        stripe_secret_key: Some("sk_test_123".into()),
        stripe_api_base: server.uri(),
        ..PaymentsConfig::default()
    }
}

#[tokio::test]
async fn stripe_client_posts_form_encoded_intent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("Stripe-Version", "2023-10-16"))
        .and(header_exists("authorization"))
        .and(body_string_contains("amount=4999"))
        .and(body_string_contains("currency=inr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_live_1",
            "object": "payment_intent",
            "amount": 4999,
            "currency": "inr",
            "status": "requires_payment_method",
            "client_secret": "pi_live_1_secret_abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let processor = StripePaymentProcessor::new(&stripe_config(&server)).unwrap();
    let mut metadata = BTreeMap::new();
    metadata.insert("user_id".to_string(), "u-1".to_string());

    let intent = processor
        .create_payment_intent(4999, "INR", metadata)
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_live_1");
    assert_eq!(intent.client_secret.as_deref(), Some("pi_live_1_secret_abc"));
    assert!(!intent.is_succeeded());
}

#[tokio::test]
async fn stripe_error_body_becomes_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {"type": "card_error", "message": "Amount must be at least ₹0.50 inr"}
        })))
        .mount(&server)
        .await;

    let processor = StripePaymentProcessor::new(&stripe_config(&server)).unwrap();
    let err = processor
        .create_payment_intent(10, "inr", BTreeMap::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ProcessorError::Rejected {
            status: 402,
            message: "Amount must be at least ₹0.50 inr".into(),
        }
    );
}

#[tokio::test]
async fn stripe_client_retrieves_intent_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_live_9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_live_9",
            "amount": 19900,
            "currency": "inr",
            "status": "succeeded"
        })))
        .mount(&server)
        .await;

    let processor = StripePaymentProcessor::new(&stripe_config(&server)).unwrap();
    let intent = processor.retrieve_payment_intent("pi_live_9").await.unwrap();

    assert!(intent.is_succeeded());
    assert_eq!(intent.amount, 19900);
    assert!(intent.client_secret.is_none());
}

struct ApprovingCard;

#[async_trait]
impl CardConfirmer for ApprovingCard {
    async fn confirm_card_payment(&self, _client_secret: &str) -> Result<CardOutcome, CheckoutError> {
        Ok(CardOutcome::Succeeded)
    }
}

fn pro_cart() -> Cart {
    let mut cart = Cart::new();
    cart.add(CartItem {
        id: "pro".into(),
        name: "Pro".into(),
        price: dec!(199.00),
        period: "Monthly".into(),
    });
    cart
}

#[tokio::test]
async fn http_checkout_backend_drives_a_full_checkout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INTENT_URI))
        .and(header("authorization", "Bearer user-token"))
        .and(body_string_contains("199"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "clientSecret": "pi_9_secret_x",
            "paymentIntentId": "pi_9"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .and(body_string_contains("\"paymentIntentId\":\"pi_9\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "9b2f3c1e-8f1a-4a53-9d7c-3f2a1b0c4d5e",
            "user": "0c6c1a52-4d1e-4a7b-9a41-6f7e2b3c9d10",
            "orderItems": [{"name": "Pro", "price": 199.0, "product": "pro", "image": null}],
            "paymentMethod": "Card",
            "itemsPrice": 199.0,
            "taxPrice": 0.0,
            "totalPrice": 199.0,
            "isPaid": true,
            "paidAt": "2026-01-01T00:00:00Z",
            "isDelivered": false,
            "deliveredAt": null,
            "paymentIntentId": "pi_9",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend =
        HttpCheckoutBackend::new(server.uri(), "user-token", Duration::from_secs(5)).unwrap();
    let flow = CheckoutFlow::new(backend);

    let pending = flow.begin(&pro_cart()).await.unwrap();
    assert_eq!(pending.payment_intent_id(), "pi_9");

    let order = pending.confirm(&ApprovingCard).await.unwrap();
    assert_eq!(order.total_price, dec!(199));
    assert!(order.is_paid);
    assert_eq!(order.order_items[0].product, "pro");
}

#[tokio::test]
async fn http_checkout_backend_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INTENT_URI))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": "AUTH_INVALID_TOKEN", "message": "Not authorized, token failed"}
        })))
        .mount(&server)
        .await;

    let backend = HttpCheckoutBackend::new(server.uri(), "stale", Duration::from_secs(5)).unwrap();
    let flow = CheckoutFlow::new(backend);

    let err = flow.begin(&pro_cart()).await.err();
    assert_eq!(
        err,
        Some(CheckoutError::Api {
            status: 401,
            message: "Not authorized, token failed".into(),
        })
    );
}
