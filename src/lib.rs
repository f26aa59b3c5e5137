//! Storefront API Library
//!
//! Order and payment backend for a plan-subscription storefront: payment
//! intents, paid order recording, order listings and the bearer-token gate in
//! front of them, plus the client-side checkout driver.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod checkout;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::auth::AuthRouterExt;
use crate::repositories::SeaOrmUserRepository;
use crate::services::stripe::PaymentProcessor;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub auth: Arc<auth::AuthService>,
}

impl AppState {
    /// Wires services and the auth gate over one shared connection pool.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let services =
            handlers::AppServices::new(db.clone(), processor, config.payments.clone());
        let auth = Arc::new(auth::AuthService::new(
            auth::AuthConfig::from(&config),
            Arc::new(SeaOrmUserRepository::new(db.clone())),
        ));

        Self {
            db,
            config,
            services,
            auth,
        }
    }
}

/// Routes mounted under `/api`
pub fn api_routes() -> Router<AppState> {
    let authenticated = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/myorders", get(handlers::orders::get_my_orders))
        .route(
            "/payment/create-payment-intent",
            post(handlers::payments::create_payment_intent),
        )
        .with_auth();

    let admin = Router::new()
        .route("/orders", get(handlers::orders::get_orders))
        .with_admin();

    Router::new().merge(authenticated).merge(admin)
}

/// CORS from configured origins, permissive in development or when
/// explicitly allowed, same-origin otherwise.
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("No CORS origins configured; cross-origin requests will be rejected");
        CorsLayer::new()
    }
}

/// Full application router with the global middleware stack applied.
pub fn build_router(state: AppState) -> Router {
    let cfg = &state.config;

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api", api_routes())
        .layer(TimeoutLayer::new(cfg.http_timeout()))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(DefaultBodyLimit::max(cfg.max_body_size))
        .layer(cors_layer(cfg))
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            auth::inject_auth_service,
        ))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
