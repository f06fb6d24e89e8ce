//! Storefront API Library
//!
//! Order lifecycle and payment settlement core: carts, checkout, charge
//! initiation and webhook reconciliation against an external payment
//! provider.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod notifier;
pub mod openapi;
pub mod services;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// All versioned API routes, nested under `/api/v1` by [`app_router`].
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::carts::routes())
        .merge(handlers::checkout::routes())
        .merge(handlers::orders::routes())
        .merge(handlers::payments::routes())
        .merge(handlers::webhooks::routes())
}

/// Builds the full application router: health, v1 API, Swagger UI and the
/// shared middleware stack.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health::routes())
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
