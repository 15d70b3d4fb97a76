pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};

use crate::services::{BillingService, WebhookDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub billing: BillingService,
    pub webhooks: WebhookDispatcher,
    pub logging: middleware::RequestLogging,
}

impl AppState {
    pub fn new(billing: BillingService) -> Self {
        let webhooks = WebhookDispatcher::new(billing.clone());
        Self {
            billing,
            webhooks,
            logging: middleware::RequestLogging::default(),
        }
    }

    pub fn with_request_body_logging(mut self, enabled: bool) -> Self {
        self.logging.log_body = enabled;
        self
    }
}

pub fn create_app(state: AppState) -> Router {
    use handlers::transactions;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks", post(handlers::webhook::receive_detected))
        .route("/webhooks/:gateway", post(handlers::webhook::receive))
        .route(
            "/transactions",
            post(transactions::create_transaction).get(transactions::list_transactions),
        )
        .route("/transactions/:id", get(transactions::get_transaction))
        .route(
            "/transactions/:id/confirm",
            post(transactions::confirm_transaction),
        )
        .route(
            "/transactions/:id/refund",
            post(transactions::refund_transaction),
        )
        .route(
            "/transactions/:id/cancel",
            post(transactions::cancel_transaction),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.logging,
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}
