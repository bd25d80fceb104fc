//! REST API routes configuration

use crate::api::handlers::{self, ApiError, ApiState};
use crate::api::websocket::ws_handler;
use crate::service::ErrorKind;
use axum::{
    http::{StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Unknown paths answer with the same error body as every other failure
async fn fallback_handler(uri: Uri) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: format!("No route for {}", uri.path()),
            kind: ErrorKind::NotFound,
        }),
    )
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(ws_handler))
        .route("/api/v1/about", get(handlers::about))
        // Ledger
        .route("/api/v1/safes", post(handlers::deploy_safe))
        .route("/api/v1/safes/{address}", get(handlers::get_safe))
        .route("/api/v1/safes/{address}/balance", get(handlers::get_balance))
        .route("/api/v1/accounts/{address}", get(handlers::get_balance))
        .route("/api/v1/faucet", post(handlers::faucet))
        .route("/api/v1/transfers", post(handlers::transfer))
        // Envelopes
        .route(
            "/api/v1/safes/{address}/multisig-transactions",
            get(handlers::list_transactions).post(handlers::propose_transaction),
        )
        .route(
            "/api/v1/safes/{address}/multisig-transactions/pending",
            get(handlers::list_pending_transactions),
        )
        .route(
            "/api/v1/multisig-transactions/{hash}",
            get(handlers::get_transaction),
        )
        .route(
            "/api/v1/multisig-transactions/{hash}/confirmations",
            post(handlers::confirm_transaction),
        )
        .route(
            "/api/v1/multisig-transactions/{hash}/execute",
            post(handlers::execute_transaction),
        )
        // Messages
        .route(
            "/api/v1/safes/{address}/messages",
            get(handlers::list_messages).post(handlers::create_message),
        )
        .route("/api/v1/messages/{hash}", get(handlers::get_message))
        .route(
            "/api/v1/messages/{hash}/signatures",
            post(handlers::add_message_signature),
        )
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}
