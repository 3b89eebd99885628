pub mod auth;
pub mod error;
pub mod extract;
pub mod ingress;
pub mod messages;
pub mod middleware;
pub mod pagination;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};

use courier_gateway::connection;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// Every route the server exposes. Transport layers (CORS, tracing) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/api/messages", get(messages::get_messages))
        .route("/api/socket/messages", post(messages::send_message))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.fanout.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
