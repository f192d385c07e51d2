//! relay-api - Front side of the relay gateway
//!
//! Front sessions speak the server side of the protocol to callers and
//! forward every request to the shared capability router. Two transports
//! are provided:
//!
//! - stdio: exactly one session bound to the process lifetime
//! - SSE: one session per `GET /sse` stream, frames posted to `/message`,
//!   every HTTP request except `/health` behind the bearer-token gate
//!
//! # Usage
//!
//! ```ignore
//! use relay_api::{serve_sse, AppState, AuthGate};
//!
//! let state = AppState::new(gateway.router().clone());
//! let listener = tokio::net::TcpListener::bind("localhost:3006").await?;
//! serve_sse(listener, state, AuthGate::new(secret), shutdown).await?;
//! ```

pub mod auth;
pub mod error;
pub mod front;
pub mod handlers;
pub mod state;
pub mod stdio;

pub use auth::{auth_middleware, AuthGate};
pub use error::ApiError;
pub use front::{CloseAction, FrontMode, FrontSession};
pub use handlers::sse::SessionRegistry;
pub use state::AppState;
pub use stdio::serve_stdio;

use std::future::Future;

use axum::routing::{get, post};
use axum::{middleware, Extension, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the streaming front router
pub fn create_router(state: AppState, auth: AuthGate) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sse", get(handlers::sse::open_stream))
        .route(handlers::sse::MESSAGE_PATH, post(handlers::sse::post_message))
        .layer(middleware::from_fn(auth_middleware))
        .layer(Extension(auth))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the streaming front on `listener` until `shutdown` resolves.
///
/// Stream sessions are closed first, then in-flight HTTP requests drain.
pub async fn serve_sse<F>(
    listener: TcpListener,
    state: AppState,
    auth: AuthGate,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = state.sessions.clone();
    let app = create_router(state, auth);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            sessions.close_all();
        })
        .await
}
