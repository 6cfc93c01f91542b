//! Local command endpoint: `POST /command`, one request, one envelope back.

use crate::commands;
use crate::state::AgentContext;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use hostwatch_common::sanitize;
use hostwatch_common::types::{Command, CommandResponse};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};

pub fn build_router(ctx: Arc<AgentContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/command", post(handle_command))
        .with_state(ctx)
        .layer(cors)
        .layer(CatchPanicLayer::new())
}

async fn handle_command(State(ctx): State<Arc<AgentContext>>, body: Bytes) -> Response {
    if !sanitize::is_valid_utf8(&body) {
        return (StatusCode::BAD_REQUEST, "Invalid UTF-8").into_response();
    }

    let command: Command = match serde_json::from_slice(&body) {
        Ok(command) => command,
        Err(err) => {
            return envelope(CommandResponse::fail(format!(
                "INVALID_ARGUMENT: malformed command: {err}"
            )))
        }
    };

    envelope(commands::dispatch(&ctx, command).await)
}

/// Command outcomes always travel as HTTP 200; only endpoint failures use
/// transport status codes.
fn envelope(response: CommandResponse) -> Response {
    let body = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        )],
        body,
    )
        .into_response()
}

/// Bind and serve until the shutdown flag flips; binding failures are fatal
/// to the caller.
pub async fn serve(
    ctx: Arc<AgentContext>,
    listener: tokio::net::TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = build_router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Already-requested shutdown resolves immediately via the marker.
            if !*shutdown.borrow_and_update() {
                let _ = shutdown.changed().await;
            }
        })
        .await
}
