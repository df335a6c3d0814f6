// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod directory;
mod reconcile;
#[cfg(test)]
mod test_support;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use gameclient_common::{
    CORRELATION_ID_HEADER, CorrelationId, MessageResponse, parse_env_bool, parse_env_millis,
};
use lambda_http::run as lambda_run;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, Span, error, info, info_span, warn};

use crate::{
    directory::{HttpDirectoryClient, RequestContext},
    reconcile::{ReconcileError, Reconciler},
};

#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
    request_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "store_service=debug,tower_http=info".to_string()),
        )
        .init();

    let directory = HttpDirectoryClient::from_env().context("failed to configure directory client")?;
    let fault_injection = parse_env_bool("STORE_FAULT_INJECTION", true);
    let request_timeout = parse_env_millis("STORE_REQUEST_TIMEOUT_MS", 10_000);
    info!(
        fault_injection,
        request_timeout_ms = request_timeout.as_millis() as u64,
        "store-service configured"
    );

    let state = AppState {
        reconciler: Arc::new(Reconciler::new(Arc::new(directory), fault_injection)),
        request_timeout,
    };

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running store-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("STORE_BIND", "0.0.0.0:8091")?;
    info!(%bind_addr, "store-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/user-games/games", get(all_games_handler))
        .route("/user-games/users", get(all_users_handler))
        .route(
            "/user-games/{username}",
            get(user_games_handler)
                .post(add_or_update_handler)
                .delete(clear_handler),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(middleware::from_fn(ensure_correlation_id))
}

/// Runs outside `TraceLayer` so the request span already sees the resolved id.
async fn ensure_correlation_id(mut request: Request<Body>, next: Next) -> Response {
    let ctx = request_context(request.headers());
    let header = HeaderValue::from_str(ctx.correlation_id.as_str()).ok();
    if let Some(value) = &header {
        request
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

fn request_span(request: &Request<Body>) -> Span {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        correlation_id
    )
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "store-service"}))
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let inbound = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok());
    RequestContext::new(CorrelationId::from_header(inbound))
}

/// Dropping the engine future on timeout cancels the in-flight directory call.
async fn run_with_deadline<T>(
    timeout: Duration,
    operation: impl Future<Output = Result<T, ReconcileError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "request deadline elapsed; directory call cancelled"
            );
            Err(ApiError::gateway_timeout("request timed out"))
        }
    }
}

async fn add_or_update_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(game_names) = payload?;
    let ctx = request_context(&headers);
    let span = info_span!(
        "add_or_update_user_games",
        correlation_id = %ctx.correlation_id,
        user.name = %username
    );
    info!(parent: &span, games = ?game_names, "received request to add or update games");

    let outcome = run_with_deadline(
        state.request_timeout,
        state
            .reconciler
            .add_or_update_user_games(&ctx, &username, &game_names)
            .instrument(span.clone()),
    )
    .await?;

    info!(
        parent: &span,
        user_id = outcome.user.id,
        user_created = outcome.user_created,
        linked = outcome.linked.len(),
        "updated games for user"
    );
    Ok(Json(MessageResponse::new(format!(
        "Games for {username} updated"
    ))))
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ApiError> {
    let ctx = request_context(&headers);
    let span = info_span!(
        "clear_user_games",
        correlation_id = %ctx.correlation_id,
        user.name = %username
    );

    let outcome = run_with_deadline(
        state.request_timeout,
        state
            .reconciler
            .clear_user_games(&ctx, &username)
            .instrument(span.clone()),
    )
    .await?;

    if outcome.failed > 0 {
        warn!(
            parent: &span,
            failed = outcome.failed,
            attempted = outcome.attempted,
            "some unlinks failed; reporting success"
        );
    }
    Ok(Json(MessageResponse::new(format!(
        "All games for {username} removed"
    ))))
}

async fn user_games_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = request_context(&headers);
    let span = info_span!(
        "get_user_games",
        correlation_id = %ctx.correlation_id,
        user.name = %username
    );

    let games = run_with_deadline(
        state.request_timeout,
        state
            .reconciler
            .get_user_games_by_name(&ctx, &username)
            .instrument(span),
    )
    .await?
    .ok_or_else(|| ApiError::not_found(format!("User {username} not found")))?;
    Ok(Json(games))
}

async fn all_games_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = request_context(&headers);
    let span = info_span!("get_all_games", correlation_id = %ctx.correlation_id);
    let games = run_with_deadline(
        state.request_timeout,
        state.reconciler.get_all_games(&ctx).instrument(span),
    )
    .await?;
    Ok(Json(games))
}

async fn all_users_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = request_context(&headers);
    let span = info_span!("get_all_users", correlation_id = %ctx.correlation_id);
    let users = run_with_deadline(
        state.request_timeout,
        state.reconciler.get_all_users(&ctx).instrument(span),
    )
    .await?;
    Ok(Json(users))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn gateway_timeout(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            message: message.into(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(error: ReconcileError) -> Self {
        match error {
            ReconcileError::NotFound(message) => Self::not_found(message),
            ReconcileError::Operation {
                message,
                failed_game,
                linked_games,
            } => {
                if let Some(game) = failed_game {
                    warn!(failed_game = %game, linked_before_failure = ?linked_games, "batch stopped");
                }
                Self::internal(message)
            }
            ReconcileError::DownstreamUnavailable(detail) => {
                error!(detail = %detail, "directory unavailable");
                Self::internal("directory service unavailable")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
