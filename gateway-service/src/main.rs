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

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use gameclient_common::{CORRELATION_ID_HEADER, CorrelationId, parse_env_millis};
use lambda_http::run as lambda_run;
use reqwest::Url;
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, Span, error, info, info_span, warn};

const STORE_CALL_FAILED: &str = "Internal error when calling store-service";

#[derive(Clone)]
struct AppState {
    store: Arc<StoreForwarder>,
}

/// Thin HTTP forwarder to store-service. Statuses and bodies pass through.
struct StoreForwarder {
    client: reqwest::Client,
    base_url: Url,
}

impl StoreForwarder {
    fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("STORE_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "http://store-service:8091".to_string());
        let call_timeout = parse_env_millis("STORE_CALL_TIMEOUT_MS", 15_000);
        info!(%base_url, call_timeout_ms = call_timeout.as_millis() as u64, "store forwarder configured");
        Self::new(&base_url, call_timeout)
    }

    fn new(base_url: &str, call_timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context(format!("invalid store base url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("store base url {base_url} cannot carry a path");
        }
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("failed to build store http client")?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::internal(STORE_CALL_FAILED))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn forward(
        &self,
        correlation_id: &CorrelationId,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<Forwarded, ApiError> {
        let url = self.url(segments)?;
        let mut request = self
            .client
            .request(method, url.clone())
            .header(CORRELATION_ID_HEADER, correlation_id.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|err| {
            error!(error = %err, %url, "store-service call failed");
            ApiError::internal(STORE_CALL_FAILED)
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|err| {
            error!(error = %err, %url, "failed to read store-service response");
            ApiError::internal(STORE_CALL_FAILED)
        })?;
        if status.is_success() && text.trim().is_empty() {
            info!(%status, "store-service call succeeded without content");
            return Ok(Forwarded {
                status: StatusCode::OK,
                body: None,
            });
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| Value::String(text));
        if status.is_success() {
            info!(%status, "store-service call succeeded");
        } else {
            warn!(%status, body = %body, "store-service returned failure");
        }
        Ok(Forwarded {
            status,
            body: Some(body),
        })
    }
}

/// `body` is `None` when the store answered success with no content.
#[derive(Debug)]
struct Forwarded {
    status: StatusCode,
    body: Option<Value>,
}

impl IntoResponse for Forwarded {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "gateway_service=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState {
        store: Arc::new(StoreForwarder::from_env()?),
    };
    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running gateway-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("GATEWAY_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "gateway-service listening");
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

/// Resolves the correlation id before tracing starts so the request span,
/// the handler span and the forwarded call all carry the same value.
async fn ensure_correlation_id(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = correlation_id(request.headers());
    let header = HeaderValue::from_str(correlation_id.as_str()).ok();
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

async fn health() -> Json<Value> {
    Json(serde_json::json!({"ok": true, "service": "gateway-service"}))
}

fn correlation_id(headers: &HeaderMap) -> CorrelationId {
    CorrelationId::from_header(
        headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

fn user_span(operation: &'static str, username: &str, correlation_id: &CorrelationId) -> Span {
    info_span!(
        "gateway_forward",
        operation,
        user.name = %username,
        correlation_id = %correlation_id
    )
}

async fn add_or_update_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Forwarded, ApiError> {
    let Json(game_names) = payload?;
    let correlation_id = correlation_id(&headers);
    let span = user_span("add_or_update_user_games", &username, &correlation_id);
    state
        .store
        .forward(
            &correlation_id,
            Method::POST,
            &["user-games", &username],
            Some(&Value::from(game_names)),
        )
        .instrument(span)
        .await
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Forwarded, ApiError> {
    let correlation_id = correlation_id(&headers);
    let span = user_span("clear_user_games", &username, &correlation_id);
    state
        .store
        .forward(&correlation_id, Method::DELETE, &["user-games", &username], None)
        .instrument(span)
        .await
}

async fn user_games_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Forwarded, ApiError> {
    let correlation_id = correlation_id(&headers);
    let span = user_span("get_user_games", &username, &correlation_id);
    state
        .store
        .forward(&correlation_id, Method::GET, &["user-games", &username], None)
        .instrument(span)
        .await
}

async fn all_games_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Forwarded, ApiError> {
    let correlation_id = correlation_id(&headers);
    let span = info_span!("gateway_forward", operation = "get_all_games", correlation_id = %correlation_id);
    state
        .store
        .forward(&correlation_id, Method::GET, &["user-games", "games"], None)
        .instrument(span)
        .await
}

async fn all_users_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Forwarded, ApiError> {
    let correlation_id = correlation_id(&headers);
    let span = info_span!("gateway_forward", operation = "get_all_users", correlation_id = %correlation_id);
    state
        .store
        .forward(&correlation_id, Method::GET, &["user-games", "users"], None)
        .instrument(span)
        .await
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
