mod rate_limit;

use std::convert::Infallible;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use wayfarer_agents::{AgentError, PlanEvent, PlannerAgent};
use wayfarer_core::{normalize, PlanRequest};
use wayfarer_geo::{MapBackend, RouteStop};
use wayfarer_llm::ModelBackend;
use wayfarer_observability::{AppMetrics, MetricsSnapshot};

pub use crate::rate_limit::IpRateLimiter;

pub type Planner = PlannerAgent<MapBackend, ModelBackend>;

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Service settings read from `WAYFARER_*` variables.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 30,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allowed_origins: parse_allowed_origins(),
            rate_limit_window: Duration::from_secs(
                env::var("WAYFARER_RATE_LIMIT_WINDOW_SECONDS")
                    .ok()
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(defaults.rate_limit_window.as_secs()),
            ),
            rate_limit_max: env::var("WAYFARER_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.rate_limit_max),
            max_body_bytes: env::var("WAYFARER_MAX_BODY_BYTES")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.max_body_bytes),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<Planner>,
    pub metrics: Arc<AppMetrics>,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub max_body_bytes: usize,
    pub amap_enabled: bool,
}

impl ApiState {
    pub fn new(maps: MapBackend, model: ModelBackend, config: &ApiConfig) -> Self {
        let metrics = AppMetrics::shared();
        let amap_enabled = maps.is_live();
        let agent = Arc::new(PlannerAgent::new(
            Arc::new(maps),
            Arc::new(model),
            metrics.clone(),
        ));

        Self {
            agent,
            metrics,
            limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
            allowed_origins: Arc::new(config.allowed_origins.clone()),
            max_body_bytes: config.max_body_bytes,
            amap_enabled,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
    capabilities: HealthCapabilities,
}

#[derive(Debug, Serialize)]
struct HealthCapabilities {
    llm: bool,
    amap: bool,
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct DayRouteRequest {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    stops: Vec<RouteStop>,
}

pub async fn build_app() -> Result<Router> {
    let config = ApiConfig::from_env();
    let maps = MapBackend::from_env().context("failed to build map client")?;
    let model = ModelBackend::from_env().context("failed to build language model client")?;

    Ok(build_router(ApiState::new(maps, model, &config)))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/itinerary/plan", post(plan))
        .route("/api/v1/itinerary/plan/stream", post(plan_stream))
        .route("/api/v1/itinerary/day-route", post(day_route))
        .route("/api/v1/itinerary/daily", post(daily))
        .route("/api/v1/budget/normalize", post(budget_normalize))
        .route("/api/v1/budget/parse", post(budget_parse))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        capabilities: HealthCapabilities {
            llm: state.agent.model_configured(),
            amap: state.amap_enabled,
        },
    };
    (StatusCode::OK, Json(payload))
}

async fn plan(State(state): State<ApiState>, Json(request): Json<PlanRequest>) -> Response {
    match state.agent.plan(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => agent_error_response(error),
    }
}

async fn plan_stream(State(state): State<ApiState>, Json(request): Json<PlanRequest>) -> Response {
    if request.text.trim().is_empty() {
        return empty_text_response();
    }

    let events = state.agent.plan_stream(request);
    Sse::new(sse_events(events))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn day_route(
    State(state): State<ApiState>,
    Json(request): Json<DayRouteRequest>,
) -> impl IntoResponse {
    let route = state
        .agent
        .day_route(request.stops, request.city.as_deref())
        .await;
    (StatusCode::OK, Json(route))
}

async fn daily(State(state): State<ApiState>, Json(request): Json<PlanRequest>) -> Response {
    match state
        .agent
        .daily(&request.text, request.declared_city())
        .await
    {
        Ok(records) => (StatusCode::OK, Json(serde_json::json!({ "daily": records }))).into_response(),
        Err(error) => agent_error_response(error),
    }
}

async fn budget_normalize(
    State(state): State<ApiState>,
    Json(request): Json<TextRequest>,
) -> Response {
    if request.text.trim().is_empty() {
        return empty_text_response();
    }
    state.metrics.inc_request();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "text": normalize(&request.text) })),
    )
        .into_response()
}

async fn budget_parse(State(state): State<ApiState>, Json(request): Json<TextRequest>) -> Response {
    if request.text.trim().is_empty() {
        return empty_text_response();
    }
    (StatusCode::OK, Json(state.agent.budget(&request.text))).into_response()
}

/// Plan events as SSE, closed by a `complete` event.
fn sse_events(
    events: tokio::sync::mpsc::Receiver<PlanEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(events, |mut events| async move {
        events.recv().await.map(|event| (event, events))
    })
    .map(|event| {
        Ok(Event::default()
            .event(event.name())
            .data(event.payload().to_string()))
    })
    .chain(stream::once(async {
        Ok(Event::default().event("complete").data("{}"))
    }))
}

fn agent_error_response(error: AgentError) -> Response {
    match error {
        AgentError::Unavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "model_unavailable",
                "message": error.to_string()
            })),
        )
            .into_response(),
        AgentError::InvalidInput(_) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_request",
                "message": error.to_string()
            })),
        )
            .into_response(),
    }
}

fn empty_text_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_request",
            "message": "text must not be empty"
        })),
    )
        .into_response()
}

fn default_origins() -> Vec<String> {
    [
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
    .iter()
    .map(|value| value.to_string())
    .collect()
}

fn parse_allowed_origins() -> Vec<String> {
    env::var("WAYFARER_ALLOWED_ORIGINS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty())
        .unwrap_or_else(default_origins)
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:5173")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this IP"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn is_public_endpoint(path: &str) -> bool {
    path == "/health"
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}
