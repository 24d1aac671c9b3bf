use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;
use wayfarer_api::{build_router, ApiConfig, ApiState};
use wayfarer_core::{LngLat, PlanResponse};
use wayfarer_geo::{DayRoute, MapBackend, StaticMap};
use wayfarer_llm::{ModelBackend, ReplayModel, UnconfiguredModel};

const BEIJING_REPLY: &str = "第1天：故宫、景山公园\n- 午餐：四季民福烤鸭\n第2天：颐和园\n\n### 预算\n- 住宿：2700 CNY\n- 交通：140 CNY\n\nNAV_PLAN_JSON: {\"days\":[{\"summary\":\"中轴线\",\"pois\":[{\"name\":\"故宫\",\"type\":\"sight\"},{\"name\":\"景山公园\",\"type\":\"sight\"},{\"name\":\"四季民福\",\"type\":\"restaurant\"}]},{\"summary\":\"皇家园林\",\"pois\":[{\"name\":\"颐和园\",\"type\":\"sight\"}]}]}";

fn beijing_map() -> StaticMap {
    StaticMap::new()
        .with_place("故宫", LngLat::new(116.397, 39.918))
        .with_place("景山公园", LngLat::new(116.396, 39.925))
        .with_place("四季民福", LngLat::new(116.404, 39.915))
        .with_place("颐和园", LngLat::new(116.273, 39.999))
}

fn app_with(model: ModelBackend, config: ApiConfig) -> Router {
    build_router(ApiState::new(
        MapBackend::Static(beijing_map()),
        model,
        &config,
    ))
}

fn replay_app(responses: &[&str]) -> Router {
    app_with(
        ModelBackend::Replay(ReplayModel::new(responses.iter().copied())),
        ApiConfig::default(),
    )
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_capabilities() {
    let app = app_with(ModelBackend::Unconfigured(UnconfiguredModel), ApiConfig::default());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["capabilities"]["llm"], false);
    assert_eq!(payload["capabilities"]["amap"], false);
}

#[tokio::test]
async fn plan_returns_enriched_itinerary_and_reconciled_budget() {
    let app = replay_app(&[BEIJING_REPLY]);

    let response = app
        .oneshot(post_json(
            "/api/v1/itinerary/plan",
            json!({ "text": "北京两日游，预算 5000 元", "city": "北京" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let plan: PlanResponse = serde_json::from_slice(&body).unwrap();

    assert_eq!(plan.plan.days.len(), 2);
    assert_eq!(plan.plan.days[0].routes.len(), 1);
    assert_eq!(plan.budget.grand_total, dec!(2840));
    assert!(plan.budget_aligned);
    assert!(!plan.raw_text.contains("NAV_PLAN_JSON"));
    assert_eq!(plan.daily.unwrap()[0].restaurants, vec!["四季民福"]);
}

#[tokio::test]
async fn plan_without_model_is_service_unavailable() {
    let app = app_with(ModelBackend::Unconfigured(UnconfiguredModel), ApiConfig::default());

    let response = app
        .oneshot(post_json("/api/v1/itinerary/plan", json!({ "text": "北京" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["error"], "model_unavailable");
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let app = replay_app(&[]);

    for uri in [
        "/api/v1/itinerary/plan",
        "/api/v1/itinerary/plan/stream",
        "/api/v1/itinerary/daily",
        "/api/v1/budget/normalize",
        "/api/v1/budget/parse",
    ] {
        let response = app
            .clone()
            .oneshot(post_json(uri, json!({ "text": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(read_json(response).await["error"], "invalid_request");
    }
}

#[tokio::test]
async fn budget_endpoints_normalize_and_parse() {
    let app = replay_app(&[]);
    let text = "### 预算\n- 住宿：3000 CNY（总计）\n  - 酒店 = 2800 CNY\n";

    let normalized = app
        .clone()
        .oneshot(post_json("/api/v1/budget/normalize", json!({ "text": text })))
        .await
        .unwrap();
    assert_eq!(normalized.status(), StatusCode::OK);
    let normalized = read_json(normalized).await;
    assert!(normalized["text"]
        .as_str()
        .unwrap()
        .contains("住宿：2800 CNY（总计）"));

    let parsed = app
        .oneshot(post_json("/api/v1/budget/parse", json!({ "text": text })))
        .await
        .unwrap();
    assert_eq!(parsed.status(), StatusCode::OK);
    let parsed = read_json(parsed).await;
    assert_eq!(parsed["budgetAligned"], true);
    assert_eq!(parsed["budget"]["categories"][0]["name"], "住宿");
}

#[tokio::test]
async fn day_route_geocodes_named_stops() {
    let app = replay_app(&[]);

    let response = app
        .oneshot(post_json(
            "/api/v1/itinerary/day-route",
            json!({
                "city": "北京",
                "stops": [
                    { "name": "故宫" },
                    { "name": "景山公园" },
                    { "name": "颐和园", "coord": [116.273, 39.999] }
                ]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let route: DayRoute = serde_json::from_slice(&body).unwrap();
    assert_eq!(route.routes.len(), 2);
    assert!(route.total.distance_meters > 0);
    assert_eq!(route.stops[0].coord, Some(LngLat::new(116.397, 39.918)));
}

#[tokio::test]
async fn daily_splits_day_headings() {
    let app = replay_app(&[]);

    let response = app
        .oneshot(post_json(
            "/api/v1/itinerary/daily",
            json!({ "text": "第1天：武侯祠、锦里\n第2天：都江堰" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    let daily = payload["daily"].as_array().unwrap();
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[0]["attractions"], json!(["武侯祠", "锦里"]));
}

#[tokio::test]
async fn stream_emits_events_and_completes() {
    let long_reply = format!("{}\n{}", "第1天：故宫、景山公园。".repeat(30), BEIJING_REPLY);
    let app = replay_app(&[long_reply.as_str()]);

    let response = app
        .oneshot(post_json(
            "/api/v1/itinerary/plan/stream",
            json!({ "text": "北京两日游", "city": "北京" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();

    let events = body
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect::<Vec<_>>();
    assert_eq!(
        events,
        vec!["progress", "progress", "draft", "progress", "final", "complete"]
    );
    assert!(body.contains("\"stage\":\"init\""));
}

#[tokio::test]
async fn rate_limit_blocks_after_budget_but_not_health() {
    let config = ApiConfig {
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 2,
        ..ApiConfig::default()
    };
    let app = app_with(ModelBackend::Unconfigured(UnconfiguredModel), config);
    let request = || {
        let mut request = post_json("/api/v1/budget/normalize", json!({ "text": "住宿：100元" }));
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        request
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let blocked = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(read_json(blocked).await["error"], "rate_limited");

    let health = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}
