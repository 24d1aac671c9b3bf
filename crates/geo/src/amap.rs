use std::env;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use wayfarer_core::LngLat;

use crate::{DrivingRoute, MapError, MapProvider};

const DEFAULT_AMAP_BASE_URL: &str = "https://restapi.amap.com";

#[derive(Debug, Clone)]
pub struct AmapConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AmapConfig {
    pub fn from_env() -> Option<Self> {
        env::var("WAYFARER_AMAP_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Self::with_api_key)
    }

    pub fn with_api_key(api_key: String) -> Self {
        let base_url = env::var("WAYFARER_AMAP_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_AMAP_BASE_URL.to_string());

        Self { api_key, base_url }
    }
}

/// Amap web-service client (place search and driving directions).
#[derive(Debug, Clone)]
pub struct AmapClient {
    http: Client,
    config: AmapConfig,
}

impl AmapClient {
    pub fn new(config: AmapConfig) -> Result<Self, MapError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(6))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, MapError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .get(url)
            .query(query)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;

        if body.get("status").and_then(Value::as_str) != Some("1") {
            let info = body
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(MapError::Rejected(info.to_string()));
        }
        Ok(body)
    }
}

impl MapProvider for AmapClient {
    async fn geocode(&self, place: &str, city: Option<&str>) -> Result<Option<LngLat>, MapError> {
        let place = place.trim();
        if place.is_empty() {
            return Ok(None);
        }

        let mut query = vec![("keywords", place), ("offset", "1"), ("page", "1")];
        if let Some(city) = city {
            query.push(("city", city));
            query.push(("citylimit", "true"));
        }

        let body = self.get_json("/v3/place/text", &query).await?;
        let coord = body
            .get("pois")
            .and_then(Value::as_array)
            .and_then(|pois| pois.first())
            .and_then(|poi| poi.get("location"))
            .and_then(Value::as_str)
            .and_then(LngLat::parse);
        debug!(place = %place, found = coord.is_some(), "amap place search");
        Ok(coord)
    }

    async fn route(&self, origin: LngLat, destination: LngLat) -> Result<DrivingRoute, MapError> {
        let origin = origin.to_pair();
        let destination = destination.to_pair();
        let body = self
            .get_json(
                "/v3/direction/driving",
                &[
                    ("origin", origin.as_str()),
                    ("destination", destination.as_str()),
                ],
            )
            .await?;

        let path = body
            .get("route")
            .and_then(|route| route.get("paths"))
            .and_then(Value::as_array)
            .and_then(|paths| paths.first())
            .ok_or_else(|| MapError::Malformed("driving response has no path".to_string()))?;

        Ok(DrivingRoute {
            distance_meters: number_field(path, "distance"),
            duration_seconds: number_field(path, "duration"),
            polyline: path_polyline(path),
        })
    }
}

/// Amap encodes numbers as strings; accept either form.
fn number_field(node: &Value, key: &str) -> u64 {
    match node.get(key) {
        Some(Value::String(text)) => text.trim().parse::<f64>().map(|v| v as u64).unwrap_or(0),
        Some(Value::Number(number)) => number.as_f64().map(|v| v as u64).unwrap_or(0),
        _ => 0,
    }
}

fn path_polyline(path: &Value) -> Option<String> {
    if let Some(polyline) = path
        .get("polyline")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
    {
        return Some(polyline.to_string());
    }

    let parts = path
        .get("steps")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|step| step.get("polyline").and_then(Value::as_str))
        .filter(|value| !value.trim().is_empty())
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_step_polylines() {
        let path = json!({
            "distance": "1520",
            "duration": "300",
            "steps": [
                {"polyline": "116.1,39.1;116.2,39.2"},
                {"polyline": "116.2,39.2;116.3,39.3"}
            ]
        });
        assert_eq!(number_field(&path, "distance"), 1520);
        assert_eq!(number_field(&path, "duration"), 300);
        assert_eq!(
            path_polyline(&path).as_deref(),
            Some("116.1,39.1;116.2,39.2;116.2,39.2;116.3,39.3")
        );
        assert_eq!(path_polyline(&json!({"steps": []})), None);
    }
}
