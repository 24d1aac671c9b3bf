mod amap;
mod enrich;
mod route;

use std::collections::{HashMap, HashSet};
use std::future::Future;

use parking_lot::Mutex;
use thiserror::Error;
use wayfarer_core::geo::haversine_km;
use wayfarer_core::LngLat;

pub use amap::{AmapClient, AmapConfig};
pub use enrich::{EnrichReport, GeoEnricher};
pub use route::{compute_day_route, DayRoute, RouteStop, RouteTotal};

#[derive(Debug, Error)]
pub enum MapError {
    #[error("map provider is not configured")]
    NotConfigured,
    #[error("map provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("map provider rejected the request: {0}")]
    Rejected(String),
    #[error("map provider returned an unexpected payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrivingRoute {
    pub distance_meters: u64,
    pub duration_seconds: u64,
    pub polyline: Option<String>,
}

pub trait MapProvider: Send + Sync {
    fn geocode(
        &self,
        place: &str,
        city: Option<&str>,
    ) -> impl Future<Output = Result<Option<LngLat>, MapError>> + Send;

    fn route(
        &self,
        origin: LngLat,
        destination: LngLat,
    ) -> impl Future<Output = Result<DrivingRoute, MapError>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineMap;

impl MapProvider for OfflineMap {
    async fn geocode(&self, _place: &str, _city: Option<&str>) -> Result<Option<LngLat>, MapError> {
        Ok(None)
    }

    async fn route(&self, _origin: LngLat, _destination: LngLat) -> Result<DrivingRoute, MapError> {
        Err(MapError::NotConfigured)
    }
}

/// In-memory gazetteer. Routes are straight-line estimates at city driving
/// speed, without a polyline.
#[derive(Debug, Default)]
pub struct StaticMap {
    places: HashMap<String, LngLat>,
    failing: HashSet<String>,
    offline_routes: bool,
    lookups: Mutex<Vec<String>>,
}

const CITY_DRIVING_METERS_PER_SECOND: f64 = 8.0;

impl StaticMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, name: impl Into<String>, coord: LngLat) -> Self {
        self.places.insert(name.into(), coord);
        self
    }

    pub fn with_failure(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    pub fn without_routes(mut self) -> Self {
        self.offline_routes = true;
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

impl MapProvider for StaticMap {
    async fn geocode(&self, place: &str, _city: Option<&str>) -> Result<Option<LngLat>, MapError> {
        self.lookups.lock().push(place.to_string());
        if self.failing.contains(place) {
            return Err(MapError::Rejected(format!("lookup failed for {place}")));
        }
        Ok(self.places.get(place).copied())
    }

    async fn route(&self, origin: LngLat, destination: LngLat) -> Result<DrivingRoute, MapError> {
        if self.offline_routes {
            return Err(MapError::NotConfigured);
        }
        let meters = haversine_km(origin, destination) * 1000.0;
        Ok(DrivingRoute {
            distance_meters: meters.round() as u64,
            duration_seconds: (meters / CITY_DRIVING_METERS_PER_SECOND).round() as u64,
            polyline: None,
        })
    }
}

#[derive(Debug)]
pub enum MapBackend {
    Amap(AmapClient),
    Offline(OfflineMap),
    Static(StaticMap),
}

impl MapBackend {
    pub fn from_env() -> Result<Self, MapError> {
        match AmapConfig::from_env() {
            Some(config) => Ok(Self::Amap(AmapClient::new(config)?)),
            None => Ok(Self::Offline(OfflineMap)),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Amap(_))
    }
}

impl MapProvider for MapBackend {
    async fn geocode(&self, place: &str, city: Option<&str>) -> Result<Option<LngLat>, MapError> {
        match self {
            Self::Amap(client) => client.geocode(place, city).await,
            Self::Offline(offline) => offline.geocode(place, city).await,
            Self::Static(map) => map.geocode(place, city).await,
        }
    }

    async fn route(&self, origin: LngLat, destination: LngLat) -> Result<DrivingRoute, MapError> {
        match self {
            Self::Amap(client) => client.route(origin, destination).await,
            Self::Offline(offline) => offline.route(origin, destination).await,
            Self::Static(map) => map.route(origin, destination).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_map_records_lookups_and_failures() {
        let map = StaticMap::new()
            .with_place("故宫", LngLat::new(116.397, 39.918))
            .with_failure("长城");

        assert_eq!(
            map.geocode("故宫", Some("北京")).await.unwrap(),
            Some(LngLat::new(116.397, 39.918))
        );
        assert!(map.geocode("长城", None).await.is_err());
        assert_eq!(map.geocode("未知", None).await.unwrap(), None);
        assert_eq!(map.lookups(), vec!["故宫", "长城", "未知"]);
    }

    #[tokio::test]
    async fn offline_backend_never_resolves() {
        let backend = MapBackend::Offline(OfflineMap);
        assert_eq!(backend.geocode("故宫", None).await.unwrap(), None);
        assert!(matches!(
            backend
                .route(LngLat::new(0.0, 0.0), LngLat::new(0.1, 0.1))
                .await,
            Err(MapError::NotConfigured)
        ));
        assert!(!backend.is_live());
    }
}
