use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use wayfarer_core::geo::{city_center, encode_polyline, is_cross_city, DEFAULT_ROUTE_COLOR};
use wayfarer_core::{LngLat, Route};

use crate::MapProvider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub name: String,
    #[serde(default)]
    pub coord: Option<LngLat>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTotal {
    pub distance_meters: u64,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRoute {
    pub routes: Vec<Route>,
    pub total: RouteTotal,
    pub stops: Vec<RouteStop>,
    #[serde(skip)]
    pub fallback_segments: usize,
}

/// Driving route through a day's stops, one segment per adjacent located
/// pair. Segments the provider cannot route are drawn as straight lines.
#[instrument(skip(provider, stops), fields(stops = stops.len()))]
pub async fn compute_day_route<M: MapProvider>(
    provider: &M,
    mut stops: Vec<RouteStop>,
    city: Option<&str>,
) -> DayRoute {
    let city = city.map(str::trim).filter(|value| !value.is_empty());
    let reference = city.and_then(city_center);

    for stop in &mut stops {
        if stop.coord.is_none() && !stop.name.trim().is_empty() {
            match provider.geocode(stop.name.trim(), city).await {
                Ok(coord) => stop.coord = coord,
                Err(err) => warn!(stop = %stop.name, error = %err, "stop geocoding failed"),
            }
        }
        if let (Some(coord), Some(center)) = (stop.coord, reference) {
            if is_cross_city(coord, center) {
                stop.coord = None;
            }
        }
    }

    let located = stops.iter().filter_map(|stop| stop.coord).collect::<Vec<_>>();
    let mut routes = Vec::new();
    let mut total = RouteTotal::default();
    let mut fallback_segments = 0;

    for pair in located.windows(2) {
        let (origin, destination) = (pair[0], pair[1]);
        let polyline = match provider.route(origin, destination).await {
            Ok(driving) => {
                total.distance_meters += driving.distance_meters;
                total.duration_seconds += driving.duration_seconds;
                driving
                    .polyline
                    .filter(|polyline| !polyline.trim().is_empty())
                    .unwrap_or_else(|| encode_polyline(pair))
            }
            Err(err) => {
                fallback_segments += 1;
                warn!(error = %err, "routing failed, drawing straight segment");
                encode_polyline(pair)
            }
        };
        routes.push(Route {
            polyline,
            color: DEFAULT_ROUTE_COLOR.to_string(),
        });
    }

    DayRoute {
        routes,
        total,
        stops,
        fallback_segments,
    }
}
