use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use wayfarer_core::geo::{
    centroid, city_center, decode_polyline, encode_polyline, is_cross_city, DEFAULT_CITY_CENTER,
    DEFAULT_ROUTE_COLOR,
};
use wayfarer_core::{ItineraryPlan, LngLat, Money, Route};

use crate::MapProvider;

const PLACEHOLDER_BUDGET_PER_DAY: i64 = 500;

/// Running centroids need this many accepted points before they are trusted
/// as a cross-city reference.
const MIN_CENTROID_POINTS: usize = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichReport {
    pub lookups: usize,
    pub geocoded: usize,
    pub geocode_failures: usize,
    pub cross_city_discarded: usize,
    pub routes_synthesized: usize,
}

pub struct GeoEnricher<'a, M> {
    provider: &'a M,
}

impl<'a, M: MapProvider> GeoEnricher<'a, M> {
    pub fn new(provider: &'a M) -> Self {
        Self { provider }
    }

    #[instrument(skip(self, plan), fields(days = plan.days.len()))]
    pub async fn enrich(
        &self,
        mut plan: ItineraryPlan,
        city: Option<&str>,
    ) -> (ItineraryPlan, EnrichReport) {
        let city = city.map(str::trim).filter(|value| !value.is_empty());
        let table_center = city.and_then(city_center);
        let mut report = EnrichReport::default();
        let mut accepted: Vec<LngLat> = Vec::new();

        for day in &mut plan.days {
            let mut day_coords = Vec::new();

            for poi in &mut day.pois {
                let name = poi.name.trim();
                if !name.is_empty() && (city.is_some() || poi.coord.is_none()) {
                    report.lookups += 1;
                    match self.provider.geocode(name, city).await {
                        Ok(Some(coord)) => {
                            poi.coord = Some(coord);
                            report.geocoded += 1;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            report.geocode_failures += 1;
                            warn!(poi = %name, error = %err, "geocoding failed");
                        }
                    }
                }

                let Some(coord) = poi.coord else {
                    continue;
                };
                let reference = table_center.or_else(|| {
                    city.filter(|_| accepted.len() >= MIN_CENTROID_POINTS)
                        .and_then(|_| centroid(&accepted))
                });
                if reference.is_some_and(|center| is_cross_city(coord, center)) {
                    poi.coord = None;
                    report.cross_city_discarded += 1;
                    debug!(poi = %poi.name, "discarded cross-city coordinate");
                    continue;
                }
                accepted.push(coord);
                day_coords.push(coord);
            }

            let keep_model_routes = city.is_none()
                && day
                    .routes
                    .iter()
                    .any(|route| decode_polyline(&route.polyline).len() >= 2);
            if keep_model_routes {
                continue;
            }
            if day_coords.len() >= 2 {
                day.routes = vec![Route {
                    polyline: encode_polyline(&day_coords),
                    color: DEFAULT_ROUTE_COLOR.to_string(),
                }];
                report.routes_synthesized += 1;
            } else {
                day.routes.clear();
            }
        }

        if plan.city_center.is_none() {
            plan.city_center = Some(
                centroid(&accepted)
                    .or(table_center)
                    .unwrap_or(DEFAULT_CITY_CENTER),
            );
        }

        if plan.base_budget.is_none() {
            let days = plan.days.len().max(1) as i64;
            plan.base_budget = Some(Money::cny(Decimal::from(days * PLACEHOLDER_BUDGET_PER_DAY)));
            plan.base_budget_placeholder = true;
        }

        (plan, report)
    }
}
