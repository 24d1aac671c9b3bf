use crate::models::LngLat;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Coordinates farther than this from the city reference are treated as
/// belonging to another city.
pub const CROSS_CITY_RADIUS_KM: f64 = 80.0;
pub const DEFAULT_CITY_CENTER: LngLat = LngLat::new(116.402, 39.907);
pub const DEFAULT_ROUTE_COLOR: &str = "#3b82f6";

const CITY_CENTERS: [(&str, f64, f64); 13] = [
    ("北京", 116.402, 39.907),
    ("上海", 121.4737, 31.2304),
    ("广州", 113.2644, 23.1291),
    ("深圳", 114.0579, 22.5431),
    ("杭州", 120.1551, 30.2741),
    ("南京", 118.7969, 32.0603),
    ("苏州", 120.5853, 31.2989),
    ("成都", 104.0665, 30.5728),
    ("重庆", 106.5516, 29.5630),
    ("西安", 108.9398, 34.3416),
    ("武汉", 114.3055, 30.5928),
    ("厦门", 118.0894, 24.4798),
    ("青岛", 120.3826, 36.0671),
];

pub fn city_center(city: &str) -> Option<LngLat> {
    CITY_CENTERS
        .iter()
        .find(|(name, _, _)| *name == city.trim())
        .map(|(_, lng, lat)| LngLat::new(*lng, *lat))
}

pub fn haversine_km(a: LngLat, b: LngLat) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

pub fn is_cross_city(coord: LngLat, reference: LngLat) -> bool {
    haversine_km(coord, reference) > CROSS_CITY_RADIUS_KM
}

pub fn centroid(coords: &[LngLat]) -> Option<LngLat> {
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let lng = coords.iter().map(|c| c.lng).sum::<f64>() / n;
    let lat = coords.iter().map(|c| c.lat).sum::<f64>() / n;
    Some(LngLat::new(lng, lat))
}

pub fn encode_polyline(coords: &[LngLat]) -> String {
    coords
        .iter()
        .map(|coord| coord.to_pair())
        .collect::<Vec<_>>()
        .join(";")
}

pub fn decode_polyline(polyline: &str) -> Vec<LngLat> {
    polyline
        .split(';')
        .filter_map(LngLat::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        let beijing = city_center("北京").unwrap();
        let shanghai = city_center("上海").unwrap();
        let km = haversine_km(beijing, shanghai);
        assert!((km - 1067.0).abs() < 10.0, "got {km}");
        assert_eq!(haversine_km(beijing, beijing), 0.0);
    }

    #[test]
    fn cross_city_threshold_is_eighty_km() {
        let center = DEFAULT_CITY_CENTER;
        // One degree of latitude is ~111 km.
        let near = LngLat::new(center.lng, center.lat + 0.7);
        let far = LngLat::new(center.lng, center.lat + 0.75);
        assert!(!is_cross_city(near, center));
        assert!(is_cross_city(far, center));
    }

    #[test]
    fn polyline_round_trips() {
        let coords = vec![LngLat::new(116.397, 39.918), LngLat::new(116.391, 39.925)];
        let encoded = encode_polyline(&coords);
        assert_eq!(encoded, "116.397,39.918;116.391,39.925");
        assert_eq!(decode_polyline(&encoded), coords);
    }

    #[test]
    fn centroid_of_points() {
        let c = centroid(&[LngLat::new(1.0, 1.0), LngLat::new(3.0, 5.0)]).unwrap();
        assert_eq!(c, LngLat::new(2.0, 3.0));
        assert!(centroid(&[]).is_none());
        assert!(city_center("火星").is_none());
    }
}
