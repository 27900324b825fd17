//! GeoJSON builders for map renderers.
//!
//! Every builder returns a complete `FeatureCollection`, empty when there is
//! nothing to draw, so a renderer can assign the result to a source without
//! special cases. Coordinates are `[lon, lat]`.

use serde_json::{json, Value};

use crate::geo::{circle_polygon, sector_polygon, CIRCLE_STEPS};
use crate::model::AnchorConfig;
use crate::zone::AnchorZone;

fn coords(ring: &[(f64, f64)]) -> Vec<[f64; 2]> {
    ring.iter().map(|&(lon, lat)| [lon, lat]).collect()
}

fn feature(geometry: Value, properties: Value) -> Value {
    json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
    })
}

pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

pub fn empty_collection() -> Value {
    feature_collection(Vec::new())
}

/// Filled circle of the alarm radius
pub fn guard_circle(anchor: &AnchorConfig) -> Value {
    let ring = circle_polygon(
        anchor.latitude,
        anchor.longitude,
        anchor.radius_meters as f64,
        CIRCLE_STEPS,
    );
    feature_collection(vec![feature(
        json!({ "type": "Polygon", "coordinates": [coords(&ring)] }),
        json!({ "kind": "circle", "radius": anchor.radius_meters }),
    )])
}

/// Safe slice between the inner radius and the alarm radius, or an empty
/// collection when no sector is active
pub fn sector_donut(zone: &AnchorZone) -> Value {
    if !zone.sector.is_active() {
        return empty_collection();
    }
    let ring = sector_polygon(
        zone.anchor.latitude,
        zone.anchor.longitude,
        zone.sector.inner_radius_meters,
        zone.anchor.radius_meters as f64,
        zone.sector.heading_deg,
        zone.sector.sector_width_deg,
        CIRCLE_STEPS,
    );
    feature_collection(vec![feature(
        json!({ "type": "Polygon", "coordinates": [coords(&ring)] }),
        json!({
            "kind": "sector",
            "heading": zone.sector.heading_deg,
            "width": zone.sector.sector_width_deg,
        }),
    )])
}

/// Circle, optional sector and anchor point in one collection
pub fn zone_collection(zone: Option<&AnchorZone>) -> Value {
    let Some(zone) = zone else {
        return empty_collection();
    };

    let mut features = Vec::new();
    for mut layer in [guard_circle(&zone.anchor), sector_donut(zone)] {
        if let Value::Array(mut f) = layer["features"].take() {
            features.append(&mut f);
        }
    }
    features.push(feature(
        json!({
            "type": "Point",
            "coordinates": [zone.anchor.longitude, zone.anchor.latitude],
        }),
        json!({ "kind": "anchor" }),
    ));
    feature_collection(features)
}

/// Trace path from `(lon, lat)` pairs, oldest first.
///
/// A line needs two points; fewer yield an empty collection.
pub fn trace_line(path: &[(f64, f64)]) -> Value {
    if path.len() < 2 {
        return empty_collection();
    }
    feature_collection(vec![feature(
        json!({ "type": "LineString", "coordinates": coords(path) }),
        json!({}),
    )])
}

/// Current vessel position
pub fn me_point(lat: f64, lon: f64) -> Value {
    feature_collection(vec![feature(
        json!({ "type": "Point", "coordinates": [lon, lat] }),
        json!({ "kind": "me" }),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SectorConfig;

    fn anchor() -> AnchorConfig {
        AnchorConfig::new(48.0, -4.5, 60.0)
    }

    #[test]
    fn test_guard_circle_closed_ring() {
        let fc = guard_circle(&anchor());
        let ring = fc["features"][0]["geometry"]["coordinates"][0]
            .as_array()
            .unwrap();
        assert_eq!(ring.len(), CIRCLE_STEPS + 1);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_sector_inactive_is_empty() {
        let zone = AnchorZone::new(anchor(), SectorConfig::default());
        assert_eq!(sector_donut(&zone), empty_collection());
    }

    #[test]
    fn test_zone_collection_layers() {
        let zone = AnchorZone::new(
            anchor(),
            SectorConfig {
                enabled: true,
                heading_deg: 0,
                sector_width_deg: 90,
                inner_radius_meters: 5.0,
            },
        );
        let fc = zone_collection(Some(&zone));
        let kinds: Vec<&str> = fc["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["circle", "sector", "anchor"]);

        assert_eq!(zone_collection(None), empty_collection());
    }

    #[test]
    fn test_trace_line_needs_two_points() {
        assert_eq!(trace_line(&[(-4.5, 48.0)]), empty_collection());

        let fc = trace_line(&[(-4.5, 48.0), (-4.5, 48.001)]);
        assert_eq!(fc["features"][0]["geometry"]["type"], "LineString");
        assert_eq!(
            fc["features"][0]["geometry"]["coordinates"][1],
            json!([-4.5, 48.001])
        );
    }

    #[test]
    fn test_me_point_lon_lat_order() {
        let fc = me_point(48.0, -4.5);
        assert_eq!(
            fc["features"][0]["geometry"]["coordinates"],
            json!([-4.5, 48.0])
        );
    }
}
