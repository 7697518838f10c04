//! Points, spherical distance and the bounding boxes used to prefilter
//! spatial queries against indexed `lat`/`lng` columns.

use serde::{Deserialize, Serialize};

use crate::error::{IncidentError, Result};

/// Sphere radius used for distances, matching the 2dsphere convention.
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// A (longitude, latitude) pair in degrees. `(0, 0)` means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub const UNKNOWN: GeoPoint = GeoPoint { lng: 0.0, lat: 0.0 };

    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Sentinel check. Spatial matching and assignment never run for it.
    pub fn is_unknown(&self) -> bool {
        self.lng == 0.0 && self.lat == 0.0
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(IncidentError::validation(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(IncidentError::validation(format!(
                "longitude {} out of range",
                self.lng
            )));
        }
        Ok(())
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Degree-space box that contains every point within `radius_m` of a
/// centre. `lng_range` is `None` when the box spans all longitudes (close
/// to a pole or across the antimeridian).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub lng_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let angular = radius_m / EARTH_RADIUS_M;
        let lat_delta = angular.to_degrees();
        let min_lat = center.lat - lat_delta;
        let max_lat = center.lat + lat_delta;

        let lng_range = if min_lat <= -90.0 || max_lat >= 90.0 {
            None
        } else {
            let s = angular.sin() / center.lat.to_radians().cos();
            if s >= 1.0 {
                None
            } else {
                let lng_delta = s.asin().to_degrees();
                let (lo, hi) = (center.lng - lng_delta, center.lng + lng_delta);
                if lo < -180.0 || hi > 180.0 {
                    None
                } else {
                    Some((lo, hi))
                }
            }
        };

        Self {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            lng_range,
        }
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        let lat_ok = p.lat >= self.min_lat && p.lat <= self.max_lat;
        let lng_ok = self
            .lng_range
            .is_none_or(|(lo, hi)| p.lng >= lo && p.lng <= hi);
        lat_ok && lng_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_zero_apart() {
        let p = GeoPoint::new(28.05, -26.10);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_m(GeoPoint::new(28.0, -26.0), GeoPoint::new(28.0, -27.0));
        assert!((d - 111_318.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn small_offsets_measure_in_metres() {
        // 0.00005° of latitude ≈ 5.6 m
        let d = haversine_m(
            GeoPoint::new(28.05, -26.10),
            GeoPoint::new(28.05, -26.10005),
        );
        assert!(d > 5.0 && d < 6.0, "got {d}");
    }

    #[test]
    fn box_contains_points_inside_radius() {
        let center = GeoPoint::new(28.05, -26.10);
        let bbox = BoundingBox::around(center, 2000.0);
        // ~1.9 km east and ~1.9 km north.
        assert!(bbox.contains(GeoPoint::new(28.069, -26.10)));
        assert!(bbox.contains(GeoPoint::new(28.05, -26.083)));
        assert!(!bbox.contains(GeoPoint::new(28.10, -26.10)));
    }

    #[test]
    fn box_near_pole_spans_all_longitudes() {
        let bbox = BoundingBox::around(GeoPoint::new(10.0, 89.99999), 10.0);
        assert!(bbox.lng_range.is_none());
        assert!(bbox.max_lat <= 90.0);
    }

    #[test]
    fn box_across_antimeridian_spans_all_longitudes() {
        let bbox = BoundingBox::around(GeoPoint::new(179.99999, 10.0), 10.0);
        assert!(bbox.lng_range.is_none());
    }

    #[test]
    fn sentinel_is_unknown() {
        assert!(GeoPoint::UNKNOWN.is_unknown());
        assert!(!GeoPoint::new(0.0, 0.0001).is_unknown());
    }
}
