use std::f64::consts::PI;

use crate::types::Coordinate;

const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Great-circle distance in miles between two lat/lng points.
pub fn distance_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1 * PI / 180.0, lat2 * PI / 180.0);
    let half_dphi = (lat2 - lat1) * PI / 360.0;
    let half_dlambda = (lng2 - lng1) * PI / 360.0;

    let h = half_dphi.sin().powi(2) + phi1.cos() * phi2.cos() * half_dlambda.sin().powi(2);
    // h can drift past 1.0 on near-antipodal points.
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

impl Coordinate {
    pub fn distance_miles(&self, other: &Coordinate) -> f64 {
        distance_miles(self.lat, self.lng, other.lat, other.lng)
    }

    /// Great-circle containment. Inclusive of the boundary.
    pub fn within_miles(&self, center: &Coordinate, radius_miles: f64) -> bool {
        self.distance_miles(center) <= radius_miles
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}
