//! Geofence gate: is the requester within the allowed radius of the office?
//!
//! Runs before any camera is touched. A missing position is a plain `false`,
//! so location-service failures fail closed.

use crate::types::Coordinates;

/// Mean Earth radius (IUGG), metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle surface distance in metres (haversine).
pub fn great_circle_distance_m(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// True if `current` lies within `radius_m` of `reference`.
///
/// A point exactly on the boundary is inside.
pub fn is_within_range(current: Option<Coordinates>, reference: Coordinates, radius_m: f64) -> bool {
    let Some(current) = current else {
        tracing::debug!("geofence: current location unavailable");
        return false;
    };
    let distance = great_circle_distance_m(current, reference);
    let inside = distance <= radius_m;
    tracing::debug!(distance_m = distance, radius_m, inside, "geofence evaluated");
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFICE: Coordinates = Coordinates { lat: 28.7041, lng: 77.1025 };

    /// Point `meters` due north of `from`.
    fn north_of(from: Coordinates, meters: f64) -> Coordinates {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        Coordinates::new(from.lat + dlat, from.lng)
    }

    #[test]
    fn test_same_point_is_inside() {
        assert!(is_within_range(Some(OFFICE), OFFICE, 200.0));
        assert_eq!(great_circle_distance_m(OFFICE, OFFICE), 0.0);
    }

    #[test]
    fn test_unavailable_location_is_outside() {
        assert!(!is_within_range(None, OFFICE, 200.0));
        assert!(!is_within_range(None, OFFICE, f64::MAX));
    }

    #[test]
    fn test_points_inside_and_beyond_radius() {
        for meters in [1.0, 50.0, 150.0, 199.0] {
            assert!(is_within_range(Some(north_of(OFFICE, meters)), OFFICE, 200.0), "{meters} m");
        }
        for meters in [201.0, 500.0, 10_000.0] {
            assert!(!is_within_range(Some(north_of(OFFICE, meters)), OFFICE, 200.0), "{meters} m");
        }
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let edge = north_of(OFFICE, 200.0);
        let distance = great_circle_distance_m(edge, OFFICE);
        // Exactly at the measured distance: inside.
        assert!(is_within_range(Some(edge), OFFICE, distance));
        // A hair less radius: outside.
        assert!(!is_within_range(Some(edge), OFFICE, distance - 1e-6));
    }

    #[test]
    fn test_known_city_distance() {
        // Delhi to Mumbai is roughly 1150 km.
        let mumbai = Coordinates::new(19.0760, 72.8777);
        let km = great_circle_distance_m(OFFICE, mumbai) / 1000.0;
        assert!((1100.0..1200.0).contains(&km), "got {km} km");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let other = Coordinates::new(28.71, 77.11);
        let ab = great_circle_distance_m(OFFICE, other);
        let ba = great_circle_distance_m(other, OFFICE);
        assert!((ab - ba).abs() < 1e-6);
    }
}
