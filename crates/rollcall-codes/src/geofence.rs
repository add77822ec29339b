//! Geofence validation for redemptions.
//!
//! A geofenced code carries the teacher's location. A student redeeming
//! it must send their own, and the two must be within the configured
//! radius (100 m by default) measured as great-circle distance.

use rollcall_protocol::{AttendanceOutcome, Coordinates};

use crate::ActiveCode;

/// Mean earth radius (IUGG), in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two points in meters (haversine).
///
/// Accurate to well under a meter at classroom scale; the spherical-earth
/// error only matters over hundreds of kilometers.
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    // `min(1.0)` guards asin against rounding just above 1 for antipodes.
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Why a redemption failed the geofence check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeofenceViolation {
    /// The code is geofenced but no coordinates were submitted.
    MissingCoordinates,
    /// The student is farther than the radius from the center.
    OutOfRange { distance_m: f64 },
}

impl From<GeofenceViolation> for AttendanceOutcome {
    fn from(violation: GeofenceViolation) -> Self {
        match violation {
            GeofenceViolation::MissingCoordinates => Self::CoordinatesRequired,
            GeofenceViolation::OutOfRange { distance_m } => Self::OutOfRange { distance_m },
        }
    }
}

/// Applies the geofence policy to a redemption attempt.
#[derive(Debug, Clone, Copy)]
pub struct RedemptionValidator {
    radius_m: f64,
}

impl RedemptionValidator {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Checks `submitted` against the geofence of `entry`.
    ///
    /// - no geofence: always passes, whatever was submitted
    /// - geofence, nothing submitted: [`GeofenceViolation::MissingCoordinates`]
    /// - both: passes iff the distance is `<= radius`
    pub fn validate(
        &self,
        entry: &ActiveCode,
        submitted: Option<Coordinates>,
    ) -> Result<(), GeofenceViolation> {
        self.check(entry.geofence(), submitted)
    }

    /// Same as [`validate`](Self::validate) on a bare center point.
    pub fn check(
        &self,
        center: Option<Coordinates>,
        submitted: Option<Coordinates>,
    ) -> Result<(), GeofenceViolation> {
        let Some(center) = center else {
            return Ok(());
        };
        let Some(submitted) = submitted else {
            return Err(GeofenceViolation::MissingCoordinates);
        };

        let distance_m = haversine_m(center, submitted);
        // Written so that a NaN distance fails.
        if distance_m <= self.radius_m {
            Ok(())
        } else {
            Err(GeofenceViolation::OutOfRange { distance_m })
        }
    }
}

impl Default for RedemptionValidator {
    fn default() -> Self {
        Self::new(100.0)
    }
}
