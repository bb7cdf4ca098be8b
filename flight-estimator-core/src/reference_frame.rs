use serde::{Deserialize, Serialize};

use crate::sample::GpsFix;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Launch-site origin of the local NED frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCoordinates {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPosition {
    pub north: f64,
    pub east: f64,
    /// only present when the fix carried an altitude
    pub down: Option<f64>,
}

/// Owns the NED origin. The first trustworthy fix wins; the origin never
/// moves afterwards until [`ReferenceFrame::reset`].
#[derive(Debug, Clone)]
pub struct ReferenceFrame {
    min_satellites: u8,
    sentinel_deg: f64,
    reference: Option<ReferenceCoordinates>,
}

impl ReferenceFrame {
    pub fn new(min_satellites: u8, sentinel_deg: f64) -> Self {
        Self {
            min_satellites,
            sentinel_deg,
            reference: None,
        }
    }

    pub fn reference(&self) -> Option<ReferenceCoordinates> {
        self.reference
    }

    /// `fallback_altitude_m` is used as alt₀ when the fix has no altitude of its own.
    pub fn establish(
        &mut self,
        fix: &GpsFix,
        fallback_altitude_m: f32,
    ) -> Option<ReferenceCoordinates> {
        if self.reference.is_some() {
            return self.reference;
        }

        if !self.is_trustworthy(fix) {
            return None;
        }

        let altitude_m = fix
            .altitude_m
            .filter(|alt| alt.is_finite())
            .unwrap_or(fallback_altitude_m) as f64;
        let reference = ReferenceCoordinates {
            latitude_deg: fix.latitude_deg,
            longitude_deg: fix.longitude_deg,
            altitude_m: if altitude_m.is_finite() { altitude_m } else { 0.0 },
        };
        log_info!(
            "reference frame established at lat={} lon={} alt={}",
            reference.latitude_deg,
            reference.longitude_deg,
            reference.altitude_m
        );
        self.reference = Some(reference);
        self.reference
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    fn is_trustworthy(&self, fix: &GpsFix) -> bool {
        fix.satellites >= self.min_satellites
            && fix.latitude_deg.is_finite()
            && fix.longitude_deg.is_finite()
            && libm::fabs(fix.latitude_deg) <= 90.0
            && libm::fabs(fix.longitude_deg) <= 180.0
            && !(libm::fabs(fix.latitude_deg) < self.sentinel_deg
                && libm::fabs(fix.longitude_deg) < self.sentinel_deg)
    }
}

/// Equirectangular projection around the reference. Good to well under a
/// metre over a regional flight; earth curvature is not corrected.
pub fn convert(fix: &GpsFix, reference: &ReferenceCoordinates) -> LocalPosition {
    let lat0 = reference.latitude_deg.to_radians();
    let d_lat = (fix.latitude_deg - reference.latitude_deg).to_radians();
    let d_lon = wrap_degrees(fix.longitude_deg - reference.longitude_deg).to_radians();

    LocalPosition {
        north: d_lat * EARTH_RADIUS_M,
        east: d_lon * EARTH_RADIUS_M * libm::cos(lat0),
        down: fix
            .altitude_m
            .filter(|alt| alt.is_finite())
            .map(|alt| reference.altitude_m - alt as f64),
    }
}

/// Inverse of [`convert`], for putting filter output back on a map.
pub fn to_geodetic(
    north: f64,
    east: f64,
    down: f64,
    reference: &ReferenceCoordinates,
) -> ReferenceCoordinates {
    let lat0 = reference.latitude_deg.to_radians();
    let cos_lat0 = libm::cos(lat0).max(1e-9);

    ReferenceCoordinates {
        latitude_deg: reference.latitude_deg + (north / EARTH_RADIUS_M).to_degrees(),
        longitude_deg: wrap_degrees(
            reference.longitude_deg + (east / (EARTH_RADIUS_M * cos_lat0)).to_degrees(),
        ),
        altitude_m: reference.altitude_m - down,
    }
}

fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = libm::fmod(deg + 180.0, 360.0);
    if wrapped < 0.0 {
        wrapped + 180.0
    } else {
        wrapped - 180.0
    }
}

#[cfg(test)]
mod test {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn pad_fix() -> GpsFix {
        GpsFix {
            altitude_m: Some(3.0),
            ..GpsFix::new(28.396837, -80.605659, 9)
        }
    }

    #[test]
    fn first_good_fix_wins() {
        let mut frame = ReferenceFrame::new(4, 1e-5);
        let first = frame.establish(&pad_fix(), 0.0).unwrap();

        let later = GpsFix::new(28.5, -80.7, 12);
        assert_eq!(frame.establish(&later, 0.0), Some(first));
        assert_abs_diff_eq!(first.altitude_m, 3.0);
    }

    #[test]
    fn weak_or_sentinel_fix_never_establishes() {
        let mut frame = ReferenceFrame::new(4, 1e-5);
        assert!(frame.establish(&GpsFix::new(28.4, -80.6, 2), 0.0).is_none());
        assert!(frame.establish(&GpsFix::new(0.0, 0.0, 10), 0.0).is_none());
        assert!(frame.establish(&GpsFix::new(f64::NAN, 10.0, 10), 0.0).is_none());
        assert!(frame.reference().is_none());

        let reference = frame.establish(&GpsFix::new(45.0, 10.0, 4), 120.0).unwrap();
        assert_abs_diff_eq!(reference.altitude_m, 120.0);
    }

    #[test]
    fn convert_small_offsets() {
        let reference = ReferenceFrame::new(4, 1e-5)
            .establish(&pad_fix(), 0.0)
            .unwrap();

        // one arc-minute of latitude is ~1853 m on this sphere
        let mut fix = pad_fix();
        fix.latitude_deg += 1.0 / 60.0;
        fix.altitude_m = Some(503.0);
        let local = convert(&fix, &reference);
        assert_abs_diff_eq!(local.north, 1853.25, epsilon = 0.1);
        assert_abs_diff_eq!(local.east, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(local.down.unwrap(), -500.0, epsilon = 1e-6);

        let no_alt = GpsFix::new(28.396837, -80.6, 7);
        let local = convert(&no_alt, &reference);
        assert!(local.down.is_none());
        assert!(local.east > 0.0);
    }

    #[test]
    fn to_geodetic_inverts_convert() {
        let reference = ReferenceCoordinates {
            latitude_deg: 28.396837,
            longitude_deg: -80.605659,
            altitude_m: 3.0,
        };
        let back = to_geodetic(1200.0, -350.0, -2500.0, &reference);
        let fix = GpsFix {
            altitude_m: Some(back.altitude_m as f32),
            ..GpsFix::new(back.latitude_deg, back.longitude_deg, 8)
        };
        let local = convert(&fix, &reference);
        assert_abs_diff_eq!(local.north, 1200.0, epsilon = 1e-6);
        assert_abs_diff_eq!(local.east, -350.0, epsilon = 1e-6);
        assert_abs_diff_eq!(local.down.unwrap(), -2500.0, epsilon = 1e-3);
    }

    #[test]
    fn longitude_wraps_across_antimeridian() {
        let reference = ReferenceCoordinates {
            latitude_deg: 0.0,
            longitude_deg: 179.9999,
            altitude_m: 0.0,
        };
        let local = convert(&GpsFix::new(0.0, -179.9999, 5), &reference);
        assert_abs_diff_eq!(local.east, 22.239, epsilon = 0.01);
    }
}
