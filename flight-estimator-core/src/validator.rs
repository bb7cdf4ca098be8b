use serde::{Deserialize, Serialize};

use crate::{
    config::{STANDARD_GRAVITY, ValidatorLimits},
    sample::{GpsFix, ImuReading, QualityFlags, SampleMode, TelemetrySample},
};

/// Running validation tallies. The pipeline owns these so the validator
/// stays stateless.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_samples: u64,
    pub valid_samples: u64,
    /// samples carrying a GPS fix that failed validation
    pub gps_failures: u64,
    /// samples carrying an IMU reading that failed validation
    pub sensor_failures: u64,
}

impl ValidationStats {
    pub fn record(&mut self, sample: &TelemetrySample, flags: &QualityFlags) {
        self.total_samples += 1;
        if flags.overall_valid {
            self.valid_samples += 1;
        }
        if sample.gps.is_some() && !flags.gps_valid {
            self.gps_failures += 1;
        }
        if sample.imu.is_some() && !flags.imu_valid {
            self.sensor_failures += 1;
        }
    }
}

/// Stateless range and presence checks. Identical inputs always produce
/// identical flags.
#[derive(Debug, Clone)]
pub struct SampleValidator {
    limits: ValidatorLimits,
}

impl SampleValidator {
    pub fn new(limits: ValidatorLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidatorLimits {
        &self.limits
    }

    pub fn validate(&self, sample: &TelemetrySample) -> QualityFlags {
        let imu_valid = sample.imu.as_ref().is_some_and(|imu| self.imu_valid(imu));
        let mag_valid = sample.magnetometer.as_ref().is_some_and(|mag| self.mag_valid(mag));
        let baro_valid = self.baro_valid(sample.baro_altitude_m);
        let gps_valid = sample.gps.as_ref().is_some_and(|fix| self.gps_valid(fix));
        let temp_valid = self.temperature_valid(sample.temperature_c);

        let overall_valid = match sample.mode {
            SampleMode::Armed => imu_valid && mag_valid && baro_valid && gps_valid && temp_valid,
            SampleMode::Recovery => gps_valid && baro_valid && temp_valid,
        };

        QualityFlags {
            gps_valid,
            imu_valid,
            mag_valid,
            baro_valid,
            temp_valid,
            overall_valid,
        }
    }

    /// A saturated channel makes the whole IMU reading unusable.
    pub fn imu_valid(&self, imu: &ImuReading) -> bool {
        let max_accel = self.limits.max_accel_g * STANDARD_GRAVITY as f32;
        all_finite(&imu.accel_mps2)
            && all_finite(&imu.gyro_dps)
            && magnitude(&imu.accel_mps2) <= max_accel
            && magnitude(&imu.gyro_dps) <= self.limits.max_gyro_dps
    }

    pub fn mag_valid(&self, mag: &[f32; 3]) -> bool {
        if !all_finite(mag) || mag.iter().all(|v| *v == 0.0) {
            return false;
        }
        let m = magnitude(mag);
        m >= self.limits.min_mag_ut && m <= self.limits.max_mag_ut
    }

    pub fn baro_valid(&self, altitude_m: f32) -> bool {
        altitude_m.is_finite()
            && altitude_m >= self.limits.min_baro_altitude_m
            && altitude_m <= self.limits.max_baro_altitude_m
    }

    pub fn gps_valid(&self, fix: &GpsFix) -> bool {
        let sentinel = libm::fabs(fix.latitude_deg) < self.limits.gps_sentinel_deg
            && libm::fabs(fix.longitude_deg) < self.limits.gps_sentinel_deg;

        fix.satellites >= self.limits.min_satellites
            && fix.latitude_deg.is_finite()
            && fix.longitude_deg.is_finite()
            && !sentinel
            && libm::fabs(fix.latitude_deg) <= 90.0
            && libm::fabs(fix.longitude_deg) <= 180.0
            && fix.altitude_m.is_none_or(|alt| alt.is_finite())
            && fix.velocity_ned_mps.is_none_or(|v| all_finite(&v))
    }

    pub fn temperature_valid(&self, temperature_c: f32) -> bool {
        temperature_c.is_finite()
            && temperature_c >= self.limits.min_temperature_c
            && temperature_c <= self.limits.max_temperature_c
    }
}

fn all_finite(v: &[f32; 3]) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn magnitude(v: &[f32; 3]) -> f32 {
    libm::sqrtf(v[0] * v[0] + v[1] * v[1] + v[2] * v[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_sample() -> TelemetrySample {
        TelemetrySample {
            timestamp_us: 1_000_000,
            mode: SampleMode::Armed,
            imu: Some(ImuReading {
                accel_mps2: [0.1, -0.05, -9.8],
                gyro_dps: [0.2, 0.1, -0.3],
            }),
            magnetometer: Some([22.0, 5.0, 40.0]),
            baro_altitude_m: 3.0,
            gps: Some(GpsFix::new(28.396837, -80.605659, 9)),
            temperature_c: 24.0,
        }
    }

    #[test]
    fn nominal_armed_sample_is_valid() {
        let flags = SampleValidator::new(ValidatorLimits::default()).validate(&armed_sample());
        assert!(flags.overall_valid);
        assert!(flags.imu_valid && flags.mag_valid && flags.gps_valid);
    }

    #[test]
    fn saturated_accel_is_rejected() {
        let validator = SampleValidator::new(ValidatorLimits::default());
        let mut sample = armed_sample();
        sample.imu = Some(ImuReading {
            accel_mps2: [0.0, 0.0, -50.0 * 9.80665],
            gyro_dps: [0.0; 3],
        });
        let flags = validator.validate(&sample);
        assert!(!flags.imu_valid);
        assert!(!flags.overall_valid);
        assert!(flags.baro_valid);

        sample.imu = Some(ImuReading {
            accel_mps2: [0.0, 0.0, -9.8],
            gyro_dps: [2100.0, 0.0, 0.0],
        });
        assert!(!validator.validate(&sample).imu_valid);
    }

    #[test]
    fn gps_rules() {
        let validator = SampleValidator::new(ValidatorLimits::default());
        assert!(!validator.gps_valid(&GpsFix::new(28.4, -80.6, 2)));
        assert!(!validator.gps_valid(&GpsFix::new(0.0, 0.0, 12)));
        assert!(!validator.gps_valid(&GpsFix::new(95.0, -80.6, 12)));
        assert!(validator.gps_valid(&GpsFix::new(28.4, -80.6, 4)));
    }

    #[test]
    fn baro_and_mag_envelopes() {
        let validator = SampleValidator::new(ValidatorLimits::default());
        assert!(!validator.baro_valid(f32::NAN));
        assert!(!validator.baro_valid(-600.0));
        assert!(!validator.baro_valid(120_000.0));
        assert!(validator.baro_valid(-20.0));

        assert!(!validator.mag_valid(&[0.0, 0.0, 0.0]));
        assert!(!validator.mag_valid(&[150.0, 0.0, 0.0]));
        assert!(validator.mag_valid(&[30.0, 0.0, 0.0]));
    }

    #[test]
    fn recovery_mode_ignores_imu_and_mag() {
        let validator = SampleValidator::new(ValidatorLimits::default());
        let sample = TelemetrySample {
            mode: SampleMode::Recovery,
            imu: None,
            magnetometer: None,
            ..armed_sample()
        };
        let flags = validator.validate(&sample);
        assert!(!flags.imu_valid);
        assert!(!flags.mag_valid);
        assert!(flags.overall_valid);
    }

    #[test]
    fn repeated_bad_readings_stay_flagged() {
        let validator = SampleValidator::new(ValidatorLimits::default());
        let mut sample = armed_sample();
        sample.temperature_c = 120.0;
        for _ in 0..5 {
            let flags = validator.validate(&sample);
            assert!(!flags.temp_valid);
            assert!(!flags.overall_valid);
        }
    }

    #[test]
    fn stats_count_failures_by_subsystem() {
        let validator = SampleValidator::new(ValidatorLimits::default());
        let mut stats = ValidationStats::default();

        let good = armed_sample();
        stats.record(&good, &validator.validate(&good));

        let no_fix = TelemetrySample {
            gps: Some(GpsFix::new(0.0, 0.0, 9)),
            ..armed_sample()
        };
        stats.record(&no_fix, &validator.validate(&no_fix));

        let saturated = TelemetrySample {
            imu: Some(ImuReading {
                accel_mps2: [0.0, 0.0, -50.0 * 9.80665],
                gyro_dps: [0.0; 3],
            }),
            ..armed_sample()
        };
        stats.record(&saturated, &validator.validate(&saturated));

        // a missing sensor is not a failed one
        let recovery = TelemetrySample {
            mode: SampleMode::Recovery,
            imu: None,
            magnetometer: None,
            gps: None,
            ..armed_sample()
        };
        stats.record(&recovery, &validator.validate(&recovery));

        assert_eq!(
            stats,
            ValidationStats {
                total_samples: 4,
                valid_samples: 1,
                gps_failures: 1,
                sensor_failures: 1,
            }
        );
    }
}
