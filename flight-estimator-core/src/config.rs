use serde::{Deserialize, Serialize};

/// Standard gravity, m/s^2
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Everything the estimator needs at construction time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EstimatorConfig {
    pub filter: FilterConfig,
    pub validator: ValidatorLimits,
    pub phase: PhaseConfig,
    pub pipeline: PipelineConfig,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuaternionIntegration {
    /// q + 0.5 * q ⊗ (0, ω) * dt, renormalized afterwards
    FirstOrder,
    /// q ⊗ exp(ω * dt / 2)
    ExponentialMap,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateConfidence {
    #[serde(rename = "0.95")]
    P95,
    #[serde(rename = "0.99")]
    P99,
    #[serde(rename = "0.999")]
    P999,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub gravity: f64,
    pub quaternion_integration: QuaternionIntegration,

    // initial variances
    pub initial_position_var: f64,
    pub initial_velocity_var: f64,
    pub initial_quaternion_var: f64,
    pub initial_gyro_bias_var: f64,
    pub initial_accel_bias_var: f64,
    pub initial_baro_bias_var: f64,

    // process noise, per second
    pub position_noise: f64,
    pub velocity_noise: f64,
    pub quaternion_noise: f64,
    pub gyro_bias_walk: f64,
    pub accel_bias_walk: f64,
    pub baro_bias_walk: f64,
    /// accel noise (m/s^2) assumed when predicting without an IMU reading
    pub coast_accel_noise: f64,

    // measurement noise variances
    pub gps_horizontal_var: f64,
    pub gps_vertical_var: f64,
    pub gps_velocity_var: f64,
    pub baro_var: f64,
    pub static_gyro_var: f64,
    pub static_accel_var: f64,

    // near-static detection for bias correction
    pub static_gyro_rad_s: f64,
    pub static_accel_tolerance: f64,

    pub gate_confidence: GateConfidence,
    /// consecutive rejections from one sensor before its next reading is forced through
    pub max_consecutive_rejections: u32,

    pub max_gyro_bias: f64,
    pub max_accel_bias: f64,
    pub max_baro_bias: f64,

    pub covariance_floor: f64,
    /// health ceiling on the largest 1-sigma position/velocity uncertainty
    pub max_uncertainty: f64,
    /// clean operations needed to clear a latched numerical fault
    pub fault_recovery_updates: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            gravity: STANDARD_GRAVITY,
            quaternion_integration: QuaternionIntegration::FirstOrder,

            initial_position_var: 10.0,
            initial_velocity_var: 400.0,
            initial_quaternion_var: 0.1,
            initial_gyro_bias_var: 0.01,
            initial_accel_bias_var: 0.1,
            initial_baro_bias_var: 5.0,

            position_noise: 0.1,
            velocity_noise: 0.1,
            quaternion_noise: 1e-4,
            gyro_bias_walk: 1e-6,
            accel_bias_walk: 1e-4,
            baro_bias_walk: 1e-3,
            coast_accel_noise: 2.0,

            gps_horizontal_var: 5.0,
            gps_vertical_var: 10.0,
            gps_velocity_var: 0.25,
            baro_var: 2.0,
            static_gyro_var: 1e-4,
            static_accel_var: 0.05,

            static_gyro_rad_s: 0.05,
            static_accel_tolerance: 0.3,

            gate_confidence: GateConfidence::P99,
            max_consecutive_rejections: 5,

            max_gyro_bias: 0.2,
            max_accel_bias: 2.0,
            max_baro_bias: 200.0,

            covariance_floor: 1e-9,
            max_uncertainty: 1000.0,
            fault_recovery_updates: 10,
        }
    }
}

/// Datasheet envelopes used by the sample validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorLimits {
    pub max_accel_g: f32,
    pub max_gyro_dps: f32,
    pub min_mag_ut: f32,
    pub max_mag_ut: f32,
    pub min_baro_altitude_m: f32,
    pub max_baro_altitude_m: f32,
    pub min_satellites: u8,
    /// |lat| and |lon| both under this are the receiver's "no fix" output
    pub gps_sentinel_deg: f64,
    pub min_temperature_c: f32,
    pub max_temperature_c: f32,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            max_accel_g: 20.0,
            max_gyro_dps: 2000.0,
            min_mag_ut: 10.0,
            max_mag_ut: 100.0,
            min_baro_altitude_m: -500.0,
            max_baro_altitude_m: 100_000.0,
            min_satellites: 4,
            gps_sentinel_deg: 1e-5,
            min_temperature_c: -40.0,
            max_temperature_c: 85.0,
        }
    }
}

/// Debounce thresholds for each sensor-driven phase transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhaseConfig {
    pub gravity: f64,
    pub boost_accel_g: f64,
    pub boost_window_s: f64,
    pub burnout_accel_g: f64,
    pub burnout_window_s: f64,
    pub coast_delay_s: f64,
    pub apogee_confirm_samples: usize,
    pub landing_altitude_m: f64,
    pub landing_window_s: f64,
    pub landed_speed_mps: f64,
    pub landed_window_s: f64,
    /// fraction of samples inside a window that must meet the threshold
    pub min_window_fraction: f64,
    /// drag deceleration added to gravity when extrapolating apogee
    pub drag_decel_mps2: f64,
    pub apogee_window_s: f64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            gravity: STANDARD_GRAVITY,
            boost_accel_g: 1.5,
            boost_window_s: 0.5,
            burnout_accel_g: 0.2,
            burnout_window_s: 0.3,
            coast_delay_s: 0.5,
            apogee_confirm_samples: 3,
            landing_altitude_m: 50.0,
            landing_window_s: 0.5,
            landed_speed_mps: 1.0,
            landed_window_s: 1.0,
            min_window_fraction: 0.8,
            drag_decel_mps2: 0.5,
            apogee_window_s: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub nominal_dt_s: f64,
    /// gaps longer than this are treated as a stall and replaced by the nominal step
    pub max_dt_s: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            nominal_dt_s: 0.1,
            max_dt_s: 1.0,
        }
    }
}
