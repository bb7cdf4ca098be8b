use serde::{Deserialize, Serialize};

/// Which telemetry frame the vehicle sent. RECOVERY frames only carry
/// GPS, barometer and temperature.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleMode {
    Armed,
    Recovery,
}

/// Body frame IMU reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    /// specific force, m/s^2
    pub accel_mps2: [f32; 3],
    /// angular rate, deg/s
    pub gyro_dps: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub satellites: u8,
    /// altitude above mean sea level, when the receiver reports one
    pub altitude_m: Option<f32>,
    /// doppler velocity in NED, when the receiver reports one
    pub velocity_ned_mps: Option<[f32; 3]>,
}

impl GpsFix {
    pub fn new(latitude_deg: f64, longitude_deg: f64, satellites: u8) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            satellites,
            altitude_m: None,
            velocity_ned_mps: None,
        }
    }
}

/// One decoded telemetry packet. Produced by the parsing layer, read once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp_us: u64,
    pub mode: SampleMode,
    pub imu: Option<ImuReading>,
    /// µT
    pub magnetometer: Option<[f32; 3]>,
    pub baro_altitude_m: f32,
    pub gps: Option<GpsFix>,
    pub temperature_c: f32,
}

impl TelemetrySample {
    pub fn timestamp_s(&self) -> f64 {
        self.timestamp_us as f64 / 1_000_000.0
    }
}

/// Per-sample sensor validity, derived by [`crate::SampleValidator`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub gps_valid: bool,
    pub imu_valid: bool,
    pub mag_valid: bool,
    pub baro_valid: bool,
    pub temp_valid: bool,
    pub overall_valid: bool,
}
