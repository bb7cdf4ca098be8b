use std::path::Path;

use anyhow::{Context, Result};
use flight_estimator_core::{GpsFix, ImuReading, SampleMode, TelemetrySample};
use serde::{Deserialize, Serialize};

/// Flat row layout of a telemetry log. Empty cells mean the sensor had
/// nothing to report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub timestamp_us: u64,
    pub mode: SampleMode,
    pub accel_x: Option<f32>,
    pub accel_y: Option<f32>,
    pub accel_z: Option<f32>,
    pub gyro_x: Option<f32>,
    pub gyro_y: Option<f32>,
    pub gyro_z: Option<f32>,
    pub mag_x: Option<f32>,
    pub mag_y: Option<f32>,
    pub mag_z: Option<f32>,
    pub baro_altitude_m: Option<f32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub satellites: Option<u8>,
    pub gps_altitude_m: Option<f32>,
    #[serde(default)]
    pub gps_velocity_n: Option<f32>,
    #[serde(default)]
    pub gps_velocity_e: Option<f32>,
    #[serde(default)]
    pub gps_velocity_d: Option<f32>,
    pub temperature_c: Option<f32>,
}

fn all3<T: Copy>(a: Option<T>, b: Option<T>, c: Option<T>) -> Option<[T; 3]> {
    Some([a?, b?, c?])
}

impl TelemetryRow {
    /// Missing barometer or temperature readings become NaN so the
    /// validator flags them.
    pub fn to_sample(&self) -> TelemetrySample {
        let accel = all3(self.accel_x, self.accel_y, self.accel_z);
        let gyro = all3(self.gyro_x, self.gyro_y, self.gyro_z);
        let imu = accel
            .zip(gyro)
            .map(|(accel_mps2, gyro_dps)| ImuReading {
                accel_mps2,
                gyro_dps,
            });

        let gps = self
            .latitude
            .zip(self.longitude)
            .map(|(latitude, longitude)| GpsFix {
                altitude_m: self.gps_altitude_m,
                velocity_ned_mps: all3(self.gps_velocity_n, self.gps_velocity_e, self.gps_velocity_d),
                ..GpsFix::new(latitude, longitude, self.satellites.unwrap_or(0))
            });

        TelemetrySample {
            timestamp_us: self.timestamp_us,
            mode: self.mode,
            imu,
            magnetometer: all3(self.mag_x, self.mag_y, self.mag_z),
            baro_altitude_m: self.baro_altitude_m.unwrap_or(f32::NAN),
            gps,
            temperature_c: self.temperature_c.unwrap_or(f32::NAN),
        }
    }

    pub fn from_sample(sample: &TelemetrySample) -> Self {
        let accel = sample.imu.map(|imu| imu.accel_mps2);
        let gyro = sample.imu.map(|imu| imu.gyro_dps);
        let gps_velocity = sample.gps.and_then(|fix| fix.velocity_ned_mps);
        let finite = |v: f32| Some(v).filter(|v| !v.is_nan());

        Self {
            timestamp_us: sample.timestamp_us,
            mode: sample.mode,
            accel_x: accel.map(|a| a[0]),
            accel_y: accel.map(|a| a[1]),
            accel_z: accel.map(|a| a[2]),
            gyro_x: gyro.map(|g| g[0]),
            gyro_y: gyro.map(|g| g[1]),
            gyro_z: gyro.map(|g| g[2]),
            mag_x: sample.magnetometer.map(|m| m[0]),
            mag_y: sample.magnetometer.map(|m| m[1]),
            mag_z: sample.magnetometer.map(|m| m[2]),
            baro_altitude_m: finite(sample.baro_altitude_m),
            latitude: sample.gps.map(|fix| fix.latitude_deg),
            longitude: sample.gps.map(|fix| fix.longitude_deg),
            satellites: sample.gps.map(|fix| fix.satellites),
            gps_altitude_m: sample.gps.and_then(|fix| fix.altitude_m),
            gps_velocity_n: gps_velocity.map(|v| v[0]),
            gps_velocity_e: gps_velocity.map(|v| v[1]),
            gps_velocity_d: gps_velocity.map(|v| v[2]),
            temperature_c: finite(sample.temperature_c),
        }
    }
}

pub fn read_samples(path: &Path) -> Result<Vec<TelemetrySample>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut samples = Vec::new();
    for (line, row) in reader.deserialize::<TelemetryRow>().enumerate() {
        // header is line 1
        let row = row.with_context(|| format!("bad telemetry row at line {}", line + 2))?;
        samples.push(row.to_sample());
    }
    Ok(samples)
}

pub fn write_samples(path: &Path, samples: &[TelemetrySample]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for sample in samples {
        writer.serialize(TelemetryRow::from_sample(sample))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use flight_estimator_core::sim::{SimConfig, simulate_flight};

    use super::*;

    #[test]
    fn simulated_log_survives_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flight.csv");
        let flight = simulate_flight(&SimConfig::default()).unwrap();

        write_samples(&path, &flight.samples).unwrap();
        let samples = read_samples(&path).unwrap();
        assert_eq!(samples, flight.samples);
    }

    #[test]
    fn empty_cells_are_missing_sensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.csv");
        fs::write(
            &path,
            "timestamp_us,mode,accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,mag_x,mag_y,mag_z,\
             baro_altitude_m,latitude,longitude,satellites,gps_altitude_m,temperature_c\n\
             1000,RECOVERY,,,,,,,,,,120.5,43.26,-79.92,7,,18\n\
             2000,ARMED,0.1,0.2,-9.8,0,0,,20,5,40,,,,,,\n",
        )
        .unwrap();

        let samples = read_samples(&path).unwrap();
        assert_eq!(samples.len(), 2);

        let recovery = &samples[0];
        assert_eq!(recovery.mode, SampleMode::Recovery);
        assert!(recovery.imu.is_none());
        assert!(recovery.magnetometer.is_none());
        assert_eq!(recovery.baro_altitude_m, 120.5);
        let fix = recovery.gps.unwrap();
        assert_eq!(fix.satellites, 7);
        assert!(fix.altitude_m.is_none());
        assert!(fix.velocity_ned_mps.is_none());

        // one gyro axis missing drops the whole imu reading
        let armed = &samples[1];
        assert!(armed.imu.is_none());
        assert_eq!(armed.magnetometer, Some([20.0, 5.0, 40.0]));
        assert!(armed.baro_altitude_m.is_nan());
        assert!(armed.temperature_c.is_nan());
        assert!(armed.gps.is_none());
    }

    #[test]
    fn bad_row_reports_its_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(
            &path,
            "timestamp_us,mode,accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,mag_x,mag_y,mag_z,\
             baro_altitude_m,latitude,longitude,satellites,gps_altitude_m,temperature_c\n\
             1000,ARMED,,,,,,,,,,1,,,,,20\n\
             2000,LAUNCHED,,,,,,,,,,1,,,,,20\n",
        )
        .unwrap();

        let error = read_samples(&path).unwrap_err();
        assert!(format!("{error}").contains("line 3"));
    }
}
