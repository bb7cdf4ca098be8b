use alloc::vec::Vec;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    config::EstimatorConfig,
    ekf::{FilterState, GpsMeasurement, HealthReport, ImuInput, KalmanFilter},
    phase::{ApogeePrediction, CommandError, FlightEvent, FlightPhase, FlightSummary, PhaseDetector},
    reference_frame::{ReferenceCoordinates, ReferenceFrame, convert, to_geodetic},
    sample::{ImuReading, QualityFlags, SampleMode, TelemetrySample},
    validator::{SampleValidator, ValidationStats},
};


#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Arm,
    Disarm,
    /// clears the filter, the NED origin and the phase detector
    Reset,
}

/// One output record per input sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTelemetry {
    pub sample: TelemetrySample,
    pub flags: QualityFlags,
    pub state: FilterState,
    /// roll, pitch, yaw
    pub euler_angles_deg: [f64; 3],
    pub health: HealthReport,
    pub phase: FlightPhase,
    pub mission_elapsed_s: Option<f64>,
    pub apogee_prediction: Option<ApogeePrediction>,
    pub reference: Option<ReferenceCoordinates>,
    /// filter position mapped back through the reference
    pub position_geodetic: Option<ReferenceCoordinates>,
    /// command events since the previous record, then the detector's event
    pub new_events: Vec<FlightEvent>,
    /// samples processed since construction or the last reset, this one included
    pub sample_count: u64,
}

/// Validator, reference frame, filter and phase detector wired in sample
/// order. Every component is exclusively owned; feed it from one task.
#[derive(Debug, Clone)]
pub struct TelemetryPipeline {
    config: EstimatorConfig,
    validator: SampleValidator,
    reference: ReferenceFrame,
    filter: KalmanFilter,
    detector: PhaseDetector,

    last_timestamp_us: Option<u64>,
    /// first valid baro reading, the vertical origin of the NED frame
    baro_origin_m: Option<f64>,
    was_healthy: bool,
    pending_events: Vec<FlightEvent>,
    stats: ValidationStats,
}

impl TelemetryPipeline {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            validator: SampleValidator::new(config.validator.clone()),
            reference: ReferenceFrame::new(
                config.validator.min_satellites,
                config.validator.gps_sentinel_deg,
            ),
            filter: KalmanFilter::new(config.filter.clone()),
            detector: PhaseDetector::new(config.phase.clone()),
            config,
            last_timestamp_us: None,
            baro_origin_m: None,
            was_healthy: true,
            pending_events: Vec::new(),
            stats: ValidationStats::default(),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    pub fn detector(&self) -> &PhaseDetector {
        &self.detector
    }

    pub fn reference(&self) -> Option<ReferenceCoordinates> {
        self.reference.reference()
    }

    pub fn phase(&self) -> FlightPhase {
        self.detector.phase()
    }

    pub fn validation_stats(&self) -> ValidationStats {
        self.stats
    }

    pub fn summary(&self) -> FlightSummary {
        FlightSummary {
            validation: self.stats,
            ..self.detector.summary()
        }
    }

    pub fn command(
        &mut self,
        command: Command,
        timestamp_us: u64,
    ) -> Result<Option<FlightEvent>, CommandError> {
        let event = match command {
            Command::Arm => Some(self.detector.arm(timestamp_us)?),
            Command::Disarm => Some(self.detector.disarm(timestamp_us)?),
            Command::Reset => {
                self.reset();
                None
            }
        };
        if let Some(event) = event {
            self.pending_events.push(event);
        }
        Ok(event)
    }

    fn reset(&mut self) {
        log_info!("pipeline reset");
        self.reference.reset();
        self.filter.reset();
        self.detector.reset();
        self.last_timestamp_us = None;
        self.baro_origin_m = None;
        self.was_healthy = true;
        self.pending_events.clear();
        self.stats = ValidationStats::default();
    }

    /// Seconds since the previous sample. Stalls and out-of-order stamps
    /// fall back to the nominal step.
    fn step_dt(&mut self, timestamp_us: u64) -> Option<f64> {
        let nominal = self.config.pipeline.nominal_dt_s;
        let Some(last) = self.last_timestamp_us else {
            self.last_timestamp_us = Some(timestamp_us);
            return None;
        };

        if timestamp_us <= last {
            log_warn!(
                "timestamp {}us not after {}us, using nominal step",
                timestamp_us,
                last
            );
            return Some(nominal);
        }
        self.last_timestamp_us = Some(timestamp_us);

        let dt = (timestamp_us - last) as f64 / 1_000_000.0;
        if dt > self.config.pipeline.max_dt_s {
            log_warn!("{}s gap in telemetry, using nominal step", dt);
            return Some(nominal);
        }
        Some(dt)
    }

    pub fn process(&mut self, sample: &TelemetrySample) -> EnrichedTelemetry {
        let flags = self.validator.validate(sample);
        self.stats.record(sample, &flags);
        if !flags.overall_valid {
            log_debug!("sample at {}us failed validation: {:?}", sample.timestamp_us, flags);
        }

        let imu = sample
            .imu
            .as_ref()
            .filter(|_| flags.imu_valid)
            .map(imu_input);

        if let Some(dt) = self.step_dt(sample.timestamp_us) {
            self.filter.predict(dt, imu.as_ref());
        }

        if sample.mode == SampleMode::Armed {
            if let Some(imu) = imu.as_ref() {
                self.filter.update_imu(imu);
            }
        }

        if flags.baro_valid {
            let baro = sample.baro_altitude_m as f64;
            let origin = *self.baro_origin_m.get_or_insert(baro);
            self.filter.update_baro(baro - origin);
        }

        if let Some(fix) = sample.gps.as_ref().filter(|_| flags.gps_valid) {
            if let Some(reference) = self.reference.establish(fix, sample.baro_altitude_m) {
                let local = convert(fix, &reference);
                self.filter.update_gps(&GpsMeasurement {
                    north: local.north,
                    east: local.east,
                    down: local.down,
                    velocity_ned: fix
                        .velocity_ned_mps
                        .map(|v| Vector3::new(v[0] as f64, v[1] as f64, v[2] as f64)),
                });
            }
        }

        let state = self.filter.state().clone();
        let health = self.filter.health();
        if health.is_healthy != self.was_healthy {
            if health.is_healthy {
                log_info!("filter healthy again at {}us", sample.timestamp_us);
            } else {
                log_warn!(
                    "filter unhealthy at {}us (max sigma {}, fault latched {})",
                    sample.timestamp_us,
                    health.max_uncertainty,
                    health.fault_latched
                );
            }
            self.was_healthy = health.is_healthy;
        }

        let mut new_events = core::mem::take(&mut self.pending_events);
        if let Some(event) = self.detector.step(sample.timestamp_us, &state, &flags) {
            new_events.push(event);
        }

        let reference = self.reference.reference();
        let position_geodetic = reference.map(|reference| {
            let p = state.position_ned();
            to_geodetic(p.x, p.y, p.z, &reference)
        });

        EnrichedTelemetry {
            sample: sample.clone(),
            flags,
            euler_angles_deg: state.euler_angles_deg(),
            state,
            health,
            phase: self.detector.phase(),
            mission_elapsed_s: self.detector.mission_elapsed_s(sample.timestamp_us),
            apogee_prediction: self.detector.apogee_prediction(),
            reference,
            position_geodetic,
            new_events,
            sample_count: self.stats.total_samples,
        }
    }
}

/// Accel stays in m/s², gyro goes from °/s to rad/s.
fn imu_input(imu: &ImuReading) -> ImuInput {
    let accel = imu.accel_mps2.map(|a| a as f64);
    let gyro = imu.gyro_dps.map(|w| (w as f64).to_radians());
    ImuInput::new(Vector3::from(accel), Vector3::from(gyro))
}
