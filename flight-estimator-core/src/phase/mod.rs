use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::{
    config::PhaseConfig, ekf::FilterState, sample::QualityFlags, validator::ValidationStats,
};

pub use apogee::{ApogeeDetector, ApogeePrediction};
pub use debounce::SustainedCondition;
pub use summary::{FlightSummary, PhaseDuration};

use summary::{FlightStats, phase_durations};

mod apogee;
mod debounce;
mod summary;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightPhase {
    #[default]
    Idle,
    Armed,
    Boost,
    Burnout,
    Coast,
    Apogee,
    Descent,
    Landing,
    Landed,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Armed,
    Disarmed,
    LaunchDetected,
    BurnoutDetected,
    CoastStarted,
    ApogeeDetected,
    DescentStarted,
    LandingApproach,
    Landed,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: FlightPhase,
    pub to: FlightPhase,
}

/// Values that supported a transition. Only the fields relevant to the
/// event are filled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_velocity_mps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burn_time_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_apogee_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_error_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within_window: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_altitude_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_time_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlightEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp_us: u64,
    pub phase_transition: PhaseTransition,
    /// 0..=1, how cleanly the guard's debounce window was met
    pub confidence: f64,
    pub data: EventData,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    AlreadyArmed,
    NotArmed,
    /// arming state can no longer change once the flight has started
    InFlight(FlightPhase),
}

/// Flight phase state machine driven by the filter output. Only moves
/// forward; the only way back is [`PhaseDetector::disarm`] before launch or
/// an explicit [`PhaseDetector::reset`].
#[derive(Debug, Clone)]
pub struct PhaseDetector {
    config: PhaseConfig,
    phase: FlightPhase,
    phase_entered_us: u64,
    history: Vec<(u64, FlightPhase)>,
    events: Vec<FlightEvent>,

    boost: SustainedCondition,
    burnout: SustainedCondition,
    landing: SustainedCondition,
    landed: SustainedCondition,
    apogee: ApogeeDetector,
    prediction: Option<ApogeePrediction>,

    launch_time_us: Option<u64>,
    burnout_time_us: Option<u64>,
    apogee_time_us: Option<u64>,
    landing_time_us: Option<u64>,
    stats: FlightStats,
}

impl PhaseDetector {
    pub fn new(config: PhaseConfig) -> Self {
        let fraction = config.min_window_fraction;
        Self {
            boost: SustainedCondition::new(config.boost_window_s, fraction),
            burnout: SustainedCondition::new(config.burnout_window_s, fraction),
            landing: SustainedCondition::new(config.landing_window_s, fraction),
            landed: SustainedCondition::new(config.landed_window_s, fraction),
            apogee: ApogeeDetector::new(config.apogee_confirm_samples),
            config,
            phase: FlightPhase::Idle,
            phase_entered_us: 0,
            history: Vec::new(),
            events: Vec::new(),
            prediction: None,
            launch_time_us: None,
            burnout_time_us: None,
            apogee_time_us: None,
            landing_time_us: None,
            stats: FlightStats::default(),
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn history(&self) -> &[(u64, FlightPhase)] {
        &self.history
    }

    pub fn events(&self) -> &[FlightEvent] {
        &self.events
    }

    pub fn apogee_prediction(&self) -> Option<ApogeePrediction> {
        self.prediction
    }

    /// Seconds since the launch run started, `None` before launch.
    pub fn mission_elapsed_s(&self, timestamp_us: u64) -> Option<f64> {
        self.launch_time_us
            .map(|launch| timestamp_us.saturating_sub(launch) as f64 / 1_000_000.0)
    }

    pub fn arm(&mut self, timestamp_us: u64) -> Result<FlightEvent, CommandError> {
        match self.phase {
            FlightPhase::Idle => {
                self.clear_detection();
                Ok(self.transition(
                    timestamp_us,
                    FlightPhase::Armed,
                    EventKind::Armed,
                    1.0,
                    EventData::default(),
                ))
            }
            FlightPhase::Armed => Err(CommandError::AlreadyArmed),
            phase => {
                log_warn!("arm rejected in {:?}", phase);
                Err(CommandError::InFlight(phase))
            }
        }
    }

    pub fn disarm(&mut self, timestamp_us: u64) -> Result<FlightEvent, CommandError> {
        match self.phase {
            FlightPhase::Armed => Ok(self.transition(
                timestamp_us,
                FlightPhase::Idle,
                EventKind::Disarmed,
                1.0,
                EventData::default(),
            )),
            FlightPhase::Idle => Err(CommandError::NotArmed),
            phase => {
                log_warn!("disarm rejected in {:?}", phase);
                Err(CommandError::InFlight(phase))
            }
        }
    }

    /// Explicit restart: back to IDLE with an empty event log.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    fn clear_detection(&mut self) {
        self.boost.reset();
        self.burnout.reset();
        self.landing.reset();
        self.landed.reset();
        self.apogee.reset();
        self.prediction = None;
        self.launch_time_us = None;
        self.burnout_time_us = None;
        self.apogee_time_us = None;
        self.landing_time_us = None;
        self.stats = FlightStats::default();
    }

    /// Advance the state machine with the latest filter output. Returns the
    /// event for the transition that fired, if any.
    pub fn step(
        &mut self,
        timestamp_us: u64,
        state: &FilterState,
        flags: &QualityFlags,
    ) -> Option<FlightEvent> {
        self.open_history(timestamp_us);
        let g = self.config.gravity;
        let altitude = state.altitude_up();
        let climb = state.vertical_velocity_up();
        let speed = state.speed();
        let specific_force = state.specific_force_ned.filter(|_| flags.imu_valid);
        let accel_g = specific_force.map(|f| f.norm() / g);

        if self.phase != FlightPhase::Idle {
            self.stats.record(accel_g, speed, altitude);
        }

        if matches!(
            self.phase,
            FlightPhase::Boost | FlightPhase::Burnout | FlightPhase::Coast
        ) {
            if climb > 0.0 || self.prediction.is_none() {
                self.prediction = Some(ApogeePrediction::extrapolate(
                    timestamp_us as f64 / 1_000_000.0,
                    altitude,
                    climb,
                    g + self.config.drag_decel_mps2,
                    self.config.apogee_window_s,
                ));
            }
        }

        match self.phase {
            FlightPhase::Idle | FlightPhase::Landed => None,
            FlightPhase::Armed => {
                let f = specific_force?;
                let vertical_g = libm::fabs(f.z) / g;
                let confidence = self
                    .boost
                    .update(timestamp_us, vertical_g > self.config.boost_accel_g)?;
                self.launch_time_us = Some(self.boost.started_at().unwrap_or(timestamp_us));
                Some(self.transition(
                    timestamp_us,
                    FlightPhase::Boost,
                    EventKind::LaunchDetected,
                    confidence,
                    EventData {
                        acceleration_g: Some(vertical_g),
                        altitude_m: Some(altitude),
                        ..Default::default()
                    },
                ))
            }
            FlightPhase::Boost => {
                self.apogee.update(climb);
                let accel_g = accel_g?;
                let confidence = self
                    .burnout
                    .update(timestamp_us, accel_g < self.config.burnout_accel_g)?;
                self.burnout_time_us = Some(timestamp_us);
                let burn_time_s = self.mission_elapsed_s(timestamp_us);
                Some(self.transition(
                    timestamp_us,
                    FlightPhase::Burnout,
                    EventKind::BurnoutDetected,
                    confidence,
                    EventData {
                        acceleration_g: Some(accel_g),
                        altitude_m: Some(altitude),
                        vertical_velocity_mps: Some(climb),
                        burn_time_s,
                        ..Default::default()
                    },
                ))
            }
            FlightPhase::Burnout => {
                self.apogee.update(climb);
                let held_us = timestamp_us.saturating_sub(self.phase_entered_us);
                if (held_us as f64) < self.config.coast_delay_s * 1_000_000.0 {
                    return None;
                }
                Some(self.transition(
                    timestamp_us,
                    FlightPhase::Coast,
                    EventKind::CoastStarted,
                    1.0,
                    EventData {
                        altitude_m: Some(altitude),
                        vertical_velocity_mps: Some(climb),
                        ..Default::default()
                    },
                ))
            }
            FlightPhase::Coast => {
                let confidence = self.apogee.update(climb)?;
                self.apogee_time_us = Some(timestamp_us);
                let now_s = timestamp_us as f64 / 1_000_000.0;

                let prediction = self.prediction.map(|mut p| {
                    p.detected = true;
                    p
                });
                self.prediction = prediction;

                let time_to_apogee_s = self
                    .burnout_time_us
                    .map(|burnout| timestamp_us.saturating_sub(burnout) as f64 / 1_000_000.0);
                Some(self.transition(
                    timestamp_us,
                    FlightPhase::Apogee,
                    EventKind::ApogeeDetected,
                    confidence,
                    EventData {
                        altitude_m: Some(altitude),
                        vertical_velocity_mps: Some(climb),
                        max_altitude_m: Some(self.stats.max_altitude_m),
                        time_to_apogee_s,
                        prediction_error_s: prediction.map(|p| now_s - p.predicted_time_s),
                        within_window: prediction.map(|p| p.contains(now_s)),
                        ..Default::default()
                    },
                ))
            }
            FlightPhase::Apogee => Some(self.transition(
                timestamp_us,
                FlightPhase::Descent,
                EventKind::DescentStarted,
                1.0,
                EventData {
                    altitude_m: Some(altitude),
                    vertical_velocity_mps: Some(climb),
                    ..Default::default()
                },
            )),
            FlightPhase::Descent => {
                if !(flags.baro_valid || flags.gps_valid) {
                    return None;
                }
                let low = altitude < self.config.landing_altitude_m && climb <= 0.0;
                let confidence = self.landing.update(timestamp_us, low)?;
                Some(self.transition(
                    timestamp_us,
                    FlightPhase::Landing,
                    EventKind::LandingApproach,
                    confidence,
                    EventData {
                        altitude_m: Some(altitude),
                        vertical_velocity_mps: Some(climb),
                        ..Default::default()
                    },
                ))
            }
            FlightPhase::Landing => {
                let still = speed < self.config.landed_speed_mps;
                let confidence = self.landed.update(timestamp_us, still)?;
                self.landing_time_us = Some(timestamp_us);
                Some(self.transition(
                    timestamp_us,
                    FlightPhase::Landed,
                    EventKind::Landed,
                    confidence,
                    EventData {
                        altitude_m: Some(altitude),
                        speed_mps: Some(speed),
                        max_altitude_m: Some(self.stats.max_altitude_m),
                        flight_time_s: self.mission_elapsed_s(timestamp_us),
                        ..Default::default()
                    },
                ))
            }
        }
    }

    /// The starting phase enters the history with the first sample or
    /// command seen, so time spent in it shows up in the phase durations.
    fn open_history(&mut self, timestamp_us: u64) {
        if self.history.is_empty() {
            self.history.push((timestamp_us, self.phase));
        }
    }

    fn transition(
        &mut self,
        timestamp_us: u64,
        to: FlightPhase,
        kind: EventKind,
        confidence: f64,
        data: EventData,
    ) -> FlightEvent {
        self.open_history(timestamp_us);
        let from = self.phase;
        self.phase = to;
        self.phase_entered_us = timestamp_us;
        self.history.push((timestamp_us, to));

        let event = FlightEvent {
            kind,
            timestamp_us,
            phase_transition: PhaseTransition { from, to },
            confidence: confidence.clamp(0.0, 1.0),
            data,
        };
        self.events.push(event);
        log_info!(
            "phase {:?} -> {:?} at t={}us (confidence {})",
            from,
            to,
            timestamp_us,
            event.confidence
        );
        event
    }

    pub fn summary(&self) -> FlightSummary {
        let to_s = |us: u64| us as f64 / 1_000_000.0;
        FlightSummary {
            phase: self.phase,
            max_acceleration_g: self.stats.max_acceleration_g,
            max_speed_mps: self.stats.max_speed_mps,
            max_altitude_m: self.stats.max_altitude_m,
            launch_time_s: self.launch_time_us.map(to_s),
            burnout_time_s: self.burnout_time_us.map(to_s),
            apogee_time_s: self.apogee_time_us.map(to_s),
            landing_time_s: self.landing_time_us.map(to_s),
            flight_time_s: self
                .launch_time_us
                .zip(self.landing_time_us)
                .map(|(launch, landing)| to_s(landing.saturating_sub(launch))),
            phase_durations: phase_durations(&self.history),
            event_count: self.events.len(),
            validation: ValidationStats::default(),
        }
    }
}
