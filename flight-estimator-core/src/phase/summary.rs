use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use super::FlightPhase;
use crate::validator::ValidationStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseDuration {
    pub phase: FlightPhase,
    pub duration_s: f64,
}

/// Post-flight figures, also valid mid-flight for whatever has happened so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightSummary {
    pub phase: FlightPhase,
    pub max_acceleration_g: f64,
    pub max_speed_mps: f64,
    pub max_altitude_m: f64,
    pub launch_time_s: Option<f64>,
    pub burnout_time_s: Option<f64>,
    pub apogee_time_s: Option<f64>,
    pub landing_time_s: Option<f64>,
    pub flight_time_s: Option<f64>,
    /// completed phases only, in the order they were left
    pub phase_durations: Vec<PhaseDuration>,
    pub event_count: usize,
    /// sample tallies, only filled in by the pipeline
    pub validation: ValidationStats,
}

/// Running extremes, updated every sample after arming.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct FlightStats {
    pub max_acceleration_g: f64,
    pub max_speed_mps: f64,
    pub max_altitude_m: f64,
}

impl FlightStats {
    pub fn record(&mut self, acceleration_g: Option<f64>, speed_mps: f64, altitude_m: f64) {
        if let Some(acceleration_g) = acceleration_g {
            self.max_acceleration_g = self.max_acceleration_g.max(acceleration_g);
        }
        self.max_speed_mps = self.max_speed_mps.max(speed_mps);
        self.max_altitude_m = self.max_altitude_m.max(altitude_m);
    }
}

pub(crate) fn phase_durations(history: &[(u64, FlightPhase)]) -> Vec<PhaseDuration> {
    history
        .windows(2)
        .map(|pair| PhaseDuration {
            phase: pair[0].1,
            duration_s: pair[1].0.saturating_sub(pair[0].0) as f64 / 1_000_000.0,
        })
        .collect()
}
