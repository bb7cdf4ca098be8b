// only use std when feature = "std" is enabled or during testing
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod fmt;

pub mod config;
pub mod ekf;
pub mod phase;
pub mod pipeline;
pub mod reference_frame;
pub mod sample;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod validator;

pub use config::{
    EstimatorConfig, FilterConfig, GateConfidence, PhaseConfig, PipelineConfig,
    QuaternionIntegration, STANDARD_GRAVITY, ValidatorLimits,
};
pub use ekf::{FilterState, GpsMeasurement, HealthReport, ImuInput, KalmanFilter, UpdateOutcome};
pub use phase::{
    ApogeePrediction, CommandError, EventKind, FlightEvent, FlightPhase, FlightSummary,
    PhaseDetector,
};
pub use pipeline::{Command, EnrichedTelemetry, TelemetryPipeline};
pub use reference_frame::{ReferenceCoordinates, ReferenceFrame};
pub use sample::{GpsFix, ImuReading, QualityFlags, SampleMode, TelemetrySample};
pub use validator::{SampleValidator, ValidationStats};

#[cfg(test)]
mod tests;
