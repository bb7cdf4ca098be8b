use serde::{Deserialize, Serialize};

use super::{gate::RejectionCounters, state::FilterState};

pub const SYMMETRY_TOLERANCE: f64 = 1e-9;
pub const QUATERNION_NORM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    pub state_finite: bool,
    pub covariance_finite: bool,
    pub covariance_symmetric: bool,
    pub covariance_positive_definite: bool,
    pub quaternion_normalized: bool,
    /// 1-sigma, m
    pub position_uncertainty: [f64; 3],
    /// 1-sigma, m/s
    pub velocity_uncertainty: [f64; 3],
    pub max_uncertainty: f64,
    /// set by a rollback, cleared after enough clean operations
    pub fault_latched: bool,
    pub rollbacks: u32,
    pub rejections: RejectionCounters,
}

impl HealthReport {
    pub(crate) fn evaluate(
        state: &FilterState,
        uncertainty_ceiling: f64,
        fault_latched: bool,
        rollbacks: u32,
        rejections: RejectionCounters,
    ) -> Self {
        let state_finite = state.x.iter().all(|v| v.is_finite());
        let covariance_finite = state.p.iter().all(|v| v.is_finite());

        let asymmetry = (state.p - state.p.transpose()).amax();
        let covariance_symmetric = covariance_finite && asymmetry < SYMMETRY_TOLERANCE;
        let covariance_positive_definite = covariance_finite && state.p.cholesky().is_some();
        let quaternion_normalized =
            libm::fabs(state.quaternion_norm() - 1.0) <= QUATERNION_NORM_TOLERANCE;

        let position_uncertainty = state.position_std();
        let velocity_uncertainty = state.velocity_std();
        let max_uncertainty = position_uncertainty
            .iter()
            .chain(velocity_uncertainty.iter())
            .fold(0.0f64, |acc, v| acc.max(*v));

        let is_healthy = state_finite
            && covariance_finite
            && covariance_symmetric
            && covariance_positive_definite
            && quaternion_normalized
            && max_uncertainty <= uncertainty_ceiling
            && !fault_latched;

        Self {
            is_healthy,
            state_finite,
            covariance_finite,
            covariance_symmetric,
            covariance_positive_definite,
            quaternion_normalized,
            position_uncertainty,
            velocity_uncertainty,
            max_uncertainty,
            fault_latched,
            rollbacks,
            rejections,
        }
    }
}
