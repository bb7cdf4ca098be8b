use nalgebra::{SMatrix, SVector, UnitQuaternion, UnitVector3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;

pub use gate::{RejectionCounters, Sensor, chi_square_critical};
pub use health::HealthReport;
pub use state::{Covariance, FilterState, StateVector};
pub use transition::ImuInput;

use gate::RejectionStreaks;
use jacobian::central_difference_jacobian;
use transition::{propagate, quaternion_of, rotation_matrix, specific_force_ned};

mod gate;
mod health;
pub(crate) mod jacobian;
mod state;
mod transition;

/// What a single predict or update did to the estimate.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateOutcome {
    Applied,
    /// failed the Mahalanobis gate, state untouched
    Rejected { mahalanobis_sq: f64 },
    /// preconditions not met (bad dt, not static, non-finite input)
    Skipped,
    SingularInnovation,
    /// produced NaN/Inf, state restored to the pre-call snapshot
    RolledBack,
}

/// GPS correction in the local NED frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsMeasurement {
    pub north: f64,
    pub east: f64,
    pub down: Option<f64>,
    pub velocity_ned: Option<Vector3<f64>>,
}

/// 15-state extended Kalman filter over position, velocity, attitude, gyro
/// bias, vertical accel bias and baro bias.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    config: FilterConfig,
    state: FilterState,
    /// process noise per second
    q: Covariance,
    aligned: bool,

    rejections: RejectionCounters,
    streaks: RejectionStreaks,
    rollbacks: u32,
    fault_latched: bool,
    clean_operations: u32,
}

impl KalmanFilter {
    pub fn new(config: FilterConfig) -> Self {
        let (state, q) = Self::initial(&config);
        Self {
            config,
            state,
            q,
            aligned: false,
            rejections: RejectionCounters::default(),
            streaks: RejectionStreaks::default(),
            rollbacks: 0,
            fault_latched: false,
            clean_operations: 0,
        }
    }

    fn initial(config: &FilterConfig) -> (FilterState, Covariance) {
        let mut x = StateVector::zeros();
        x[FilterState::QUATERNION] = 1.0;

        let mut p_diag = StateVector::zeros();
        let mut q_diag = StateVector::zeros();
        for i in 0..3 {
            p_diag[FilterState::POSITION + i] = config.initial_position_var;
            p_diag[FilterState::VELOCITY + i] = config.initial_velocity_var;
            p_diag[FilterState::GYRO_BIAS + i] = config.initial_gyro_bias_var;
            q_diag[FilterState::POSITION + i] = config.position_noise;
            q_diag[FilterState::VELOCITY + i] = config.velocity_noise;
            q_diag[FilterState::GYRO_BIAS + i] = config.gyro_bias_walk;
        }
        for i in 0..4 {
            p_diag[FilterState::QUATERNION + i] = config.initial_quaternion_var;
            q_diag[FilterState::QUATERNION + i] = config.quaternion_noise;
        }
        p_diag[FilterState::ACCEL_Z_BIAS] = config.initial_accel_bias_var;
        p_diag[FilterState::BARO_BIAS] = config.initial_baro_bias_var;
        q_diag[FilterState::ACCEL_Z_BIAS] = config.accel_bias_walk;
        q_diag[FilterState::BARO_BIAS] = config.baro_bias_walk;

        (
            FilterState::new(x, Covariance::from_diagonal(&p_diag)),
            Covariance::from_diagonal(&q_diag),
        )
    }

    /// Back to the construction-time estimate. Counters are cleared too.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    pub fn rejections(&self) -> RejectionCounters {
        self.rejections
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::evaluate(
            &self.state,
            self.config.max_uncertainty,
            self.fault_latched,
            self.rollbacks,
            self.rejections,
        )
    }

    /// Propagate the estimate by `dt` seconds. Without an IMU reading the
    /// velocity is held and its uncertainty grows faster.
    pub fn predict(&mut self, dt: f64, imu: Option<&ImuInput>) -> UpdateOutcome {
        if !(dt.is_finite() && dt > 0.0) {
            log_debug!("predict skipped, dt={}", dt);
            return UpdateOutcome::Skipped;
        }

        self.guarded(|filter| {
            let gravity = filter.config.gravity;
            let integration = filter.config.quaternion_integration;
            let x = filter.state.x;

            let f: Covariance = central_difference_jacobian(&x, |x| {
                propagate(x, imu, dt, gravity, integration)
            });

            let mut q = filter.q * dt;
            if imu.is_none() {
                let extra = filter.config.coast_accel_noise * filter.config.coast_accel_noise * dt;
                for i in 0..3 {
                    q[(FilterState::VELOCITY + i, FilterState::VELOCITY + i)] += extra;
                }
            }

            filter.state.x = propagate(&x, imu, dt, gravity, integration);
            filter.state.specific_force_ned = imu.map(|imu| specific_force_ned(&x, imu));
            filter.state.p = f * filter.state.p * f.transpose() + q;
            filter.enforce_invariants();
            UpdateOutcome::Applied
        })
    }

    /// Bias correction while the vehicle is at rest. The first static reading
    /// levels the attitude against gravity instead.
    pub fn update_imu(&mut self, imu: &ImuInput) -> UpdateOutcome {
        let gravity = self.config.gravity;
        let is_static = imu.gyro.norm() < self.config.static_gyro_rad_s
            && libm::fabs(imu.accel.norm() - gravity) < self.config.static_accel_tolerance;
        if !is_static {
            return UpdateOutcome::Skipped;
        }

        if !self.aligned {
            return self.guarded(|filter| {
                let attitude =
                    quaternion_from_start_and_end_vector(&imu.accel, &Vector3::new(0.0, 0.0, -1.0));
                filter.state.set_quaternion(attitude.quaternion());
                filter.aligned = true;
                filter.enforce_invariants();
                log_info!(
                    "attitude aligned to gravity, tilt={} deg",
                    attitude.angle().to_degrees()
                );
                UpdateOutcome::Applied
            });
        }

        let z = Vector4::new(imu.gyro.x, imu.gyro.y, imu.gyro.z, imu.accel.z);
        let model = |x: &StateVector| -> Vector4<f64> {
            let expected = rotation_matrix(&quaternion_of(x)).transpose()
                * Vector3::new(0.0, 0.0, -gravity);
            Vector4::new(
                x[FilterState::GYRO_BIAS],
                x[FilterState::GYRO_BIAS + 1],
                x[FilterState::GYRO_BIAS + 2],
                expected.z + x[FilterState::ACCEL_Z_BIAS],
            )
        };
        let x = self.state.x;
        let hx = model(&x);
        let h: SMatrix<f64, 4, { FilterState::SIZE }> = central_difference_jacobian(&x, model);
        let r = SMatrix::<f64, 4, 4>::from_diagonal(&Vector4::new(
            self.config.static_gyro_var,
            self.config.static_gyro_var,
            self.config.static_gyro_var,
            self.config.static_accel_var,
        ));

        self.guarded(|filter| filter.correct(&z, &hx, &h, &r, Sensor::Imu))
    }

    /// `altitude_m` is relative to the pad, the same origin as the NED frame.
    pub fn update_baro(&mut self, altitude_m: f64) -> UpdateOutcome {
        if !altitude_m.is_finite() {
            return UpdateOutcome::Skipped;
        }

        let x = &self.state.x;
        let z = SVector::<f64, 1>::new(altitude_m);
        let hx = SVector::<f64, 1>::new(-x[FilterState::POSITION + 2] + x[FilterState::BARO_BIAS]);
        let mut h = SMatrix::<f64, 1, { FilterState::SIZE }>::zeros();
        h[(0, FilterState::POSITION + 2)] = -1.0;
        h[(0, FilterState::BARO_BIAS)] = 1.0;
        let r = SMatrix::<f64, 1, 1>::new(self.config.baro_var);

        self.guarded(|filter| filter.correct(&z, &hx, &h, &r, Sensor::Baro))
    }

    pub fn update_gps(&mut self, gps: &GpsMeasurement) -> UpdateOutcome {
        let finite = gps.north.is_finite()
            && gps.east.is_finite()
            && gps.down.is_none_or(|d| d.is_finite())
            && gps.velocity_ned.is_none_or(|v| v.iter().all(|c| c.is_finite()));
        if !finite {
            return UpdateOutcome::Skipped;
        }

        let cfg = &self.config;
        let north = (FilterState::POSITION, gps.north, cfg.gps_horizontal_var);
        let east = (FilterState::POSITION + 1, gps.east, cfg.gps_horizontal_var);
        let velocity = gps.velocity_ned.map(|v| {
            [0, 1, 2].map(|i| (FilterState::VELOCITY + i, v[i], cfg.gps_velocity_var))
        });

        match (gps.down, velocity) {
            (None, None) => self.select([north, east]),
            (Some(down), None) => {
                let down = (FilterState::POSITION + 2, down, cfg.gps_vertical_var);
                self.select([north, east, down])
            }
            (None, Some([vn, ve, vd])) => self.select([north, east, vn, ve, vd]),
            (Some(down), Some([vn, ve, vd])) => {
                let down = (FilterState::POSITION + 2, down, cfg.gps_vertical_var);
                self.select([north, east, down, vn, ve, vd])
            }
        }
    }

    /// Direct observation of state elements, given as (index, value, variance).
    fn select<const M: usize>(&mut self, rows: [(usize, f64, f64); M]) -> UpdateOutcome {
        let mut z = SVector::<f64, M>::zeros();
        let mut hx = SVector::<f64, M>::zeros();
        let mut h = SMatrix::<f64, M, { FilterState::SIZE }>::zeros();
        let mut r = SMatrix::<f64, M, M>::zeros();
        for (row, (index, value, variance)) in rows.into_iter().enumerate() {
            z[row] = value;
            hx[row] = self.state.x[index];
            h[(row, index)] = 1.0;
            r[(row, row)] = variance;
        }

        self.guarded(|filter| filter.correct(&z, &hx, &h, &r, Sensor::Gps))
    }

    /// Gated Kalman correction with a Joseph-form covariance update.
    fn correct<const M: usize>(
        &mut self,
        z: &SVector<f64, M>,
        hx: &SVector<f64, M>,
        h: &SMatrix<f64, M, { FilterState::SIZE }>,
        r: &SMatrix<f64, M, M>,
        sensor: Sensor,
    ) -> UpdateOutcome {
        let y = z - hx;
        let pht = self.state.p * h.transpose();
        let s = h * pht + r;
        let s = (s + s.transpose()) * 0.5;

        let Some(chol) = s.cholesky() else {
            log_warn!("{:?} innovation covariance is not positive definite", sensor);
            return UpdateOutcome::SingularInnovation;
        };

        let mahalanobis_sq = y.dot(&chol.solve(&y));
        let critical = chi_square_critical(self.config.gate_confidence, M);
        let max_streak = self.config.max_consecutive_rejections;
        let streak = self.streaks.get_mut(sensor);

        if !(mahalanobis_sq <= critical) {
            if max_streak == 0 || *streak < max_streak {
                *streak += 1;
                self.rejections.increment(sensor);
                log_debug!(
                    "{:?} measurement gated out, d2={} > {}",
                    sensor,
                    mahalanobis_sq,
                    critical
                );
                return UpdateOutcome::Rejected { mahalanobis_sq };
            }
            log_warn!(
                "{:?} rejected {} times in a row, accepting d2={}",
                sensor,
                *streak,
                mahalanobis_sq
            );
        }
        *streak = 0;

        // K = P Hᵀ S⁻¹, solved through the factor of S
        let k = chol.solve(&pht.transpose()).transpose();
        self.state.x += k * y;

        let i_kh = Covariance::identity() - k * h;
        self.state.p = i_kh * self.state.p * i_kh.transpose() + k * r * k.transpose();
        self.enforce_invariants();
        UpdateOutcome::Applied
    }

    /// Symmetrize P, floor its diagonal, renormalize q and clamp the biases.
    fn enforce_invariants(&mut self) {
        let floor = self.config.covariance_floor;
        let p = &mut self.state.p;
        *p = (*p + p.transpose()) * 0.5;
        for i in 0..FilterState::SIZE {
            if p[(i, i)] < floor {
                p[(i, i)] = floor;
            }
        }

        let q = self.state.quaternion();
        let norm = q.norm();
        if norm.is_finite() && norm > 1e-12 {
            self.state.set_quaternion(&(q / norm));
        } else if norm.is_finite() {
            log_warn!("attitude quaternion collapsed, resetting to identity");
            self.state.set_quaternion(&UnitQuaternion::identity().into_inner());
        }

        let x = &mut self.state.x;
        let clamp = |v: f64, limit: f64| v.max(-limit).min(limit);
        for i in 0..3 {
            x[FilterState::GYRO_BIAS + i] =
                clamp(x[FilterState::GYRO_BIAS + i], self.config.max_gyro_bias);
        }
        x[FilterState::ACCEL_Z_BIAS] = clamp(x[FilterState::ACCEL_Z_BIAS], self.config.max_accel_bias);
        x[FilterState::BARO_BIAS] = clamp(x[FilterState::BARO_BIAS], self.config.max_baro_bias);
    }

    /// Runs `op` against a snapshot; NaN/Inf in the result restores the
    /// snapshot and latches the fault until enough clean operations follow.
    fn guarded(&mut self, op: impl FnOnce(&mut Self) -> UpdateOutcome) -> UpdateOutcome {
        let snapshot = self.state.clone();
        let aligned = self.aligned;
        let outcome = op(self);

        if !self.state.is_finite() {
            self.state = snapshot;
            self.aligned = aligned;
            self.rollbacks += 1;
            self.fault_latched = true;
            self.clean_operations = 0;
            log_warn!("numerical fault, rolled back (rollbacks={})", self.rollbacks);
            return UpdateOutcome::RolledBack;
        }

        if outcome == UpdateOutcome::Applied {
            self.clean_operations = self.clean_operations.saturating_add(1);
            if self.fault_latched && self.clean_operations >= self.config.fault_recovery_updates {
                self.fault_latched = false;
                log_info!("numerical fault cleared after {} clean updates", self.clean_operations);
            }
        }
        outcome
    }
}

/// Shortest rotation taking `start` onto `end`.
fn quaternion_from_start_and_end_vector(
    start: &Vector3<f64>,
    end: &Vector3<f64>,
) -> UnitQuaternion<f64> {
    let start = start.normalize();
    let end = end.normalize();
    let angle = start.angle(&end);

    if angle.to_degrees() < 0.05 {
        return UnitQuaternion::identity();
    }

    let axis = UnitVector3::try_new(start.cross(&end), 1e-9).unwrap_or_else(|| {
        // antiparallel, any perpendicular axis works
        let helper = if libm::fabs(start.x) < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        UnitVector3::new_normalize(start.cross(&helper))
    });
    UnitQuaternion::from_axis_angle(&axis, angle)
}
