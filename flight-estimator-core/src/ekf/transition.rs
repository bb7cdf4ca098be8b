use nalgebra::{Matrix3, Quaternion, Vector3};

use super::state::{FilterState, StateVector};
use crate::config::QuaternionIntegration;

/// IMU reading in filter units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuInput {
    /// body frame specific force, m/s^2
    pub accel: Vector3<f64>,
    /// body frame angular rate, rad/s
    pub gyro: Vector3<f64>,
}

impl ImuInput {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self { accel, gyro }
    }
}

pub(crate) fn quaternion_of(x: &StateVector) -> Quaternion<f64> {
    let i = FilterState::QUATERNION;
    Quaternion::new(x[i], x[i + 1], x[i + 2], x[i + 3])
}

/// Body to NED rotation written out in the quaternion components, so the
/// numeric Jacobian sees a smooth function of the raw state.
pub fn rotation_matrix(q: &Quaternion<f64>) -> Matrix3<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Matrix3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        1.0 - 2.0 * (x * x + y * y),
    )
}

pub fn integrate_quaternion(
    q: &Quaternion<f64>,
    omega: &Vector3<f64>,
    dt: f64,
    integration: QuaternionIntegration,
) -> Quaternion<f64> {
    match integration {
        QuaternionIntegration::FirstOrder => {
            let omega_q = Quaternion::new(0.0, omega.x, omega.y, omega.z);
            q + (q * omega_q) * (0.5 * dt)
        }
        QuaternionIntegration::ExponentialMap => {
            let rate = omega.norm();
            let half_angle = 0.5 * rate * dt;
            let dq = if rate < 1e-12 {
                Quaternion::new(1.0, 0.5 * dt * omega.x, 0.5 * dt * omega.y, 0.5 * dt * omega.z)
            } else {
                let s = libm::sin(half_angle) / rate;
                Quaternion::new(libm::cos(half_angle), s * omega.x, s * omega.y, s * omega.z)
            };
            q * dq
        }
    }
}

/// Bias-corrected specific force rotated into NED.
pub fn specific_force_ned(x: &StateVector, imu: &ImuInput) -> Vector3<f64> {
    let f_body = imu.accel - Vector3::new(0.0, 0.0, x[FilterState::ACCEL_Z_BIAS]);
    rotation_matrix(&quaternion_of(x)) * f_body
}

/// Discrete state transition over `dt`. Without an IMU reading only the
/// position moves, at constant velocity.
pub fn propagate(
    x: &StateVector,
    imu: Option<&ImuInput>,
    dt: f64,
    gravity: f64,
    integration: QuaternionIntegration,
) -> StateVector {
    let mut next = *x;
    let p = x.fixed_view::<3, 1>(FilterState::POSITION, 0).into_owned();
    let v = x.fixed_view::<3, 1>(FilterState::VELOCITY, 0).into_owned();

    let Some(imu) = imu else {
        next.fixed_view_mut::<3, 1>(FilterState::POSITION, 0)
            .copy_from(&(p + v * dt));
        return next;
    };

    let a = specific_force_ned(x, imu) + Vector3::new(0.0, 0.0, gravity);
    next.fixed_view_mut::<3, 1>(FilterState::POSITION, 0)
        .copy_from(&(p + v * dt + a * (0.5 * dt * dt)));
    next.fixed_view_mut::<3, 1>(FilterState::VELOCITY, 0)
        .copy_from(&(v + a * dt));

    let bias = x.fixed_view::<3, 1>(FilterState::GYRO_BIAS, 0).into_owned();
    let q = integrate_quaternion(&quaternion_of(x), &(imu.gyro - bias), dt, integration);
    next[FilterState::QUATERNION] = q.w;
    next[FilterState::QUATERNION + 1] = q.i;
    next[FilterState::QUATERNION + 2] = q.j;
    next[FilterState::QUATERNION + 3] = q.k;

    next
}
