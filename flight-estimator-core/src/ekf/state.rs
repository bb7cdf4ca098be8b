use nalgebra::{Quaternion, SMatrix, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub type StateVector = SVector<f64, { FilterState::SIZE }>;
pub type Covariance = SMatrix<f64, { FilterState::SIZE }, { FilterState::SIZE }>;

/// Estimate and covariance. NED frame, quaternion scalar-first, body to NED.
///
/// | index  | content              |
/// |--------|----------------------|
/// | 0..3   | position NED (m)     |
/// | 3..6   | velocity NED (m/s)   |
/// | 6..10  | attitude q (w,x,y,z) |
/// | 10..13 | gyro bias (rad/s)    |
/// | 13     | accel z bias (m/s^2) |
/// | 14     | baro bias (m)        |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub x: StateVector,
    pub p: Covariance,
    /// bias-corrected specific force rotated into NED during the last predict,
    /// `None` when that predict had no usable IMU reading
    pub specific_force_ned: Option<Vector3<f64>>,
}

impl FilterState {
    pub const SIZE: usize = 15;

    pub const POSITION: usize = 0;
    pub const VELOCITY: usize = 3;
    pub const QUATERNION: usize = 6;
    pub const GYRO_BIAS: usize = 10;
    pub const ACCEL_Z_BIAS: usize = 13;
    pub const BARO_BIAS: usize = 14;

    pub fn new(x: StateVector, p: Covariance) -> Self {
        Self {
            x,
            p,
            specific_force_ned: None,
        }
    }

    pub fn position_ned(&self) -> Vector3<f64> {
        self.x.fixed_view::<3, 1>(Self::POSITION, 0).into()
    }

    pub fn velocity_ned(&self) -> Vector3<f64> {
        self.x.fixed_view::<3, 1>(Self::VELOCITY, 0).into()
    }

    pub fn quaternion(&self) -> Quaternion<f64> {
        Quaternion::new(
            self.x[Self::QUATERNION],
            self.x[Self::QUATERNION + 1],
            self.x[Self::QUATERNION + 2],
            self.x[Self::QUATERNION + 3],
        )
    }

    pub fn attitude(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(self.quaternion())
    }

    /// Roll, pitch and yaw of the body in NED, degrees.
    pub fn euler_angles_deg(&self) -> [f64; 3] {
        let (roll, pitch, yaw) = self.attitude().euler_angles();
        [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.x.fixed_view::<3, 1>(Self::GYRO_BIAS, 0).into()
    }

    pub fn accel_z_bias(&self) -> f64 {
        self.x[Self::ACCEL_Z_BIAS]
    }

    pub fn baro_bias(&self) -> f64 {
        self.x[Self::BARO_BIAS]
    }

    /// height above the NED origin
    pub fn altitude_up(&self) -> f64 {
        -self.x[Self::POSITION + 2]
    }

    pub fn vertical_velocity_up(&self) -> f64 {
        -self.x[Self::VELOCITY + 2]
    }

    pub fn speed(&self) -> f64 {
        self.velocity_ned().norm()
    }

    pub fn quaternion_norm(&self) -> f64 {
        self.quaternion().norm()
    }

    pub fn set_quaternion(&mut self, q: &Quaternion<f64>) {
        self.x[Self::QUATERNION] = q.w;
        self.x[Self::QUATERNION + 1] = q.i;
        self.x[Self::QUATERNION + 2] = q.j;
        self.x[Self::QUATERNION + 3] = q.k;
    }

    pub fn position_std(&self) -> [f64; 3] {
        self.std_block(Self::POSITION)
    }

    pub fn velocity_std(&self) -> [f64; 3] {
        self.std_block(Self::VELOCITY)
    }

    fn std_block(&self, offset: usize) -> [f64; 3] {
        core::array::from_fn(|i| libm::sqrt(self.p[(offset + i, offset + i)].max(0.0)))
    }

    pub fn is_finite(&self) -> bool {
        self.x.iter().all(|v| v.is_finite())
            && self.p.iter().all(|v| v.is_finite())
            && self
                .specific_force_ned
                .is_none_or(|f| f.iter().all(|v| v.is_finite()))
    }
}
