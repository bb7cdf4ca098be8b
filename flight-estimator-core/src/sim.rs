//! Synthetic single-stage flight for tests and offline runs. Vertical
//! flight only, body frame aligned with NED.

use alloc::vec::Vec;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, NormalError};

use crate::{
    config::STANDARD_GRAVITY,
    reference_frame::EARTH_RADIUS_M,
    sample::{GpsFix, ImuReading, SampleMode, TelemetrySample},
};

const SUBSTEPS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub seed: u64,
    pub rate_hz: f64,
    pub pad_time_s: f64,
    pub burn_time_s: f64,
    /// specific force produced by the motor, m/s^2
    pub thrust_accel: f64,
    /// quadratic drag coefficient before chute deployment, 1/m
    pub coast_drag: f64,
    pub chute_descent_rate: f64,
    /// deceleration from the touchdown flare, m/s^2
    pub landing_decel: f64,
    pub rest_after_landing_s: f64,
    /// after touchdown the vehicle switches to RECOVERY frames
    pub recovery_after_s: f64,
    pub site_latitude_deg: f64,
    pub site_longitude_deg: f64,
    pub site_altitude_m: f64,
    pub accel_noise: f64,
    pub gyro_noise_dps: f64,
    pub baro_noise: f64,
    pub gps_noise: f64,
    /// no fix above this height
    pub gps_ceiling_m: f64,
    pub max_duration_s: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            rate_hz: 10.0,
            pad_time_s: 2.0,
            burn_time_s: 3.0,
            thrust_accel: 80.0,
            coast_drag: 2e-5,
            chute_descent_rate: 25.0,
            landing_decel: 50.0,
            rest_after_landing_s: 10.0,
            recovery_after_s: 5.0,
            site_latitude_deg: 28.396837,
            site_longitude_deg: -80.605659,
            site_altitude_m: 3.0,
            accel_noise: 0.05,
            gyro_noise_dps: 0.1,
            baro_noise: 0.5,
            gps_noise: 1.5,
            gps_ceiling_m: 10_000.0,
            max_duration_s: 600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruthPoint {
    pub timestamp_us: u64,
    pub altitude_m: f64,
    pub vertical_velocity_up: f64,
    /// upward specific force
    pub specific_force_up: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFlight {
    pub samples: Vec<TelemetrySample>,
    pub truth: Vec<TruthPoint>,
    pub launch_time_s: f64,
    pub apogee_time_s: f64,
    pub apogee_altitude_m: f64,
    pub landing_time_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Pad,
    Burn,
    Coast,
    Chute,
    Flare,
    Landed,
}

struct Vehicle {
    stage: Stage,
    altitude: f64,
    velocity: f64,
    specific_force: f64,
}

impl Vehicle {
    fn advance(&mut self, t: f64, dt: f64, config: &SimConfig) -> Option<Stage> {
        let g = STANDARD_GRAVITY;
        let drag = config.coast_drag * self.velocity * libm::fabs(self.velocity);
        let chute = g / (config.chute_descent_rate * config.chute_descent_rate);

        let entered = match self.stage {
            Stage::Pad if t >= config.pad_time_s => Some(Stage::Burn),
            Stage::Burn if t >= config.pad_time_s + config.burn_time_s => Some(Stage::Coast),
            Stage::Coast if self.velocity <= 0.0 => Some(Stage::Chute),
            Stage::Chute
                if self.velocity < 0.0
                    && self.altitude
                        <= self.velocity * self.velocity / (2.0 * config.landing_decel) =>
            {
                Some(Stage::Flare)
            }
            Stage::Flare if self.velocity >= 0.0 || self.altitude <= 0.0 => Some(Stage::Landed),
            _ => None,
        };
        if let Some(stage) = entered {
            self.stage = stage;
        }

        self.specific_force = match self.stage {
            Stage::Pad | Stage::Landed => g,
            Stage::Burn => config.thrust_accel - drag,
            Stage::Coast => -drag,
            Stage::Chute => chute * self.velocity * self.velocity,
            Stage::Flare => g + config.landing_decel,
        };

        match self.stage {
            Stage::Pad | Stage::Landed => {
                self.velocity = 0.0;
                self.altitude = 0.0;
            }
            _ => {
                let accel = self.specific_force - g;
                self.altitude += self.velocity * dt + 0.5 * accel * dt * dt;
                self.velocity += accel * dt;
                if self.altitude < 0.0 {
                    self.altitude = 0.0;
                }
            }
        }
        entered
    }
}

/// Runs the flight and samples it at `rate_hz`. Only fails on a noise
/// setting `rand_distr` cannot build a distribution from.
pub fn simulate_flight(config: &SimConfig) -> Result<SimulatedFlight, NormalError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let accel_noise = Normal::new(0.0, config.accel_noise)?;
    let gyro_noise = Normal::new(0.0, config.gyro_noise_dps)?;
    let baro_noise = Normal::new(0.0, config.baro_noise)?;
    let gps_noise = Normal::new(0.0, config.gps_noise)?;
    let mag_noise = Normal::new(0.0, 0.5)?;

    let sample_dt = 1.0 / config.rate_hz;
    let dt = sample_dt / SUBSTEPS as f64;
    let mut vehicle = Vehicle {
        stage: Stage::Pad,
        altitude: 0.0,
        velocity: 0.0,
        specific_force: STANDARD_GRAVITY,
    };

    let mut flight = SimulatedFlight {
        samples: Vec::new(),
        truth: Vec::new(),
        launch_time_s: config.pad_time_s,
        apogee_time_s: 0.0,
        apogee_altitude_m: 0.0,
        landing_time_s: 0.0,
    };

    let mut t = 0.0;
    let mut k = 0u64;
    let mut landed_at: Option<f64> = None;
    loop {
        let timestamp_us = (k as f64 * sample_dt * 1_000_000.0).round() as u64;
        if let Some(landed) = landed_at {
            if t > landed + config.rest_after_landing_s {
                break;
            }
        }
        if t > config.max_duration_s {
            break;
        }

        flight.truth.push(TruthPoint {
            timestamp_us,
            altitude_m: vehicle.altitude,
            vertical_velocity_up: vehicle.velocity,
            specific_force_up: vehicle.specific_force,
        });
        flight
            .samples
            .push(sample_vehicle(&vehicle, timestamp_us, landed_at, t, config, &mut |d| {
                match d {
                    Noise::Accel => accel_noise.sample(&mut rng),
                    Noise::Gyro => gyro_noise.sample(&mut rng),
                    Noise::Baro => baro_noise.sample(&mut rng),
                    Noise::Gps => gps_noise.sample(&mut rng),
                    Noise::Mag => mag_noise.sample(&mut rng),
                }
            }));

        for _ in 0..SUBSTEPS {
            match vehicle.advance(t, dt, config) {
                Some(Stage::Chute) => {
                    flight.apogee_time_s = t;
                    flight.apogee_altitude_m = vehicle.altitude;
                }
                Some(Stage::Landed) => {
                    flight.landing_time_s = t;
                    landed_at = Some(t);
                }
                _ => {}
            }
            t += dt;
        }
        k += 1;
        t = k as f64 * sample_dt;
    }

    Ok(flight)
}

#[derive(Debug, Clone, Copy)]
enum Noise {
    Accel,
    Gyro,
    Baro,
    Gps,
    Mag,
}

fn sample_vehicle(
    vehicle: &Vehicle,
    timestamp_us: u64,
    landed_at: Option<f64>,
    t: f64,
    config: &SimConfig,
    noise: &mut dyn FnMut(Noise) -> f64,
) -> TelemetrySample {
    let recovery = landed_at.is_some_and(|landed| t >= landed + config.recovery_after_s);

    let (imu, magnetometer) = if recovery {
        (None, None)
    } else {
        let imu = ImuReading {
            accel_mps2: [
                noise(Noise::Accel) as f32,
                noise(Noise::Accel) as f32,
                (-vehicle.specific_force + noise(Noise::Accel)) as f32,
            ],
            gyro_dps: [
                noise(Noise::Gyro) as f32,
                noise(Noise::Gyro) as f32,
                noise(Noise::Gyro) as f32,
            ],
        };
        let mag = [
            (22.0 + noise(Noise::Mag)) as f32,
            (5.0 + noise(Noise::Mag)) as f32,
            (40.0 + noise(Noise::Mag)) as f32,
        ];
        (Some(imu), Some(mag))
    };

    let gps = (vehicle.altitude < config.gps_ceiling_m).then(|| {
        let north = noise(Noise::Gps);
        let east = noise(Noise::Gps);
        let lat0 = config.site_latitude_deg.to_radians();
        GpsFix {
            latitude_deg: config.site_latitude_deg + (north / EARTH_RADIUS_M).to_degrees(),
            longitude_deg: config.site_longitude_deg
                + (east / (EARTH_RADIUS_M * libm::cos(lat0))).to_degrees(),
            satellites: 9,
            altitude_m: Some(
                (config.site_altitude_m + vehicle.altitude + 2.0 * noise(Noise::Gps)) as f32,
            ),
            velocity_ned_mps: None,
        }
    });

    TelemetrySample {
        timestamp_us,
        mode: if recovery {
            SampleMode::Recovery
        } else {
            SampleMode::Armed
        },
        imu,
        magnetometer,
        baro_altitude_m: (config.site_altitude_m + vehicle.altitude + noise(Noise::Baro)) as f32,
        gps,
        temperature_c: (25.0 - 0.0065 * vehicle.altitude) as f32,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flight_shape() {
        let flight = simulate_flight(&SimConfig::default()).unwrap();
        assert_eq!(flight.samples.len(), flight.truth.len());
        assert!(flight.apogee_altitude_m > 1500.0 && flight.apogee_altitude_m < 4000.0);
        assert!(flight.apogee_time_s > 15.0 && flight.apogee_time_s < 40.0);
        assert!(flight.landing_time_s > flight.apogee_time_s);

        let last = flight.truth.last().unwrap();
        assert_eq!(last.altitude_m, 0.0);
        assert_eq!(last.vertical_velocity_up, 0.0);
        assert_eq!(flight.samples.last().unwrap().mode, SampleMode::Recovery);

        let mut previous = None;
        for sample in flight.samples.iter() {
            if let Some(previous) = previous {
                assert_eq!(sample.timestamp_us - previous, 100_000);
            }
            previous = Some(sample.timestamp_us);
        }
    }

    #[test]
    fn same_seed_same_flight() {
        let a = simulate_flight(&SimConfig::default()).unwrap();
        let b = simulate_flight(&SimConfig::default()).unwrap();
        assert_eq!(a.samples, b.samples);

        let c = simulate_flight(&SimConfig {
            seed: 1,
            ..Default::default()
        })
        .unwrap();
        assert_ne!(a.samples, c.samples);
    }
}
