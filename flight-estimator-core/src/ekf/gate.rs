use serde::{Deserialize, Serialize};

use crate::config::GateConfidence;

// chi-square critical values, dof 1..=6
const CHI2_95: [f64; 6] = [3.841, 5.991, 7.815, 9.488, 11.070, 12.592];
const CHI2_99: [f64; 6] = [6.635, 9.210, 11.345, 13.277, 15.086, 16.812];
const CHI2_999: [f64; 6] = [10.828, 13.816, 16.266, 18.467, 20.515, 22.458];

/// Critical Mahalanobis distance squared for `dof` residual components.
pub fn chi_square_critical(confidence: GateConfidence, dof: usize) -> f64 {
    let table = match confidence {
        GateConfidence::P95 => &CHI2_95,
        GateConfidence::P99 => &CHI2_99,
        GateConfidence::P999 => &CHI2_999,
    };
    table[dof.clamp(1, table.len()) - 1]
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    Imu,
    Baro,
    Gps,
}

/// Measurements discarded by the outlier gate, per sensor.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounters {
    pub imu: u32,
    pub baro: u32,
    pub gps: u32,
}

impl RejectionCounters {
    pub fn total(&self) -> u32 {
        self.imu + self.baro + self.gps
    }

    pub(crate) fn increment(&mut self, sensor: Sensor) {
        match sensor {
            Sensor::Imu => self.imu += 1,
            Sensor::Baro => self.baro += 1,
            Sensor::Gps => self.gps += 1,
        }
    }
}

/// Consecutive-rejection streaks. Once a streak reaches the configured
/// limit the next reading from that sensor bypasses the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RejectionStreaks {
    imu: u32,
    baro: u32,
    gps: u32,
}

impl RejectionStreaks {
    pub fn get_mut(&mut self, sensor: Sensor) -> &mut u32 {
        match sensor {
            Sensor::Imu => &mut self.imu,
            Sensor::Baro => &mut self.baro,
            Sensor::Gps => &mut self.gps,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_lookup() {
        assert_eq!(chi_square_critical(GateConfidence::P99, 3), 11.345);
        assert_eq!(chi_square_critical(GateConfidence::P95, 1), 3.841);
        assert_eq!(chi_square_critical(GateConfidence::P999, 6), 22.458);
        // out-of-table dof saturates instead of panicking
        assert_eq!(chi_square_critical(GateConfidence::P99, 0), 6.635);
        assert_eq!(chi_square_critical(GateConfidence::P99, 9), 16.812);
    }
}
