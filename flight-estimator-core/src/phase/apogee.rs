use heapless::Deque;
use serde::{Deserialize, Serialize};

const HISTORY: usize = 16;

/// Time-to-apogee extrapolation from the current climb rate. Times are on
/// the sample clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApogeePrediction {
    pub predicted_time_s: f64,
    pub window_start_s: f64,
    pub window_end_s: f64,
    pub predicted_altitude_m: f64,
    /// set once apogee is confirmed; the prediction is frozen from then on
    pub detected: bool,
}

impl ApogeePrediction {
    /// Straight-line extrapolation of vertical velocity to zero under
    /// constant deceleration `decel`.
    pub fn extrapolate(
        now_s: f64,
        altitude_m: f64,
        vertical_velocity_up: f64,
        decel: f64,
        window_s: f64,
    ) -> Self {
        let climb = vertical_velocity_up.max(0.0);
        let decel = decel.max(1e-3);
        let predicted_time_s = now_s + climb / decel;

        Self {
            predicted_time_s,
            window_start_s: predicted_time_s - window_s,
            window_end_s: predicted_time_s + window_s,
            predicted_altitude_m: altitude_m + climb * climb / (2.0 * decel),
            detected: false,
        }
    }

    pub fn contains(&self, time_s: f64) -> bool {
        time_s >= self.window_start_s && time_s <= self.window_end_s
    }
}

/// Confirms the positive to negative sign change of vertical velocity over
/// a run of consecutive samples.
#[derive(Debug, Clone)]
pub struct ApogeeDetector {
    confirm_samples: usize,
    seen_ascending: bool,
    descending: usize,
    recent: Deque<f64, HISTORY>,
}

impl ApogeeDetector {
    pub fn new(confirm_samples: usize) -> Self {
        Self {
            confirm_samples: confirm_samples.clamp(1, HISTORY - 1),
            seen_ascending: false,
            descending: 0,
            recent: Deque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.seen_ascending = false;
        self.descending = 0;
        self.recent.clear();
    }

    /// Returns a confidence once `confirm_samples` consecutive negative
    /// climb rates follow a positive one. Confidence is the fraction of
    /// strictly decreasing steps across the confirmation run.
    pub fn update(&mut self, vertical_velocity_up: f64) -> Option<f64> {
        if self.recent.len() > self.confirm_samples {
            self.recent.pop_front();
        }
        let _ = self.recent.push_back(vertical_velocity_up);

        if vertical_velocity_up > 0.0 {
            self.seen_ascending = true;
            self.descending = 0;
            return None;
        }
        if vertical_velocity_up < 0.0 && self.seen_ascending {
            self.descending += 1;
        } else {
            self.descending = 0;
        }

        if self.descending < self.confirm_samples {
            return None;
        }

        let mut steps = 0usize;
        let mut decreasing = 0usize;
        let mut previous: Option<f64> = None;
        for v in self.recent.iter() {
            if let Some(p) = previous {
                steps += 1;
                if *v < p {
                    decreasing += 1;
                }
            }
            previous = Some(*v);
        }
        Some(if steps == 0 {
            1.0
        } else {
            decreasing as f64 / steps as f64
        })
    }
}
