use heapless::Deque;

const WINDOW_CAPACITY: usize = 128;

/// "Condition held for at least `window`" with some tolerance for noisy
/// samples. A run starts at the first hit and survives misses while the hit
/// fraction since its start stays above `min_fraction`.
#[derive(Debug, Clone)]
pub struct SustainedCondition {
    window_us: u64,
    min_fraction: f64,
    run_start_us: Option<u64>,
    samples: Deque<(u64, bool), WINDOW_CAPACITY>,
}

impl SustainedCondition {
    /// A zero, negative or NaN window saturates to zero; a run still needs
    /// two samples to fire.
    pub fn new(window_s: f64, min_fraction: f64) -> Self {
        Self {
            window_us: (window_s * 1_000_000.0) as u64,
            min_fraction,
            run_start_us: None,
            samples: Deque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.run_start_us = None;
        self.samples.clear();
    }

    /// timestamp of the first hit of the current run
    pub fn started_at(&self) -> Option<u64> {
        self.run_start_us
    }

    /// Feeds one sample. Returns the window's hit fraction once the
    /// condition has been sustained for the full window and the latest
    /// sample is a hit.
    pub fn update(&mut self, timestamp_us: u64, hit: bool) -> Option<f64> {
        if self.samples.is_full() {
            self.samples.pop_front();
        }
        let _ = self.samples.push_back((timestamp_us, hit));
        while let Some(&(oldest, _)) = self.samples.front() {
            if oldest.saturating_add(self.window_us) < timestamp_us {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if hit && self.run_start_us.is_none() {
            self.run_start_us = Some(timestamp_us);
        }
        let run_start = self.run_start_us?;

        let (hits, total) = self
            .samples
            .iter()
            .filter(|(ts, _)| *ts >= run_start)
            .fold((0usize, 0usize), |(hits, total), (_, h)| {
                (hits + *h as usize, total + 1)
            });
        let fraction = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        if fraction < self.min_fraction {
            self.run_start_us = hit.then_some(timestamp_us);
            return None;
        }

        let held_us = timestamp_us.saturating_sub(run_start);
        (hit && held_us > 0 && held_us >= self.window_us).then_some(fraction)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const STEP: u64 = 100_000;

    #[test]
    fn single_sample_never_triggers() {
        let mut condition = SustainedCondition::new(0.5, 0.8);
        assert!(condition.update(0, true).is_none());
        assert!(condition.update(STEP, false).is_none());
        assert!(condition.started_at().is_none());
    }

    #[test]
    fn fires_after_full_window() {
        let mut condition = SustainedCondition::new(0.5, 0.8);
        for i in 0..5 {
            assert!(condition.update(i * STEP, true).is_none());
        }
        assert_eq!(condition.update(5 * STEP, true), Some(1.0));
        assert_eq!(condition.started_at(), Some(0));
    }

    #[test]
    fn tolerates_an_isolated_miss() {
        let mut condition = SustainedCondition::new(1.0, 0.8);
        let hits = [true, true, true, true, true, false, true, true, true, true, true];
        let mut fired = None;
        for (i, hit) in hits.iter().enumerate() {
            fired = condition.update(i as u64 * STEP, *hit);
        }
        let confidence = fired.unwrap();
        assert!(confidence > 0.8 && confidence < 1.0);
    }

    #[test]
    fn persistent_misses_restart_the_run() {
        let mut condition = SustainedCondition::new(0.5, 0.8);
        condition.update(0, true);
        condition.update(STEP, true);
        condition.update(2 * STEP, false);
        condition.update(3 * STEP, false);
        assert!(condition.started_at().is_none());

        let mut t = 4 * STEP;
        condition.update(t, true);
        assert_eq!(condition.started_at(), Some(t));
        for _ in 0..4 {
            t += STEP;
            assert!(condition.update(t, true).is_none());
        }
        t += STEP;
        assert!(condition.update(t, true).is_some());
    }

    #[test]
    fn degenerate_window_still_needs_two_hits() {
        for window_s in [0.0, -1.0, f64::NAN] {
            let mut condition = SustainedCondition::new(window_s, 0.8);
            assert!(condition.update(0, true).is_none(), "window {window_s}");
            assert_eq!(condition.update(STEP, true), Some(1.0), "window {window_s}");
        }
    }
}
