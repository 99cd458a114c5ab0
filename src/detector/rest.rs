use super::{elapsed_ms, hold_time_ms, transition, Transition};
use crate::config::RestThresholds;

/// Rest detection: current below threshold and voltage settled within a
/// window around a reference for the hold time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RestState {
    pub resting: bool,
    /// Start of the current quiet window, `None` while current is flowing
    pub started_ms: Option<u32>,
    /// Voltage the window is measured against
    pub reference_voltage: f32,
    /// Settled voltage from the latest resting update
    pub last_rest_voltage: f32,
}

impl RestState {
    pub fn update(
        &mut self,
        thresholds: &RestThresholds,
        voltage: f32,
        current: f32,
        now_ms: u32,
    ) -> Transition {
        let was_resting = self.resting;
        let quiet = voltage.is_finite() && current.is_finite() && current.abs() < thresholds.current_a;

        if !quiet {
            self.started_ms = None;
            self.resting = false;
            return transition(was_resting, false);
        }

        match self.started_ms {
            None => self.open_window(voltage, now_ms),
            Some(started_ms) => {
                let window_v = thresholds.stability_mv / 1000.0;
                if (voltage - self.reference_voltage).abs() > window_v {
                    self.open_window(voltage, now_ms);
                } else if elapsed_ms(now_ms, started_ms) >= hold_time_ms(thresholds.hold_time_s) {
                    self.resting = true;
                    self.last_rest_voltage = voltage;
                }
            }
        }

        transition(was_resting, self.resting)
    }

    fn open_window(&mut self, voltage: f32, now_ms: u32) {
        self.started_ms = Some(now_ms);
        self.reference_voltage = voltage;
        self.resting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: RestThresholds = RestThresholds {
        current_a: 2.0,
        stability_mv: 20.0,
        hold_time_s: 60,
    };

    #[test]
    fn test_rests_after_hold_time() {
        let mut rest = RestState::default();
        assert_eq!(rest.update(&THRESHOLDS, 12.50, 0.5, 0), Transition::Unchanged);
        assert_eq!(rest.update(&THRESHOLDS, 12.51, 0.4, 30_000), Transition::Unchanged);
        assert!(!rest.resting);
        assert_eq!(rest.update(&THRESHOLDS, 12.49, -0.3, 60_000), Transition::Entered);
        assert!(rest.resting);
        assert_eq!(rest.last_rest_voltage, 12.49);
        assert_eq!(rest.update(&THRESHOLDS, 12.50, 0.0, 61_000), Transition::Unchanged);
        assert!(rest.resting);
    }

    #[test]
    fn test_current_resets_timer() {
        let mut rest = RestState::default();
        rest.update(&THRESHOLDS, 12.50, 0.5, 0);
        rest.update(&THRESHOLDS, 12.50, 5.0, 30_000);
        assert_eq!(rest.started_ms, None);
        rest.update(&THRESHOLDS, 12.50, 0.5, 40_000);
        assert_eq!(rest.update(&THRESHOLDS, 12.50, 0.5, 90_000), Transition::Unchanged);
        assert_eq!(rest.update(&THRESHOLDS, 12.50, 0.5, 100_000), Transition::Entered);
    }

    #[test]
    fn test_charging_current_counts_as_flowing() {
        let mut rest = RestState::default();
        rest.update(&THRESHOLDS, 12.50, -10.0, 0);
        rest.update(&THRESHOLDS, 12.50, -10.0, 120_000);
        assert!(!rest.resting);
        assert_eq!(rest.started_ms, None);
    }

    #[test]
    fn test_voltage_drift_restarts_window() {
        let mut rest = RestState::default();
        rest.update(&THRESHOLDS, 12.50, 0.0, 0);
        rest.update(&THRESHOLDS, 12.55, 0.0, 50_000);
        assert_eq!(rest.started_ms, Some(50_000));
        assert_eq!(rest.reference_voltage, 12.55);
        assert_eq!(rest.update(&THRESHOLDS, 12.55, 0.0, 100_000), Transition::Unchanged);
        assert_eq!(rest.update(&THRESHOLDS, 12.54, 0.0, 110_000), Transition::Entered);
    }

    #[test]
    fn test_leaves_rest_on_load() {
        let mut rest = RestState::default();
        rest.update(&THRESHOLDS, 12.50, 0.0, 0);
        rest.update(&THRESHOLDS, 12.50, 0.0, 60_000);
        assert!(rest.resting);
        assert_eq!(rest.update(&THRESHOLDS, 12.30, 15.0, 61_000), Transition::Left);
        assert!(!rest.resting);
    }

    #[test]
    fn test_hold_time_across_clock_wrap() {
        let mut rest = RestState::default();
        let start = u32::MAX - 10_000;
        rest.update(&THRESHOLDS, 12.50, 0.0, start);
        assert_eq!(rest.update(&THRESHOLDS, 12.50, 0.0, 49_998), Transition::Unchanged);
        assert_eq!(rest.update(&THRESHOLDS, 12.50, 0.0, 49_999), Transition::Entered);
    }
}
