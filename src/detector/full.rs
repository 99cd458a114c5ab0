use super::{elapsed_ms, hold_time_ms, transition, Transition};
use crate::config::{FullThresholds, SystemVoltage};

/// Full-charge detection: voltage at or above the absorb setpoint with the
/// charge current tapered to the tail threshold, held for the hold time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FullState {
    pub full: bool,
    /// Start of the current qualifying window
    pub started_ms: Option<u32>,
}

impl FullState {
    pub fn update(
        &mut self,
        thresholds: &FullThresholds,
        system_voltage: SystemVoltage,
        voltage: f32,
        current: f32,
        now_ms: u32,
    ) -> Transition {
        let was_full = self.full;
        let absorb_v = thresholds.absorb_v * system_voltage.multiplier();
        let qualifies = voltage >= absorb_v && current.abs() <= thresholds.tail_current_a;

        if !qualifies {
            self.started_ms = None;
            self.full = false;
            return transition(was_full, false);
        }

        match self.started_ms {
            None => self.started_ms = Some(now_ms),
            Some(started_ms) => {
                if elapsed_ms(now_ms, started_ms) >= hold_time_ms(thresholds.hold_time_s) {
                    self.full = true;
                }
            }
        }

        transition(was_full, self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: FullThresholds = FullThresholds {
        absorb_v: 14.4,
        tail_current_a: 4.0,
        hold_time_s: 900,
    };

    #[test]
    fn test_full_after_hold_time() {
        let mut full = FullState::default();
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 14.45, -3.0, 0), Transition::Unchanged);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 14.45, -2.5, 899_999), Transition::Unchanged);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 14.45, -2.5, 900_000), Transition::Entered);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 14.45, -2.0, 960_000), Transition::Unchanged);
        assert!(full.full);
    }

    #[test]
    fn test_bulk_charge_current_is_not_full() {
        let mut full = FullState::default();
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, -40.0, 0);
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, -40.0, 1_000_000);
        assert!(!full.full);
        assert_eq!(full.started_ms, None);
    }

    #[test]
    fn test_voltage_dip_resets() {
        let mut full = FullState::default();
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, -1.0, 0);
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.3, -1.0, 600_000);
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, -1.0, 700_000);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, -1.0, 1_500_000), Transition::Unchanged);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, -1.0, 1_600_000), Transition::Entered);
    }

    #[test]
    fn test_leaves_full_when_charger_stops() {
        let mut full = FullState::default();
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, 0.0, 0);
        full.update(&THRESHOLDS, SystemVoltage::V12, 14.4, 0.0, 900_000);
        assert!(full.full);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V12, 13.2, 0.0, 901_000), Transition::Left);
    }

    #[test]
    fn test_24v_setpoint_is_doubled() {
        let mut full = FullState::default();
        full.update(&THRESHOLDS, SystemVoltage::V24, 14.4, 0.0, 0);
        full.update(&THRESHOLDS, SystemVoltage::V24, 14.4, 0.0, 900_000);
        assert!(!full.full);

        full.update(&THRESHOLDS, SystemVoltage::V24, 28.8, 0.0, 1_000_000);
        assert_eq!(full.update(&THRESHOLDS, SystemVoltage::V24, 28.9, 0.0, 1_900_000), Transition::Entered);
    }
}
