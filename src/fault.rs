use crate::battery_state::Sample;
use crate::config::BatteryProfile;

/// Operating-limit violations seen in the latest sample. Informational only:
/// nothing in the estimator reacts to them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultFlags {
    pub under_voltage: bool,
    pub over_voltage: bool,
    pub over_current: bool,
    pub over_temperature: bool,
}

impl FaultFlags {
    pub fn evaluate(profile: &BatteryProfile, sample: &Sample) -> Self {
        let limits = &profile.faults;
        let multiplier = profile.system_voltage.multiplier();
        let v = sample.voltage_v;
        Self {
            under_voltage: v < limits.voltage_min_12v * multiplier,
            over_voltage: v > limits.voltage_max_12v * multiplier,
            over_current: sample.current_a.abs() > limits.current_max_a,
            over_temperature: sample
                .temperature_c
                .is_some_and(|t| t > limits.temperature_max_c),
        }
    }

    pub fn any(&self) -> bool {
        self.under_voltage || self.over_voltage || self.over_current || self.over_temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Chemistry, SystemVoltage};

    #[test]
    fn test_nominal_sample_has_no_faults() {
        let profile = BatteryProfile::factory(Chemistry::Fla);
        let flags = FaultFlags::evaluate(&profile, &Sample::new(12.6, 10.0, 25.0));
        assert!(!flags.any());
    }

    #[test]
    fn test_each_limit() {
        let profile = BatteryProfile::factory(Chemistry::Lfp);
        assert!(FaultFlags::evaluate(&profile, &Sample::new(10.9, 0.0, 25.0)).under_voltage);
        assert!(FaultFlags::evaluate(&profile, &Sample::new(14.7, 0.0, 25.0)).over_voltage);
        assert!(FaultFlags::evaluate(&profile, &Sample::new(13.2, -151.0, 25.0)).over_current);
        assert!(FaultFlags::evaluate(&profile, &Sample::new(13.2, 0.0, 56.0)).over_temperature);
    }

    #[test]
    fn test_missing_temperature_is_not_a_fault() {
        let profile = BatteryProfile::factory(Chemistry::Lfp);
        let sample = Sample::new(13.2, 0.0, crate::battery_state::TEMPERATURE_DISCONNECTED_C);
        assert!(!FaultFlags::evaluate(&profile, &sample).over_temperature);
    }

    #[test]
    fn test_24v_limits_are_doubled() {
        let mut profile = BatteryProfile::factory(Chemistry::Fla);
        profile.system_voltage = SystemVoltage::V24;
        let flags = FaultFlags::evaluate(&profile, &Sample::new(25.2, 0.0, 25.0));
        assert!(!flags.any());
        assert!(FaultFlags::evaluate(&profile, &Sample::new(12.6, 0.0, 25.0)).under_voltage);
    }
}
