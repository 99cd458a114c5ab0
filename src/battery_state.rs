use crate::config::{BatteryProfile, Chemistry, SystemVoltage};
use crate::detector::{FullState, RestState};
use crate::fault::FaultFlags;
use crate::learner::{LastFullMarkers, RestAnchor};
use crate::persistence::BatterySnapshot;

/// Reading reported by a DS18B20 that has dropped off the bus (°C)
pub const TEMPERATURE_DISCONNECTED_C: f32 = -127.0;

const KELVIN_OFFSET: f32 = 273.15;

/// One smoothed sensor sample for one battery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Battery voltage in V
    pub voltage_v: f32,
    /// Battery current in A, positive while discharging
    pub current_a: f32,
    /// Battery temperature in °C, `None` when the sensor gave nothing usable
    pub temperature_c: Option<f32>,
}

impl Sample {
    /// Build a sample from a raw temperature reading, dropping the
    /// disconnected sentinel and non-finite values.
    pub fn new(voltage_v: f32, current_a: f32, temperature_c: f32) -> Self {
        let usable = temperature_c.is_finite() && temperature_c != TEMPERATURE_DISCONNECTED_C;
        Self {
            voltage_v,
            current_a,
            temperature_c: usable.then_some(temperature_c),
        }
    }

    pub fn power_w(&self) -> f32 {
        self.voltage_v * self.current_a
    }

    pub fn is_finite(&self) -> bool {
        self.voltage_v.is_finite() && self.current_a.is_finite()
    }
}

/// The estimated state of one battery.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryState {
    /// Last sample handed in by the sensor side
    pub sample: Sample,
    /// Last temperature that was actually measured (°C)
    pub last_good_temperature_c: Option<f32>,
    pub remaining_ah: f32,
    pub remaining_wh: f32,
    /// State of charge in %, relative to the learned capacity
    pub soc_percent: f32,
    /// State of health in %, learned capacity relative to nominal
    pub soh_percent: f32,
    pub learned_capacity_ah: f32,
    pub rest: RestState,
    pub full: FullState,
    pub last_full: LastFullMarkers,
    /// Latest rest reading since the last full charge
    pub rest_anchor: Option<RestAnchor>,
    /// SoC read back from storage, waiting to be checked against the OCV estimate
    pub persisted_soc_percent: Option<f32>,
    /// Cleared once the first update after boot has seeded the coulomb counter
    pub needs_ocv_seed: bool,
    pub faults: FaultFlags,
}

impl BatteryState {
    /// State for a battery with nothing persisted.
    pub fn new(profile: &BatteryProfile) -> Self {
        let nominal = profile.nominal_capacity_ah;
        Self {
            sample: Sample {
                voltage_v: 0.0,
                current_a: 0.0,
                temperature_c: None,
            },
            last_good_temperature_c: None,
            remaining_ah: nominal,
            remaining_wh: 0.0,
            soc_percent: 0.0,
            soh_percent: 100.0,
            learned_capacity_ah: nominal,
            rest: RestState::default(),
            full: FullState::default(),
            last_full: LastFullMarkers::full(nominal),
            rest_anchor: None,
            persisted_soc_percent: None,
            needs_ocv_seed: true,
            faults: FaultFlags::default(),
        }
    }

    /// State seeded from a persisted snapshot. The stored SoC is kept aside
    /// for the cold-start check; the learned capacity is clamped back into
    /// the profile's guardrails.
    pub fn restore(profile: &BatteryProfile, snapshot: &BatterySnapshot) -> Self {
        let mut state = Self::new(profile);
        let (min_ah, max_ah) = profile.capacity_bounds_ah();

        let learned = snapshot.learned_capacity_ah;
        if learned.is_finite() && learned > 0.0 {
            state.learned_capacity_ah = learned.clamp(min_ah, max_ah);
        }
        state.last_full = LastFullMarkers::full(state.learned_capacity_ah);

        if snapshot.soc_percent.is_finite() {
            let soc = snapshot.soc_percent.clamp(0.0, 100.0);
            state.persisted_soc_percent = Some(soc);
            state.soc_percent = soc;
            state.remaining_ah = soc / 100.0 * state.learned_capacity_ah;
        }
        state.soh_percent = soh_percent(state.learned_capacity_ah, profile.nominal_capacity_ah);
        state
    }

    /// Record a new sample, remembering its temperature if it had one.
    pub fn observe(&mut self, sample: Sample) {
        if let Some(t) = sample.temperature_c {
            self.last_good_temperature_c = Some(t);
        }
        self.sample = sample;
    }

    /// Temperature to compensate with: this tick's if measured, otherwise the
    /// last good one.
    pub fn compensation_temperature_c(&self) -> Option<f32> {
        self.sample.temperature_c.or(self.last_good_temperature_c)
    }

    /// Recompute SoC and SoH after `remaining_ah` or `learned_capacity_ah` moved.
    pub fn refresh_percentages(&mut self, profile: &BatteryProfile) {
        self.remaining_ah = self.remaining_ah.clamp(0.0, self.learned_capacity_ah);
        self.soc_percent = (100.0 * self.remaining_ah / self.learned_capacity_ah).clamp(0.0, 100.0);
        self.soh_percent = soh_percent(self.learned_capacity_ah, profile.nominal_capacity_ah);
    }

    pub fn snapshot(&self) -> BatterySnapshot {
        BatterySnapshot {
            learned_capacity_ah: self.learned_capacity_ah,
            soc_percent: self.soc_percent,
            soh_percent: self.soh_percent,
        }
    }

    pub fn status(&self) -> BatteryStatus {
        BatteryStatus {
            soc_percent: self.soc_percent,
            soh_percent: self.soh_percent,
            remaining_ah: self.remaining_ah,
            remaining_wh: self.remaining_wh,
            learned_capacity_ah: self.learned_capacity_ah,
            voltage_v: self.sample.voltage_v,
            current_a: self.sample.current_a,
            temperature_c: self.sample.temperature_c,
            temperature_k: self.sample.temperature_c.map(|t| t + KELVIN_OFFSET),
            resting: self.rest.resting,
            full: self.full.full,
            faults: self.faults,
        }
    }
}

/// State of health as a percentage of nominal capacity, clamped to 0..=100.
pub fn soh_percent(learned_capacity_ah: f32, nominal_capacity_ah: f32) -> f32 {
    (100.0 * learned_capacity_ah / nominal_capacity_ah).clamp(0.0, 100.0)
}

/// What a status consumer (e.g. a field bus encoder) gets for one battery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    pub soc_percent: f32,
    pub soh_percent: f32,
    pub remaining_ah: f32,
    pub remaining_wh: f32,
    pub learned_capacity_ah: f32,
    pub voltage_v: f32,
    pub current_a: f32,
    pub temperature_c: Option<f32>,
    pub temperature_k: Option<f32>,
    pub resting: bool,
    pub full: bool,
    pub faults: FaultFlags,
}

/// Static description of a battery, in the codes NMEA 2000 battery
/// configuration messages use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryConfigReport {
    pub chemistry: Chemistry,
    /// 1 = flooded/gel/AGM lead-acid family, 5 = lithium
    pub battery_type_code: u8,
    /// 1 = flooded, 2 = gel, 3 = AGM, 5 = lithium ion
    pub chemistry_code: u8,
    /// 2 = 12V, 3 = 24V
    pub nominal_voltage_code: u8,
    pub nominal_capacity_ah: f32,
    pub peukert_exponent: f32,
    pub charge_efficiency: f32,
}

impl From<&BatteryProfile> for BatteryConfigReport {
    fn from(profile: &BatteryProfile) -> Self {
        let (battery_type_code, chemistry_code) = match profile.chemistry {
            Chemistry::Fla => (1, 1),
            Chemistry::Gel => (1, 2),
            Chemistry::Agm => (1, 3),
            Chemistry::Lfp => (5, 5),
        };
        let nominal_voltage_code = match profile.system_voltage {
            SystemVoltage::V12 => 2,
            SystemVoltage::V24 => 3,
        };
        Self {
            chemistry: profile.chemistry,
            battery_type_code,
            chemistry_code,
            nominal_voltage_code,
            nominal_capacity_ah: profile.nominal_capacity_ah,
            peukert_exponent: profile.peukert_exponent,
            charge_efficiency: profile.charge_efficiency,
        }
    }
}

#[test]
fn test_disconnected_temperature_is_dropped() {
    assert_eq!(Sample::new(12.6, 1.0, TEMPERATURE_DISCONNECTED_C).temperature_c, None);
    assert_eq!(Sample::new(12.6, 1.0, f32::NAN).temperature_c, None);
    assert_eq!(Sample::new(12.6, 1.0, 21.5).temperature_c, Some(21.5));
}

#[test]
fn test_last_good_temperature_is_kept() {
    let profile = BatteryProfile::default();
    let mut state = BatteryState::new(&profile);
    assert_eq!(state.compensation_temperature_c(), None);

    state.observe(Sample::new(12.6, 0.0, 18.0));
    state.observe(Sample::new(12.6, 0.0, TEMPERATURE_DISCONNECTED_C));
    assert_eq!(state.compensation_temperature_c(), Some(18.0));
    assert_eq!(state.status().temperature_c, None);
}

#[test]
fn test_restore_clamps_learned_capacity() {
    let profile = BatteryProfile::default();
    let snapshot = BatterySnapshot {
        learned_capacity_ah: 900.0,
        soc_percent: 62.0,
        soh_percent: 100.0,
    };
    let state = BatteryState::restore(&profile, &snapshot);
    assert_eq!(state.learned_capacity_ah, 200.0);
    assert_eq!(state.persisted_soc_percent, Some(62.0));
    assert_eq!(state.soh_percent, 100.0);
    assert!(state.needs_ocv_seed);
}

#[test]
fn test_restore_ignores_garbage_values() {
    let profile = BatteryProfile::default();
    let snapshot = BatterySnapshot {
        learned_capacity_ah: f32::NAN,
        soc_percent: f32::INFINITY,
        soh_percent: 0.0,
    };
    let state = BatteryState::restore(&profile, &snapshot);
    assert_eq!(state.learned_capacity_ah, 100.0);
    assert_eq!(state.persisted_soc_percent, None);
}

#[test]
fn test_soh_is_clamped() {
    assert_eq!(soh_percent(150.0, 100.0), 100.0);
    assert_eq!(soh_percent(80.0, 100.0), 80.0);
}

#[test]
fn test_config_report_codes() {
    let report = BatteryConfigReport::from(&BatteryProfile::factory(Chemistry::Lfp));
    assert_eq!((report.battery_type_code, report.chemistry_code), (5, 5));
    assert_eq!(report.nominal_voltage_code, 2);
    assert_eq!(report.peukert_exponent, 1.05);

    let mut agm = BatteryProfile::factory(Chemistry::Agm);
    agm.system_voltage = SystemVoltage::V24;
    let report = BatteryConfigReport::from(&agm);
    assert_eq!((report.battery_type_code, report.chemistry_code), (1, 3));
    assert_eq!(report.nominal_voltage_code, 3);
}
