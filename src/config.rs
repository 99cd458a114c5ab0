use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::{ChecksumKind, SLOT_SIZE};

/// Battery chemistry, selecting the open-circuit-voltage curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Chemistry {
    /// Flooded lead-acid
    Fla,
    /// Absorbent glass mat lead-acid
    Agm,
    /// Gel lead-acid
    Gel,
    /// Lithium iron phosphate
    Lfp,
}

/// Nominal system voltage. Every voltage threshold in a [`BatteryProfile`] is
/// given at 12V reference and scaled by [`SystemVoltage::multiplier`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SystemVoltage {
    #[default]
    #[serde(rename = "12v")]
    V12,
    #[serde(rename = "24v")]
    V24,
}

impl SystemVoltage {
    pub fn multiplier(self) -> f32 {
        match self {
            SystemVoltage::V12 => 1.0,
            SystemVoltage::V24 => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RestThresholds {
    /// Current magnitude below which the battery may be resting (A)
    pub current_a: f32,
    /// Allowed voltage wander around the reference voltage (mV)
    pub stability_mv: f32,
    /// How long both conditions must hold (s)
    pub hold_time_s: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct FullThresholds {
    /// Absorb setpoint at 12V reference (V)
    pub absorb_v: f32,
    /// Tail current magnitude at or below which charging has tapered off (A)
    pub tail_current_a: f32,
    /// How long both conditions must hold (s)
    pub hold_time_s: u32,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LearningGuardrails {
    /// Minimum depth of discharge between full charges before a cycle is learned from (%)
    pub min_delta_soc_pct: f32,
    pub min_capacity_factor: f32,
    pub max_capacity_factor: f32,
    /// Exponential smoothing weight given to each new capacity candidate
    pub rate: f32,
}

impl Default for LearningGuardrails {
    fn default() -> Self {
        Self {
            min_delta_soc_pct: 20.0,
            min_capacity_factor: 0.5,
            max_capacity_factor: 2.0,
            rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct FaultThresholds {
    pub voltage_min_12v: f32,
    pub voltage_max_12v: f32,
    pub current_max_a: f32,
    pub temperature_max_c: f32,
}

/// Immutable description of one battery.
///
/// In a config file only `chemistry` is required. Every other field, nested
/// threshold fields included, falls back to [`BatteryProfile::factory`] for
/// that chemistry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "ProfileFile")]
pub struct BatteryProfile {
    pub chemistry: Chemistry,
    pub nominal_capacity_ah: f32,
    pub system_voltage: SystemVoltage,
    pub peukert_exponent: f32,
    /// Scale discharge current by the Peukert law during coulomb counting.
    /// When false the exponent is only reported.
    pub apply_peukert: bool,
    pub charge_efficiency: f32,
    /// OCV temperature coefficient (V/°C)
    pub temp_coefficient_v_per_c: f32,
    pub rest: RestThresholds,
    pub full: FullThresholds,
    pub learning: LearningGuardrails,
    pub faults: FaultThresholds,
}

impl BatteryProfile {
    /// Factory settings for a 100Ah battery of the given chemistry.
    pub fn factory(chemistry: Chemistry) -> Self {
        let rest = RestThresholds {
            current_a: 2.0,
            stability_mv: 20.0,
            hold_time_s: 1800,
        };

        match chemistry {
            Chemistry::Lfp => Self {
                chemistry,
                nominal_capacity_ah: 100.0,
                system_voltage: SystemVoltage::V12,
                peukert_exponent: 1.05,
                apply_peukert: false,
                charge_efficiency: 0.96,
                temp_coefficient_v_per_c: 0.0,
                rest,
                full: FullThresholds {
                    absorb_v: 13.6,
                    tail_current_a: 2.0,
                    hold_time_s: 600,
                },
                learning: LearningGuardrails::default(),
                faults: FaultThresholds {
                    voltage_min_12v: 11.0,
                    voltage_max_12v: 14.6,
                    current_max_a: 150.0,
                    temperature_max_c: 55.0,
                },
            },
            Chemistry::Fla | Chemistry::Agm | Chemistry::Gel => Self {
                chemistry,
                nominal_capacity_ah: 100.0,
                system_voltage: SystemVoltage::V12,
                peukert_exponent: 1.10,
                apply_peukert: false,
                charge_efficiency: 0.95,
                temp_coefficient_v_per_c: -0.030,
                rest,
                full: FullThresholds {
                    absorb_v: 14.4,
                    tail_current_a: 4.0,
                    hold_time_s: 900,
                },
                learning: LearningGuardrails::default(),
                faults: FaultThresholds {
                    voltage_min_12v: 10.5,
                    voltage_max_12v: 15.0,
                    current_max_a: 180.0,
                    temperature_max_c: 60.0,
                },
            },
        }
    }

    /// Learned capacity bounds in Ah.
    pub fn capacity_bounds_ah(&self) -> (f32, f32) {
        (
            self.learning.min_capacity_factor * self.nominal_capacity_ah,
            self.learning.max_capacity_factor * self.nominal_capacity_ah,
        )
    }

    fn validate(&self, battery: usize) -> Result<(), ConfigError> {
        let check = |field: &'static str, expected: &'static str, value: f32, ok: bool| {
            if ok && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    battery,
                    field,
                    expected,
                    value,
                })
            }
        };

        let cap = self.nominal_capacity_ah;
        check("nominal_capacity_ah", "> 0", cap, cap > 0.0)?;
        let k = self.peukert_exponent;
        check("peukert_exponent", ">= 1", k, k >= 1.0)?;
        let eff = self.charge_efficiency;
        check("charge_efficiency", "in (0, 1]", eff, eff > 0.0 && eff <= 1.0)?;
        let coef = self.temp_coefficient_v_per_c;
        check("temp_coefficient_v_per_c", "finite", coef, true)?;

        let rest = &self.rest;
        check("rest.current_a", ">= 0", rest.current_a, rest.current_a >= 0.0)?;
        check("rest.stability_mv", ">= 0", rest.stability_mv, rest.stability_mv >= 0.0)?;

        let full = &self.full;
        check("full.absorb_v", "> 0", full.absorb_v, full.absorb_v > 0.0)?;
        check("full.tail_current_a", ">= 0", full.tail_current_a, full.tail_current_a >= 0.0)?;

        let learn = &self.learning;
        check(
            "learning.min_delta_soc_pct",
            "in (0, 100]",
            learn.min_delta_soc_pct,
            learn.min_delta_soc_pct > 0.0 && learn.min_delta_soc_pct <= 100.0,
        )?;
        check(
            "learning.min_capacity_factor",
            "> 0",
            learn.min_capacity_factor,
            learn.min_capacity_factor > 0.0,
        )?;
        check(
            "learning.max_capacity_factor",
            ">= min_capacity_factor",
            learn.max_capacity_factor,
            learn.max_capacity_factor >= learn.min_capacity_factor,
        )?;
        check("learning.rate", "in [0, 1]", learn.rate, (0.0..=1.0).contains(&learn.rate))?;

        let faults = &self.faults;
        check(
            "faults.voltage_max_12v",
            "> voltage_min_12v",
            faults.voltage_max_12v,
            faults.voltage_max_12v > faults.voltage_min_12v,
        )?;
        check("faults.current_max_a", "> 0", faults.current_max_a, faults.current_max_a > 0.0)?;
        check("faults.temperature_max_c", "finite", faults.temperature_max_c, true)?;

        Ok(())
    }
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self::factory(Chemistry::Fla)
    }
}

/// A profile as written in a config file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    chemistry: Chemistry,
    nominal_capacity_ah: Option<f32>,
    system_voltage: Option<SystemVoltage>,
    peukert_exponent: Option<f32>,
    apply_peukert: Option<bool>,
    charge_efficiency: Option<f32>,
    temp_coefficient_v_per_c: Option<f32>,
    #[serde(default)]
    rest: RestFile,
    #[serde(default)]
    full: FullFile,
    #[serde(default)]
    learning: LearningFile,
    #[serde(default)]
    faults: FaultFile,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RestFile {
    current_a: Option<f32>,
    stability_mv: Option<f32>,
    hold_time_s: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FullFile {
    absorb_v: Option<f32>,
    tail_current_a: Option<f32>,
    hold_time_s: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LearningFile {
    min_delta_soc_pct: Option<f32>,
    min_capacity_factor: Option<f32>,
    max_capacity_factor: Option<f32>,
    rate: Option<f32>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FaultFile {
    voltage_min_12v: Option<f32>,
    voltage_max_12v: Option<f32>,
    current_max_a: Option<f32>,
    temperature_max_c: Option<f32>,
}

impl From<ProfileFile> for BatteryProfile {
    fn from(file: ProfileFile) -> Self {
        let base = BatteryProfile::factory(file.chemistry);
        Self {
            chemistry: file.chemistry,
            nominal_capacity_ah: file.nominal_capacity_ah.unwrap_or(base.nominal_capacity_ah),
            system_voltage: file.system_voltage.unwrap_or(base.system_voltage),
            peukert_exponent: file.peukert_exponent.unwrap_or(base.peukert_exponent),
            apply_peukert: file.apply_peukert.unwrap_or(base.apply_peukert),
            charge_efficiency: file.charge_efficiency.unwrap_or(base.charge_efficiency),
            temp_coefficient_v_per_c: file.temp_coefficient_v_per_c.unwrap_or(base.temp_coefficient_v_per_c),
            rest: RestThresholds {
                current_a: file.rest.current_a.unwrap_or(base.rest.current_a),
                stability_mv: file.rest.stability_mv.unwrap_or(base.rest.stability_mv),
                hold_time_s: file.rest.hold_time_s.unwrap_or(base.rest.hold_time_s),
            },
            full: FullThresholds {
                absorb_v: file.full.absorb_v.unwrap_or(base.full.absorb_v),
                tail_current_a: file.full.tail_current_a.unwrap_or(base.full.tail_current_a),
                hold_time_s: file.full.hold_time_s.unwrap_or(base.full.hold_time_s),
            },
            learning: LearningGuardrails {
                min_delta_soc_pct: file.learning.min_delta_soc_pct.unwrap_or(base.learning.min_delta_soc_pct),
                min_capacity_factor: file.learning.min_capacity_factor.unwrap_or(base.learning.min_capacity_factor),
                max_capacity_factor: file.learning.max_capacity_factor.unwrap_or(base.learning.max_capacity_factor),
                rate: file.learning.rate.unwrap_or(base.learning.rate),
            },
            faults: FaultThresholds {
                voltage_min_12v: file.faults.voltage_min_12v.unwrap_or(base.faults.voltage_min_12v),
                voltage_max_12v: file.faults.voltage_max_12v.unwrap_or(base.faults.voltage_max_12v),
                current_max_a: file.faults.current_max_a.unwrap_or(base.faults.current_max_a),
                temperature_max_c: file.faults.temperature_max_c.unwrap_or(base.faults.temperature_max_c),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub num_slots: u16,
    pub base_address: usize,
    pub checksum: ChecksumKind,
}

impl StorageConfig {
    /// Bytes from address 0 to the end of the last slot, `None` if that does
    /// not fit in the address space.
    pub fn required_bytes(&self) -> Option<usize> {
        (self.num_slots as usize)
            .checked_mul(SLOT_SIZE)?
            .checked_add(self.base_address)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            num_slots: 16,
            base_address: 0,
            checksum: ChecksumKind::default(),
        }
    }
}

/// Everything the monitor needs at startup. Never reloaded at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub batteries: Vec<BatteryProfile>,
    pub storage: StorageConfig,
    pub save_interval_ms: u32,
    /// Largest disagreement between a persisted SoC and the OCV estimate at
    /// which the persisted value is still trusted (%)
    pub soc_resume_tolerance_pct: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            batteries: vec![
                BatteryProfile::factory(Chemistry::Fla),
                BatteryProfile::factory(Chemistry::Lfp),
            ],
            storage: StorageConfig::default(),
            save_interval_ms: 60_000,
            soc_resume_tolerance_pct: 10.0,
        }
    }
}

/// The persisted record has room for exactly two batteries.
pub const MAX_BATTERIES: usize = 2;

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse monitor config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batteries.is_empty() || self.batteries.len() > MAX_BATTERIES {
            return Err(ConfigError::BatteryCount(self.batteries.len()));
        }
        for (battery, profile) in self.batteries.iter().enumerate() {
            profile.validate(battery)?;
        }

        if self.storage.num_slots == 0 {
            return Err(ConfigError::NoSlots);
        }
        // Newest-slot selection compares sequence numbers as a signed 16-bit
        // difference, so every live slot must sit within half the counter range.
        if self.storage.num_slots > i16::MAX as u16 {
            return Err(ConfigError::TooManySlots(self.storage.num_slots));
        }
        if self.storage.required_bytes().is_none() {
            return Err(ConfigError::StorageOverflow {
                base_address: self.storage.base_address,
                num_slots: self.storage.num_slots,
            });
        }
        if self.save_interval_ms == 0 {
            return Err(ConfigError::SaveInterval);
        }
        let tol = self.soc_resume_tolerance_pct;
        if !tol.is_finite() || tol < 0.0 {
            return Err(ConfigError::ResumeTolerance(tol));
        }

        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("expected one or two batteries, got {0}")]
    BatteryCount(usize),
    #[error("battery {battery}: {field} must be {expected}, got {value}")]
    OutOfRange {
        battery: usize,
        field: &'static str,
        expected: &'static str,
        value: f32,
    },
    #[error("storage needs at least one slot")]
    NoSlots,
    #[error("{0} slots is more than a 16-bit sequence can order")]
    TooManySlots(u16),
    #[error("{num_slots} slots from address {base_address} run past the end of the address space")]
    StorageOverflow { base_address: usize, num_slots: u16 },
    #[error("save interval must be positive")]
    SaveInterval,
    #[error("SoC resume tolerance must be a non-negative number, got {0}")]
    ResumeTolerance(f32),
}

#[test]
fn test_default_config_is_valid() {
    let config = MonitorConfig::default();
    assert_eq!(config.validate(), Ok(()));
    assert_eq!(config.batteries[0].chemistry, Chemistry::Fla);
    assert_eq!(config.batteries[1].chemistry, Chemistry::Lfp);
    assert_eq!(config.storage.num_slots, 16);
}

#[test]
fn test_partial_json_takes_defaults() {
    let json = r#"{
        "batteries": [
            { "chemistry": "agm", "nominal_capacity_ah": 220.0, "system_voltage": "24v" }
        ],
        "save_interval_ms": 30000
    }"#;
    let config = MonitorConfig::from_json_str(json).unwrap();
    assert_eq!(config.batteries.len(), 1);
    let profile = &config.batteries[0];
    assert_eq!(profile.chemistry, Chemistry::Agm);
    assert_eq!(profile.system_voltage.multiplier(), 2.0);
    assert_eq!(profile.nominal_capacity_ah, 220.0);
    assert_eq!(profile.full.absorb_v, 14.4);
    assert_eq!(config.save_interval_ms, 30_000);
    assert_eq!(config.soc_resume_tolerance_pct, 10.0);
}

#[test]
fn test_rejects_three_batteries() {
    let mut config = MonitorConfig::default();
    config.batteries.push(BatteryProfile::default());
    assert_eq!(config.validate(), Err(ConfigError::BatteryCount(3)));
}

#[test]
fn test_rejects_inverted_capacity_clamp() {
    let mut config = MonitorConfig::default();
    config.batteries[1].learning.min_capacity_factor = 1.5;
    config.batteries[1].learning.max_capacity_factor = 1.0;
    match config.validate() {
        Err(ConfigError::OutOfRange { battery, field, .. }) => {
            assert_eq!(battery, 1);
            assert_eq!(field, "learning.max_capacity_factor");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_rejects_zero_capacity_and_zero_slots() {
    let mut config = MonitorConfig::default();
    config.batteries[0].nominal_capacity_ah = 0.0;
    assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "nominal_capacity_ah", .. })));

    let mut config = MonitorConfig::default();
    config.storage.num_slots = 0;
    assert_eq!(config.validate(), Err(ConfigError::NoSlots));
}

#[test]
fn test_omitted_fields_follow_chemistry() {
    let config = MonitorConfig::from_json_str(r#"{ "batteries": [ { "chemistry": "fla" }, { "chemistry": "lfp" } ] }"#)
        .unwrap();
    assert_eq!(config.batteries[0], BatteryProfile::factory(Chemistry::Fla));
    assert_eq!(config.batteries[1], BatteryProfile::factory(Chemistry::Lfp));
    assert_eq!(config.batteries[1].temp_coefficient_v_per_c, 0.0);
    assert_eq!(config.batteries[1].full.absorb_v, 13.6);
}

#[test]
fn test_partial_nested_thresholds() {
    let json = r#"{
        "batteries": [
            { "chemistry": "lfp", "full": { "absorb_v": 14.2 }, "learning": { "rate": 0.1 } }
        ]
    }"#;
    let profile = &MonitorConfig::from_json_str(json).unwrap().batteries[0];
    let factory = BatteryProfile::factory(Chemistry::Lfp);
    assert_eq!(profile.full.absorb_v, 14.2);
    assert_eq!(profile.full.tail_current_a, factory.full.tail_current_a);
    assert_eq!(profile.full.hold_time_s, factory.full.hold_time_s);
    assert_eq!(profile.learning.rate, 0.1);
    assert_eq!(profile.learning.min_delta_soc_pct, factory.learning.min_delta_soc_pct);
    assert_eq!(profile.rest, factory.rest);
}

#[test]
fn test_profile_needs_chemistry() {
    assert!(MonitorConfig::from_json_str(r#"{ "batteries": [ { "nominal_capacity_ah": 200.0 } ] }"#).is_err());
    assert!(MonitorConfig::from_json_str(r#"{ "batteries": [ { "chemistry": "agm", "absorb_v": 14.2 } ] }"#).is_err());
}

#[test]
fn test_serialized_profile_reads_back() {
    let mut profile = BatteryProfile::factory(Chemistry::Gel);
    profile.system_voltage = SystemVoltage::V24;
    profile.full.absorb_v = 14.1;
    let json = serde_json::to_string(&profile).unwrap();
    assert_eq!(serde_json::from_str::<BatteryProfile>(&json).unwrap(), profile);
}

#[test]
fn test_storage_past_address_space() {
    let mut config = MonitorConfig::default();
    config.storage.base_address = usize::MAX;
    assert_eq!(
        config.validate(),
        Err(ConfigError::StorageOverflow {
            base_address: usize::MAX,
            num_slots: 16
        })
    );
    assert_eq!(config.storage.required_bytes(), None);
    assert_eq!(StorageConfig::default().required_bytes(), Some(16 * SLOT_SIZE));
}

#[test]
fn test_unknown_chemistry_is_rejected() {
    let json = r#"{ "batteries": [ { "chemistry": "nimh" } ] }"#;
    assert!(MonitorConfig::from_json_str(json).is_err());
}
