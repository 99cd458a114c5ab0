//! Open-circuit-voltage curves and temperature compensation.
//!
//! Every curve is expressed at 12V reference. A 24V measurement is halved
//! before lookup.

use crate::config::{BatteryProfile, Chemistry, SystemVoltage};

/// Temperature at which the OCV curves were characterised (°C)
pub const REFERENCE_TEMPERATURE_C: f32 = 25.0;

/// Interpolation spans narrower than this are treated as a single point (V)
const DEGENERATE_SPAN_V: f32 = 1e-6;

/// One point of an OCV curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcvPoint {
    pub soc_percent: f32,
    pub voltage: f32,
}

const fn pt(soc_percent: f32, voltage: f32) -> OcvPoint {
    OcvPoint { soc_percent, voltage }
}

pub const OCV_FLA_12V: &[OcvPoint] = &[
    pt(10.0, 11.51), pt(20.0, 11.66), pt(30.0, 11.81), pt(40.0, 11.96), pt(50.0, 12.10),
    pt(60.0, 12.24), pt(70.0, 12.37), pt(80.0, 12.50), pt(90.0, 12.62), pt(100.0, 12.73),
];

pub const OCV_AGM_12V: &[OcvPoint] = &[
    pt(10.0, 11.60), pt(20.0, 11.78), pt(30.0, 11.95), pt(40.0, 12.10), pt(50.0, 12.20),
    pt(60.0, 12.32), pt(70.0, 12.45), pt(80.0, 12.60), pt(90.0, 12.75), pt(100.0, 12.85),
];

pub const OCV_GEL_12V: &[OcvPoint] = &[
    pt(10.0, 11.60), pt(20.0, 11.80), pt(30.0, 11.96), pt(40.0, 12.12), pt(50.0, 12.24),
    pt(60.0, 12.36), pt(70.0, 12.48), pt(80.0, 12.62), pt(90.0, 12.78), pt(100.0, 12.90),
];

pub const OCV_LFP_12V: &[OcvPoint] = &[
    pt(0.0, 12.00), pt(10.0, 12.90), pt(20.0, 13.00), pt(30.0, 13.10), pt(40.0, 13.15),
    pt(50.0, 13.20), pt(60.0, 13.25), pt(70.0, 13.30), pt(80.0, 13.35), pt(90.0, 13.45),
    pt(100.0, 13.60),
];

impl Chemistry {
    pub fn ocv_table(self) -> &'static [OcvPoint] {
        match self {
            Chemistry::Fla => OCV_FLA_12V,
            Chemistry::Agm => OCV_AGM_12V,
            Chemistry::Gel => OCV_GEL_12V,
            Chemistry::Lfp => OCV_LFP_12V,
        }
    }
}

/// Look up the SoC for a measured open-circuit voltage.
///
/// Voltages at or beyond either end of the table resolve to that end's SoC.
pub fn soc_from_voltage(voltage: f32, table: &[OcvPoint], system_voltage: SystemVoltage) -> f32 {
    let (Some(first), Some(last)) = (table.first(), table.last()) else {
        return 0.0;
    };

    let v12 = voltage / system_voltage.multiplier();
    if v12 <= first.voltage {
        return first.soc_percent;
    }
    if v12 >= last.voltage {
        return last.soc_percent;
    }

    table
        .windows(2)
        .find(|pair| v12 <= pair[1].voltage)
        .map(|pair| interpolate(v12, pair[0], pair[1]))
        .unwrap_or(last.soc_percent)
}

fn interpolate(v: f32, lo: OcvPoint, hi: OcvPoint) -> f32 {
    let span = hi.voltage - lo.voltage;
    if span.abs() < DEGENERATE_SPAN_V {
        return lo.soc_percent;
    }
    let t = (v - lo.voltage) / span;
    lo.soc_percent + t * (hi.soc_percent - lo.soc_percent)
}

/// Shift a measured voltage back to what it would read at 25°C.
pub fn compensate_for_temperature(voltage: f32, temperature_c: f32, coefficient_v_per_c: f32) -> f32 {
    voltage - coefficient_v_per_c * (temperature_c - REFERENCE_TEMPERATURE_C)
}

/// Temperature-compensated OCV SoC for a battery, clamped to 0..=100.
///
/// Without a usable temperature the voltage is looked up uncompensated.
pub fn ocv_soc_percent(profile: &BatteryProfile, voltage: f32, temperature_c: Option<f32>) -> f32 {
    let adjusted = match temperature_c {
        Some(t) => compensate_for_temperature(voltage, t, profile.temp_coefficient_v_per_c),
        None => voltage,
    };
    soc_from_voltage(adjusted, profile.chemistry.ocv_table(), profile.system_voltage).clamp(0.0, 100.0)
}
