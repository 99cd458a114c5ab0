//! Coulomb counting anchored by an open-circuit-voltage estimate at boot.

use tracing::info;

use crate::battery_state::BatteryState;
use crate::config::BatteryProfile;
use crate::ocv;

const MS_PER_HOUR: f32 = 3_600_000.0;

/// Discharge duration at which a battery's nominal capacity is rated (h)
const PEUKERT_RATED_HOURS: f32 = 20.0;

/// How the coulomb counter was seeded on the first update after boot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColdStart {
    /// The persisted SoC agreed with the OCV estimate and was kept
    Resumed { soc_percent: f32, ocv_soc_percent: f32 },
    /// The OCV estimate was used, either because nothing was persisted or
    /// because the persisted value disagreed too much
    FromOcv {
        soc_percent: f32,
        persisted_soc_percent: Option<f32>,
    },
}

impl ColdStart {
    pub fn soc_percent(&self) -> f32 {
        match *self {
            ColdStart::Resumed { soc_percent, .. } | ColdStart::FromOcv { soc_percent, .. } => soc_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimator {
    resume_tolerance_pct: f32,
}

impl Estimator {
    pub fn new(resume_tolerance_pct: f32) -> Self {
        Self { resume_tolerance_pct }
    }

    /// Advance one battery by `elapsed_ms` using the sample already stored in
    /// `state`. The first call with a usable sample seeds the counter and
    /// reports how.
    pub fn update(
        &self,
        state: &mut BatteryState,
        profile: &BatteryProfile,
        elapsed_ms: u32,
        battery: usize,
    ) -> Option<ColdStart> {
        let mut cold_start = None;
        if state.needs_ocv_seed {
            if !state.sample.is_finite() {
                return None;
            }
            cold_start = Some(self.resolve_cold_start(state, profile, battery));
        }

        integrate(state, profile, elapsed_ms);
        state.refresh_percentages(profile);
        cold_start
    }

    /// Pick between the persisted SoC and the OCV estimate, then seed
    /// `remaining_ah` and `remaining_wh` from the choice.
    pub fn resolve_cold_start(
        &self,
        state: &mut BatteryState,
        profile: &BatteryProfile,
        battery: usize,
    ) -> ColdStart {
        let ocv_soc = ocv::ocv_soc_percent(
            profile,
            state.sample.voltage_v,
            state.compensation_temperature_c(),
        );

        let outcome = match state.persisted_soc_percent.take() {
            Some(persisted) if (persisted - ocv_soc).abs() <= self.resume_tolerance_pct => ColdStart::Resumed {
                soc_percent: persisted,
                ocv_soc_percent: ocv_soc,
            },
            persisted => ColdStart::FromOcv {
                soc_percent: ocv_soc,
                persisted_soc_percent: persisted,
            },
        };

        match outcome {
            ColdStart::Resumed { soc_percent, ocv_soc_percent } => {
                info!(battery, soc_percent, ocv_soc_percent, "resuming persisted state of charge");
            }
            ColdStart::FromOcv {
                soc_percent,
                persisted_soc_percent,
            } => {
                info!(battery, soc_percent, ?persisted_soc_percent, "seeding state of charge from open-circuit voltage");
            }
        }

        state.soc_percent = outcome.soc_percent();
        state.remaining_ah = outcome.soc_percent() / 100.0 * state.learned_capacity_ah;
        state.remaining_wh = state.sample.voltage_v * state.remaining_ah;
        state.needs_ocv_seed = false;
        outcome
    }
}

/// Integrate current and power over `elapsed_ms`, keeping the totals in range.
pub fn integrate(state: &mut BatteryState, profile: &BatteryProfile, elapsed_ms: u32) {
    let sample = state.sample;
    if !sample.is_finite() {
        return;
    }

    let dt_hours = elapsed_ms as f32 / MS_PER_HOUR;
    let current = if profile.apply_peukert {
        peukert_current(sample.current_a, profile)
    } else {
        sample.current_a
    };

    state.remaining_ah = (state.remaining_ah - current * dt_hours).clamp(0.0, state.learned_capacity_ah);
    state.remaining_wh = (state.remaining_wh - sample.voltage_v * current * dt_hours).max(0.0);
}

/// Discharge current scaled up by the Peukert law relative to the 20h rate.
/// Charging current passes through unchanged.
pub fn peukert_current(current_a: f32, profile: &BatteryProfile) -> f32 {
    if current_a <= 0.0 {
        return current_a;
    }
    let rated_a = profile.nominal_capacity_ah / PEUKERT_RATED_HOURS;
    current_a * (current_a / rated_a).powf(profile.peukert_exponent - 1.0)
}
