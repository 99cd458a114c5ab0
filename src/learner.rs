//! Capacity learning between full-charge events.
//!
//! Each time the battery reaches full, the charge that was taken out since the
//! previous full event is compared with the SoC drop over the same period.
//! Together they imply a capacity, which is blended into the learned capacity
//! with exponential smoothing and kept within the profile's guardrails.

use tracing::{debug, info};

use crate::battery_state::BatteryState;
use crate::config::{BatteryProfile, LearningGuardrails};

/// Where the battery stood at the previous full-charge event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastFullMarkers {
    pub soc_percent: f32,
    pub remaining_ah: f32,
}

impl LastFullMarkers {
    pub fn full(capacity_ah: f32) -> Self {
        Self {
            soc_percent: 100.0,
            remaining_ah: capacity_ah,
        }
    }
}

/// A SoC read from the settled rest voltage, paired with the coulomb-counted
/// charge at the same moment. Unlike the counted SoC it does not assume the
/// learned capacity is right, so it is what a full-charge event learns from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestAnchor {
    pub ocv_soc_percent: f32,
    pub remaining_ah: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearnOutcome {
    Accepted { candidate_ah: f32, learned_ah: f32 },
    /// Too little was discharged since the last full event to learn from
    ShallowCycle { delta_soc: f32 },
    /// The discharge figures did not imply a usable capacity
    InvalidCandidate { candidate_ah: f32 },
}

/// Clamp a capacity into the guardrail range around nominal.
pub fn clamp_capacity(capacity_ah: f32, nominal_capacity_ah: f32, guardrails: &LearningGuardrails) -> f32 {
    capacity_ah.clamp(
        guardrails.min_capacity_factor * nominal_capacity_ah,
        guardrails.max_capacity_factor * nominal_capacity_ah,
    )
}

/// Work out the learned capacity after a full-charge event, given the state
/// just before it. Does not touch any state.
pub fn evaluate(
    markers: &LastFullMarkers,
    soc_before: f32,
    remaining_ah_before: f32,
    learned_ah: f32,
    nominal_capacity_ah: f32,
    guardrails: &LearningGuardrails,
) -> LearnOutcome {
    let delta_soc = markers.soc_percent - soc_before;
    if delta_soc.is_nan() || delta_soc < guardrails.min_delta_soc_pct {
        return LearnOutcome::ShallowCycle { delta_soc };
    }

    let ah_discharged = markers.remaining_ah - remaining_ah_before;
    let candidate_ah = ah_discharged / (delta_soc / 100.0);
    if !candidate_ah.is_finite() || candidate_ah <= 0.0 {
        return LearnOutcome::InvalidCandidate { candidate_ah };
    }

    let alpha = guardrails.rate;
    let blended = (1.0 - alpha) * learned_ah + alpha * candidate_ah;
    LearnOutcome::Accepted {
        candidate_ah,
        learned_ah: clamp_capacity(blended, nominal_capacity_ah, guardrails),
    }
}

/// Apply a NotFull to Full transition: learn if the cycle qualifies, then
/// redefine the battery as 100% of the (possibly new) learned capacity.
///
/// The depth of the cycle comes from the latest rest anchor since the last
/// full event. Without one the counted SoC is used, which can only confirm
/// the current learned capacity.
pub fn on_full_charge(state: &mut BatteryState, profile: &BatteryProfile, battery: usize) -> LearnOutcome {
    let (soc_before, remaining_ah_before) = match state.rest_anchor.take() {
        Some(anchor) => (anchor.ocv_soc_percent, anchor.remaining_ah),
        None => (state.soc_percent, state.remaining_ah),
    };
    let outcome = evaluate(
        &state.last_full,
        soc_before,
        remaining_ah_before,
        state.learned_capacity_ah,
        profile.nominal_capacity_ah,
        &profile.learning,
    );

    match outcome {
        LearnOutcome::Accepted {
            candidate_ah,
            learned_ah,
        } => {
            info!(
                battery,
                previous_ah = state.learned_capacity_ah,
                candidate_ah,
                learned_ah,
                "learned new capacity"
            );
            state.learned_capacity_ah = learned_ah;
        }
        LearnOutcome::ShallowCycle { delta_soc } => {
            debug!(battery, delta_soc, "cycle too shallow to learn from");
        }
        LearnOutcome::InvalidCandidate { candidate_ah } => {
            debug!(battery, candidate_ah, "discarding implausible capacity candidate");
        }
    }

    state.last_full = LastFullMarkers::full(state.learned_capacity_ah);
    state.remaining_ah = state.learned_capacity_ah;
    state.soc_percent = 100.0;
    state.remaining_wh = state.sample.voltage_v * state.remaining_ah;
    state.refresh_percentages(profile);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f32, expected: f32, tolerance: f32) {
        assert!((actual - expected).abs() < tolerance, "expected {expected}, got {actual}");
    }

    #[test]
    fn test_deep_cycle_is_learned() {
        let markers = LastFullMarkers {
            soc_percent: 100.0,
            remaining_ah: 100.0,
        };
        let outcome = evaluate(&markers, 15.0, 20.0, 100.0, 100.0, &LearningGuardrails::default());
        match outcome {
            LearnOutcome::Accepted {
                candidate_ah,
                learned_ah,
            } => {
                assert_close(candidate_ah, 94.118, 0.01);
                assert_close(learned_ah, 99.706, 0.01);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shallow_cycle_is_ignored() {
        let markers = LastFullMarkers::full(100.0);
        let outcome = evaluate(&markers, 85.0, 80.0, 100.0, 100.0, &LearningGuardrails::default());
        assert_eq!(outcome, LearnOutcome::ShallowCycle { delta_soc: 15.0 });
    }

    #[test]
    fn test_candidate_is_clamped() {
        let guardrails = LearningGuardrails {
            rate: 1.0,
            ..LearningGuardrails::default()
        };
        let markers = LastFullMarkers::full(100.0);

        // 95Ah out of a 30% drop implies about 317Ah
        let high = evaluate(&markers, 70.0, 5.0, 100.0, 100.0, &guardrails);
        assert!(matches!(high, LearnOutcome::Accepted { learned_ah, .. } if learned_ah == 200.0));

        let low = evaluate(&markers, 0.0, 90.0, 100.0, 100.0, &guardrails);
        assert!(matches!(low, LearnOutcome::Accepted { learned_ah, .. } if learned_ah == 50.0));
    }

    #[test]
    fn test_negative_candidate_is_rejected() {
        let markers = LastFullMarkers::full(100.0);
        let outcome = evaluate(&markers, 50.0, 120.0, 100.0, 100.0, &LearningGuardrails::default());
        assert!(matches!(outcome, LearnOutcome::InvalidCandidate { .. }));
    }

    #[test]
    fn test_full_charge_resyncs_state() {
        let profile = BatteryProfile::default();
        let mut state = BatteryState::new(&profile);
        state.remaining_ah = 40.0;
        state.soc_percent = 40.0;

        let outcome = on_full_charge(&mut state, &profile, 0);
        assert!(matches!(outcome, LearnOutcome::Accepted { .. }));
        assert_close(state.learned_capacity_ah, 100.0, 1e-3);
        assert_eq!(state.soc_percent, 100.0);
        assert_eq!(state.remaining_ah, state.learned_capacity_ah);
        assert_eq!(state.last_full.soc_percent, 100.0);
        assert_eq!(state.last_full.remaining_ah, state.learned_capacity_ah);
    }

    #[test]
    fn test_rest_anchor_sets_cycle_depth() {
        let profile = BatteryProfile::default();
        let mut state = BatteryState::new(&profile);
        // 90Ah counted out while the rested voltage says 75% of the battery was used
        state.remaining_ah = 10.0;
        state.refresh_percentages(&profile);
        state.rest_anchor = Some(RestAnchor {
            ocv_soc_percent: 25.0,
            remaining_ah: 10.0,
        });

        match on_full_charge(&mut state, &profile, 0) {
            LearnOutcome::Accepted {
                candidate_ah,
                learned_ah,
            } => {
                assert_close(candidate_ah, 120.0, 0.01);
                assert_close(learned_ah, 101.0, 0.01);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.rest_anchor, None);
        assert_eq!(state.remaining_ah, state.learned_capacity_ah);
        assert_close(state.soh_percent, 100.0, 1e-3);
    }

    #[test]
    fn test_counted_soc_only_confirms_capacity() {
        let profile = BatteryProfile::default();
        let mut state = BatteryState::new(&profile);
        state.remaining_ah = 30.0;
        state.refresh_percentages(&profile);
        let outcome = on_full_charge(&mut state, &profile, 0);
        assert!(matches!(outcome, LearnOutcome::Accepted { candidate_ah, .. } if (candidate_ah - 100.0).abs() < 1e-3));
    }

    #[test]
    fn test_repeated_shallow_cycles_never_learn() {
        let profile = BatteryProfile::default();
        let mut state = BatteryState::new(&profile);
        for _ in 0..50 {
            state.remaining_ah -= 10.0;
            state.refresh_percentages(&profile);
            let outcome = on_full_charge(&mut state, &profile, 0);
            assert!(matches!(outcome, LearnOutcome::ShallowCycle { .. }));
            assert_eq!(state.learned_capacity_ah, 100.0);
        }
    }
}
