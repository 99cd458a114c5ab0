//! Debounced threshold detectors fed with smoothed voltage and current.

mod full;
mod rest;

pub use full::FullState;
pub use rest::RestState;

/// What a detector did on one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Entered,
    Left,
}

/// Milliseconds between two readings of a wrapping millisecond clock.
pub(crate) fn elapsed_ms(now_ms: u32, since_ms: u32) -> u32 {
    now_ms.wrapping_sub(since_ms)
}

fn hold_time_ms(hold_time_s: u32) -> u32 {
    hold_time_s.saturating_mul(1000)
}

fn transition(before: bool, after: bool) -> Transition {
    match (before, after) {
        (false, true) => Transition::Entered,
        (true, false) => Transition::Left,
        _ => Transition::Unchanged,
    }
}

#[test]
fn test_elapsed_survives_clock_wrap() {
    assert_eq!(elapsed_ms(500, 200), 300);
    assert_eq!(elapsed_ms(100, u32::MAX - 99), 200);
}
