//! Estimate state of charge and state of health for one or two batteries
//!
//! Samples of smoothed voltage, current and temperature are fed in once per control tick. For each battery
//! the crate keeps:
//!
//! - State of charge (%), from coulomb counting seeded by an open-circuit-voltage lookup at boot
//! - Remaining capacity (Ah) and energy (Wh)
//! - State of health (%), from a capacity learned between full-charge events
//! - Rest and full-charge detection
//! - Fault flags against the battery's operating limits
//!
//! Flooded, AGM and gel lead-acid batteries and LiFePO4 batteries are supported, at 12v or 24v.
//!
//! The learned capacity, SoC and SoH are periodically written to a small EEPROM-like store. Saves rotate through
//! a ring of 28 byte slots so the wear is spread out, and each slot is checksummed so a torn write is detected and
//! the previous record used instead.
//!
//! # Example
//!
//! ```rust
//! use battgauge::{BatteryMonitor, MemoryEeprom, MonitorConfig, Sample, SLOT_SIZE};
//!
//! let config = MonitorConfig::default();
//! let store = MemoryEeprom::new(config.storage.num_slots as usize * SLOT_SIZE);
//! let mut monitor = BatteryMonitor::start(config, store, 0)?;
//!
//! // A flooded battery resting at 12.10v and a LiFePO4 battery resting at 13.10v
//! monitor.tick(0, &[Sample::new(12.10, 0.0, 25.0), Sample::new(13.10, 0.0, 25.0)]);
//!
//! let soc: Vec<f32> = monitor.statuses().iter().map(|s| s.soc_percent).collect();
//! assert!((soc[0] - 50.0).abs() < 0.01);
//! assert!((soc[1] - 30.0).abs() < 0.01);
//! # Ok::<(), battgauge::MonitorError>(())
//! ```

mod battery_monitor;
mod battery_state;
mod config;
mod detector;
mod estimator;
mod fault;
mod learner;
pub mod ocv;
pub mod persistence;
pub mod replay;

pub use battery_monitor::{BatteryEvent, BatteryEventKind, BatteryMonitor, MonitorError, TickReport};
pub use battery_state::{BatteryConfigReport, BatteryState, BatteryStatus, Sample, TEMPERATURE_DISCONNECTED_C};
pub use config::{
    BatteryProfile, Chemistry, ConfigError, FaultThresholds, FullThresholds, LearningGuardrails, MonitorConfig,
    RestThresholds, StorageConfig, SystemVoltage, MAX_BATTERIES,
};
pub use detector::{FullState, RestState, Transition};
pub use estimator::{ColdStart, Estimator};
pub use fault::FaultFlags;
pub use learner::{LastFullMarkers, LearnOutcome, RestAnchor};
pub use persistence::{ChecksumKind, Eeprom, FileEeprom, MemoryEeprom, StorageError, SLOT_SIZE};
