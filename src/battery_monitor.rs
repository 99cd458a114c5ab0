use thiserror::Error;
use tracing::{info, warn};

use crate::battery_state::{BatteryConfigReport, BatteryState, BatteryStatus, Sample};
use crate::config::{ConfigError, MonitorConfig};
use crate::detector::{elapsed_ms, Transition};
use crate::estimator::{ColdStart, Estimator};
use crate::fault::FaultFlags;
use crate::learner::{self, LearnOutcome, RestAnchor};
use crate::ocv;
use crate::persistence::{BatterySnapshot, Eeprom, PersistenceManager, SaveReceipt, StorageError};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Something that happened to one battery during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryEvent {
    pub battery: usize,
    pub kind: BatteryEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatteryEventKind {
    ColdStart(ColdStart),
    RestEntered { voltage_v: f32 },
    RestLeft,
    FullReached(LearnOutcome),
    FullLeft,
    FaultsChanged(FaultFlags),
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub events: Vec<BatteryEvent>,
    /// Set when this tick wrote a periodic save
    pub saved: Option<SaveReceipt>,
}

/// Owns the state of every configured battery and the slot store, and runs
/// one control tick at a time.
pub struct BatteryMonitor<E: Eeprom> {
    config: MonitorConfig,
    estimator: Estimator,
    states: Vec<BatteryState>,
    persistence: PersistenceManager<E>,
    last_tick_ms: u32,
    last_save_ms: u32,
}

impl<E: Eeprom> BatteryMonitor<E> {
    /// Validate `config`, read the newest persisted record from `store` and
    /// restore each battery from it. `now_ms` is the clock at startup.
    pub fn start(config: MonitorConfig, store: E, now_ms: u32) -> Result<Self, MonitorError> {
        config.validate()?;

        let mut persistence = PersistenceManager::new(store, &config.storage)?;
        let record = persistence.load()?;

        let states = config
            .batteries
            .iter()
            .enumerate()
            .map(|(battery, profile)| match &record {
                Some(record) => BatteryState::restore(profile, &record.batteries[battery]),
                None => BatteryState::new(profile),
            })
            .collect();

        Ok(Self {
            estimator: Estimator::new(config.soc_resume_tolerance_pct),
            config,
            states,
            persistence,
            last_tick_ms: now_ms,
            last_save_ms: now_ms,
        })
    }

    /// Feed one sample per battery, in configuration order. Samples past the
    /// configured batteries are ignored; a battery without a sample keeps its
    /// estimate for this tick.
    pub fn tick(&mut self, now_ms: u32, samples: &[Sample]) -> TickReport {
        let elapsed = elapsed_ms(now_ms, self.last_tick_ms);
        self.last_tick_ms = now_ms;

        let mut report = TickReport::default();
        for (battery, sample) in samples.iter().enumerate().take(self.states.len()) {
            self.update_battery(battery, *sample, now_ms, elapsed, &mut report.events);
        }

        // Nothing worth keeping until every battery has been seeded
        let seeded = self.states.iter().all(|state| !state.needs_ocv_seed);
        if seeded && elapsed_ms(now_ms, self.last_save_ms) >= self.config.save_interval_ms {
            self.last_save_ms = now_ms;
            match self.save_now() {
                Ok(receipt) => report.saved = Some(receipt),
                Err(err) => warn!(%err, "periodic save failed"),
            }
        }

        report
    }

    fn update_battery(
        &mut self,
        battery: usize,
        sample: Sample,
        now_ms: u32,
        elapsed: u32,
        events: &mut Vec<BatteryEvent>,
    ) {
        let profile = &self.config.batteries[battery];
        let state = &mut self.states[battery];
        let mut push = |kind| events.push(BatteryEvent { battery, kind });

        state.observe(sample);

        let faults = FaultFlags::evaluate(profile, &state.sample);
        if faults != state.faults {
            if faults.any() {
                warn!(battery, ?faults, "fault flags changed");
            } else {
                info!(battery, "faults cleared");
            }
            state.faults = faults;
            push(BatteryEventKind::FaultsChanged(faults));
        }

        if let Some(cold_start) = self.estimator.update(state, profile, elapsed, battery) {
            push(BatteryEventKind::ColdStart(cold_start));
        }

        let (voltage, current) = (state.sample.voltage_v, state.sample.current_a);

        match state.rest.update(&profile.rest, voltage, current, now_ms) {
            Transition::Entered => {
                info!(battery, voltage, "battery at rest");
                push(BatteryEventKind::RestEntered { voltage_v: voltage });
            }
            Transition::Left => {
                info!(battery, current, "battery no longer at rest");
                push(BatteryEventKind::RestLeft);
            }
            Transition::Unchanged => {}
        }
        if state.rest.resting {
            state.rest_anchor = Some(RestAnchor {
                ocv_soc_percent: ocv::ocv_soc_percent(
                    profile,
                    state.rest.last_rest_voltage,
                    state.compensation_temperature_c(),
                ),
                remaining_ah: state.remaining_ah,
            });
        }

        match state
            .full
            .update(&profile.full, profile.system_voltage, voltage, current, now_ms)
        {
            Transition::Entered => {
                info!(battery, voltage, current, soc_percent = state.soc_percent, "battery full");
                let outcome = learner::on_full_charge(state, profile, battery);
                push(BatteryEventKind::FullReached(outcome));
            }
            Transition::Left => {
                info!(battery, "battery left full charge");
                push(BatteryEventKind::FullLeft);
            }
            Transition::Unchanged => {}
        }
    }

    /// Write a snapshot of every battery now, regardless of the save interval.
    pub fn save_now(&mut self) -> Result<SaveReceipt, StorageError> {
        let mut batteries = [BatterySnapshot::default(); 2];
        for (snapshot, state) in batteries.iter_mut().zip(&self.states) {
            *snapshot = state.snapshot();
        }

        let receipt = self.persistence.save(batteries)?;
        info!(slot = receipt.slot, sequence = receipt.sequence, "saved battery state");
        Ok(receipt)
    }

    pub fn battery_count(&self) -> usize {
        self.states.len()
    }

    pub fn status(&self, battery: usize) -> Option<BatteryStatus> {
        self.states.get(battery).map(BatteryState::status)
    }

    pub fn statuses(&self) -> Vec<BatteryStatus> {
        self.states.iter().map(BatteryState::status).collect()
    }

    pub fn config_report(&self, battery: usize) -> Option<BatteryConfigReport> {
        self.config.batteries.get(battery).map(BatteryConfigReport::from)
    }

    /// SoC implied by the settled rest voltage, while the battery is resting.
    /// Diagnostic only, the estimate itself is not touched.
    pub fn rest_ocv_soc_percent(&self, battery: usize) -> Option<f32> {
        let state = self.states.get(battery)?;
        if !state.rest.resting {
            return None;
        }
        let profile = &self.config.batteries[battery];
        Some(ocv::ocv_soc_percent(
            profile,
            state.rest.last_rest_voltage,
            state.compensation_temperature_c(),
        ))
    }

    pub fn state(&self, battery: usize) -> Option<&BatteryState> {
        self.states.get(battery)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn persistence(&self) -> &PersistenceManager<E> {
        &self.persistence
    }

    pub fn into_store(self) -> E {
        self.persistence.into_inner()
    }
}
