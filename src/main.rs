use std::path::PathBuf;

use anyhow::Context;
use battgauge::replay::{self, Reading};
use battgauge::{BatteryMonitor, Eeprom, FileEeprom, MonitorConfig};
use clap::Parser;
use futures_util::{pin_mut, Stream, StreamExt};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Replay recorded battery samples through the estimator, persisting to a file-backed slot store
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON monitor configuration, factory defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Slot store image, created erased if missing
    #[arg(long)]
    store: PathBuf,

    /// CSV samples `timestamp_ms,v1,i1,t1[,v2,i2,t2]`, stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// How often to log battery status, in sample time
    #[arg(long, default_value_t = 60_000)]
    status_interval_ms: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MonitorConfig::from_json_file(path)?,
        None => MonitorConfig::default(),
    };

    let store_size = config
        .storage
        .required_bytes()
        .context("slot area does not fit in the address space")?;
    let store = FileEeprom::open(&args.store, store_size)
        .with_context(|| format!("failed to open store {}", args.store.display()))?;

    let input: Box<dyn AsyncBufRead + Unpin> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let readings = replay::readings(input);
    pin_mut!(readings);
    run(config, store, readings, args.status_interval_ms).await
}

async fn run<E, S>(config: MonitorConfig, store: E, mut readings: S, status_interval_ms: u32) -> anyhow::Result<()>
where
    E: Eeprom,
    S: Stream<Item = anyhow::Result<Reading>> + Unpin,
{
    let Some(first) = next_reading(&mut readings).await else {
        info!("no samples to replay");
        return Ok(());
    };

    let mut monitor = BatteryMonitor::start(config, store, first.timestamp_ms)?;
    let mut last_status_ms = first.timestamp_ms;
    let mut reading = first;
    let mut ticks = 0usize;

    loop {
        if reading.samples.len() != monitor.battery_count() {
            warn!(
                timestamp_ms = reading.timestamp_ms,
                samples = reading.samples.len(),
                batteries = monitor.battery_count(),
                "sample count does not match configured batteries"
            );
        }

        monitor.tick(reading.timestamp_ms, &reading.samples);
        ticks += 1;

        if reading.timestamp_ms.wrapping_sub(last_status_ms) >= status_interval_ms {
            last_status_ms = reading.timestamp_ms;
            log_status(&monitor, reading.timestamp_ms);
        }

        match next_reading(&mut readings).await {
            Some(next) => reading = next,
            None => break,
        }
    }

    let receipt = monitor.save_now().context("final save failed")?;
    info!(ticks, slot = receipt.slot, sequence = receipt.sequence, "replay finished");
    log_status(&monitor, reading.timestamp_ms);
    Ok(())
}

/// The next good reading. Bad lines are logged and skipped.
async fn next_reading<S>(readings: &mut S) -> Option<Reading>
where
    S: Stream<Item = anyhow::Result<Reading>> + Unpin,
{
    while let Some(result) = readings.next().await {
        match result {
            Ok(reading) => return Some(reading),
            Err(err) => warn!("skipping sample: {err:#}"),
        }
    }
    None
}

fn log_status<E: Eeprom>(monitor: &BatteryMonitor<E>, timestamp_ms: u32) {
    for (battery, status) in monitor.statuses().iter().enumerate() {
        info!(
            battery,
            timestamp_ms,
            soc_percent = status.soc_percent,
            soh_percent = status.soh_percent,
            remaining_ah = status.remaining_ah,
            remaining_wh = status.remaining_wh,
            learned_capacity_ah = status.learned_capacity_ah,
            voltage_v = status.voltage_v,
            current_a = status.current_a,
            resting = status.resting,
            full = status.full,
            rest_ocv_soc_percent = ?monitor.rest_ocv_soc_percent(battery),
            "status"
        );
    }
}
