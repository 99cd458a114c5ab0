//! Recorded sensor samples, one control tick per line.
//!
//! ```text
//! timestamp_ms,v1,i1,t1[,v2,i2,t2]
//! ```
//!
//! Voltage in V, current in A (positive = discharge), temperature in °C. An
//! empty temperature field means the sensor had no valid reading. Blank lines
//! and lines starting with `#` are skipped.

use anyhow::{anyhow, Context};
use futures_util::{stream, Stream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::battery_state::Sample;
use crate::config::MAX_BATTERIES;

const FIELDS_PER_BATTERY: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp_ms: u32,
    pub samples: Vec<Sample>,
}

/// Parse one line. `Ok(None)` for lines that carry no reading.
pub fn parse_reading(line: &str) -> anyhow::Result<Option<Reading>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split(',').map(str::trim);
    let timestamp_ms = fields
        .next()
        .ok_or(anyhow!("Missing timestamp"))?
        .parse::<u32>()
        .context("Invalid timestamp")?;

    let values: Vec<&str> = fields.collect();
    let batteries = values.len() / FIELDS_PER_BATTERY;
    if values.len() % FIELDS_PER_BATTERY != 0 || batteries == 0 || batteries > MAX_BATTERIES {
        return Err(anyhow!(
            "Expected {FIELDS_PER_BATTERY} or {} values after the timestamp, got {}",
            FIELDS_PER_BATTERY * MAX_BATTERIES,
            values.len()
        ));
    }

    let samples = values
        .chunks_exact(FIELDS_PER_BATTERY)
        .map(|chunk| -> anyhow::Result<Sample> {
            let voltage_v = chunk[0].parse::<f32>().context("Invalid voltage")?;
            let current_a = chunk[1].parse::<f32>().context("Invalid current")?;
            let temperature_c = match chunk[2] {
                "" => f32::NAN,
                t => t.parse::<f32>().context("Invalid temperature")?,
            };
            Ok(Sample::new(voltage_v, current_a, temperature_c))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Some(Reading { timestamp_ms, samples }))
}

/// Stream the readings of `reader` in order. Errors carry the line number
/// they occurred on; the stream continues after a bad line.
pub fn readings<R>(reader: R) -> impl Stream<Item = anyhow::Result<Reading>>
where
    R: AsyncBufRead + Unpin,
{
    stream::unfold((reader.lines(), 0usize), |(mut lines, mut line_no)| async move {
        loop {
            line_no += 1;
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => {
                    let err = anyhow::Error::from(err).context(format!("Failed to read line {line_no}"));
                    return Some((Err(err), (lines, line_no)));
                }
            };

            match parse_reading(&line).with_context(|| format!("Line {line_no}")) {
                Ok(None) => continue,
                Ok(Some(reading)) => return Some((Ok(reading), (lines, line_no))),
                Err(err) => return Some((Err(err), (lines, line_no))),
            }
        }
    })
}
