//! Reduction of the raw 66-channel sensor vector.
//!
//! The board reports every gas channel three times; those triples are
//! averaged. Entries mapped to [`SENTINEL`] are unwired and dropped. The last
//! two wired entries are temperature and humidity and pass through untouched.

use serde_json::Value;
use thiserror::Error;

pub const RAW_CHANNELS: usize = 66;
pub const GROUPED_CHANNELS: usize = 13;
pub const FORMATTED_LEN: usize = GROUPED_CHANNELS + 2;

const SENTINEL: u16 = 999;
const GROUP_SIZE: usize = 3;

/// Physical channel wired to each raw position; `SENTINEL` marks unused slots.
#[rustfmt::skip]
const CHANNEL_MAP: [u16; RAW_CHANNELS] = [
    999, 999, 11, 11, 11, 3, 3, 3, 2, 2, 2, 1, 1, 1, 999, 999,
    999, 999, 999, 999, 999, 9, 9, 9, 6, 6, 6, 5, 5, 5, 999, 999,
    999, 999, 999, 999, 999, 10, 10, 10, 7, 7, 7, 4, 4, 4, 999, 999,
    999, 999, 999, 999, 999, 13, 13, 13, 12, 12, 12, 8, 8, 8, 999, 999,
    16, 17,
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor values must be a JSON array")]
    NotAnArray,
    #[error("sensor vector has {got} entries, expected {expected}")]
    Length { expected: usize, got: usize },
    #[error("sensor entry {index} is not a finite number")]
    NonNumeric { index: usize },
}

/// Extract the raw vector from a decoded JSON message field.
pub fn parse_raw(values: &Value) -> Result<Vec<f64>, SensorError> {
    let entries = values.as_array().ok_or(SensorError::NotAnArray)?;
    if entries.len() != RAW_CHANNELS {
        return Err(SensorError::Length {
            expected: RAW_CHANNELS,
            got: entries.len(),
        });
    }
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| entry.as_f64().ok_or(SensorError::NonNumeric { index }))
        .collect()
}

/// Reduce a raw vector to 13 triple averages followed by temperature and humidity.
pub fn format_values(raw: &[f64]) -> Result<Vec<f64>, SensorError> {
    if raw.len() != RAW_CHANNELS {
        return Err(SensorError::Length {
            expected: RAW_CHANNELS,
            got: raw.len(),
        });
    }
    if let Some(index) = raw.iter().position(|v| !v.is_finite()) {
        return Err(SensorError::NonNumeric { index });
    }

    let wired: Vec<f64> = raw
        .iter()
        .zip(CHANNEL_MAP.iter())
        .filter(|(_, channel)| **channel != SENTINEL)
        .map(|(value, _)| *value)
        .collect();

    let (grouped, trailing) = wired.split_at(wired.len() - 2);
    let mut formatted: Vec<f64> = grouped
        .chunks_exact(GROUP_SIZE)
        .map(|group| group.iter().sum::<f64>() / GROUP_SIZE as f64)
        .collect();
    formatted.extend_from_slice(trailing);
    Ok(formatted)
}
