use std::{path::PathBuf, time::Duration};

use anyhow::anyhow;

use crate::config::Config;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_BIGGER_THAN: u64 = 10 * 1024;
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(2);

const BATCH_SIZE_ERROR: &str = "batch-size must be a positive integer";
const BIGGER_THAN_ERROR: &str = "bigger-than must be a non-negative integer";
const SLEEP_TIME_ERROR: &str = "sleep-time must be a non-negative number of seconds";

/// Resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    pub batch_size: usize,
    /// Only rows whose encoded payload is strictly larger than this are analyzed.
    pub bigger_than: u64,
    /// Pause between pages of the scan.
    pub sleep_time: Duration,
    /// When set, sessions are looked up by the ids listed in this file instead
    /// of being scanned.
    pub ids_from: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            bigger_than: DEFAULT_BIGGER_THAN,
            sleep_time: DEFAULT_SLEEP_TIME,
            ids_from: None,
        }
    }
}

/// Values given on the command line. Each one wins over its config-file
/// counterpart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionOverrides {
    pub batch_size: Option<usize>,
    pub bigger_than: Option<u64>,
    pub sleep_time: Option<Duration>,
    pub ids_from: Option<PathBuf>,
}

impl ScanOptions {
    pub fn resolve(config: &Config, overrides: OptionOverrides) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let batch_size = match (overrides.batch_size, config.scan.batch_size) {
            (Some(value), _) => checked_batch_size(i64::try_from(value).unwrap_or(i64::MAX))?,
            (None, Some(value)) => checked_batch_size(value)?,
            (None, None) => defaults.batch_size,
        };
        let bigger_than = match (overrides.bigger_than, config.scan.bigger_than) {
            (Some(value), _) => {
                checked_bigger_than(i64::try_from(value).map_err(|_| anyhow!(BIGGER_THAN_ERROR))?)?
            }
            (None, Some(value)) => checked_bigger_than(value)?,
            (None, None) => defaults.bigger_than,
        };
        let sleep_time = match (overrides.sleep_time, config.scan.sleep_time) {
            (Some(value), _) => value,
            (None, Some(seconds)) => checked_sleep_time(seconds).map_err(|err| anyhow!(err))?,
            (None, None) => defaults.sleep_time,
        };

        Ok(Self {
            batch_size,
            bigger_than,
            sleep_time,
            ids_from: overrides.ids_from,
        })
    }
}

fn checked_batch_size(value: i64) -> anyhow::Result<usize> {
    if value <= 0 {
        return Err(anyhow!(BATCH_SIZE_ERROR));
    }
    usize::try_from(value).map_err(|_| anyhow!(BATCH_SIZE_ERROR))
}

/// Thresholds are bound as SQLite integers, so they stop at `i64::MAX`.
fn checked_bigger_than(value: i64) -> anyhow::Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!(BIGGER_THAN_ERROR))
}

fn checked_sleep_time(seconds: f64) -> Result<Duration, String> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SLEEP_TIME_ERROR.to_owned());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| SLEEP_TIME_ERROR.to_owned())
}

/// clap value parser for `--batch-size`.
pub fn parse_batch_size(raw: &str) -> Result<usize, String> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| BATCH_SIZE_ERROR.to_owned())?;
    checked_batch_size(value).map_err(|err| err.to_string())
}

/// clap value parser for `--bigger-than`.
pub fn parse_bigger_than(raw: &str) -> Result<u64, String> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| BIGGER_THAN_ERROR.to_owned())?;
    checked_bigger_than(value).map_err(|err| err.to_string())
}

/// clap value parser for `--sleep-time`, in (fractional) seconds.
pub fn parse_sleep_time(raw: &str) -> Result<Duration, String> {
    let seconds = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| SLEEP_TIME_ERROR.to_owned())?;
    checked_sleep_time(seconds)
}
