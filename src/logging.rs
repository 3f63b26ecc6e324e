use std::io::IsTerminal as _;

use anyhow::anyhow;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{Config, LogFormat};

const DEFAULT_LOG_LEVEL: &str = "info";
const VERBOSE_LOG_LEVEL: &str = "debug";

/// Installs the global subscriber. Logs go to stderr so stdout only carries
/// the report.
pub fn init(
    config: &Config,
    cli_level_override: Option<&str>,
    verbose: bool,
) -> anyhow::Result<()> {
    let log_level = resolve_log_level(config, cli_level_override, verbose)?;

    match resolve_log_format(config) {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .pretty()
            .try_init(),
    }
    .map_err(|err| anyhow!("initialize logging subscriber: {err}"))?;

    Ok(())
}

fn resolve_log_level(
    config: &Config,
    cli_level_override: Option<&str>,
    verbose: bool,
) -> anyhow::Result<LevelFilter> {
    let raw_level = cli_level_override
        .or(verbose.then_some(VERBOSE_LOG_LEVEL))
        .or_else(|| {
            config
                .logging
                .as_ref()
                .and_then(|logging| logging.level.as_deref())
        })
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let normalized = raw_level.trim().to_ascii_lowercase();

    normalized.parse::<LevelFilter>().map_err(|_| {
        anyhow!(
            "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
        )
    })
}

fn resolve_log_format(config: &Config) -> LogFormat {
    config
        .logging
        .as_ref()
        .and_then(|logging| logging.format)
        .unwrap_or(LogFormat::Pretty)
}
