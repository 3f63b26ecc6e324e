use std::{path::PathBuf, time::Duration};

use clap::Parser;
use session_analyzer::{
    analyze::analyze,
    codec,
    config::{CodecKind, Config, ConfigSource},
    logging,
    options::{self, OptionOverrides, ScanOptions},
    report::{self, OutputFormat},
    store::SessionStore,
};

/// Summarize which keys stored web sessions carry and how big they are.
#[derive(Debug, Parser)]
#[command(name = "session-analyzer", version)]
struct Cli {
    /// Optional path to config TOML. If omitted, default discovery is used.
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite database holding the session table.
    #[arg(long)]
    database: Option<PathBuf>,
    /// Session table name (default `django_session`).
    #[arg(long)]
    table: Option<String>,
    /// Number of sessions fetched per page.
    #[arg(long, value_name = "N", value_parser = options::parse_batch_size)]
    batch_size: Option<usize>,
    /// Only analyze sessions whose encoded payload exceeds this many bytes.
    #[arg(long, value_name = "N", value_parser = options::parse_bigger_than)]
    bigger_than: Option<u64>,
    /// Seconds to pause between pages.
    #[arg(long, value_name = "S", value_parser = options::parse_sleep_time)]
    sleep_time: Option<Duration>,
    /// Read session ids from this file (one per line) instead of scanning.
    #[arg(long, value_name = "PATH")]
    ids_from: Option<PathBuf>,
    /// Payload encoding used by the session store.
    #[arg(long, value_enum)]
    codec: Option<CodecKind>,
    /// Secret for the signed codec.
    #[arg(long)]
    secret: Option<String>,
    /// Report output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Override log level (trace, debug, info, warn, error, off). `error` and
    /// `off` also hide the warning for each id missing from the store.
    #[arg(long)]
    log_level: Option<String>,
    /// Shorthand for `--log-level debug`.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn option_overrides(&self) -> OptionOverrides {
        OptionOverrides {
            batch_size: self.batch_size,
            bigger_than: self.bigger_than,
            sleep_time: self.sleep_time,
            ids_from: self.ids_from.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_source = ConfigSource::locate(cli.config.as_deref())?;
    let mut config = Config::load(config_source.as_ref())?;
    if let Some(table) = cli.table.clone() {
        config.database.table = Some(table);
    }
    let options = ScanOptions::resolve(&config, cli.option_overrides())?;
    logging::init(&config, cli.log_level.as_deref(), cli.verbose)?;
    match &config_source {
        Some(source) => tracing::debug!(source = %source, "loaded config"),
        None => tracing::debug!("no config file found, using defaults"),
    }
    let codec = codec::from_config(&config.codec, cli.codec, cli.secret.as_deref())?;
    let store = SessionStore::from_config(&config, cli.database.as_deref())?;
    tracing::debug!(
        database = %store.db_path().display(),
        table = store.table(),
        "opened session store"
    );

    let report = analyze(&store, codec.as_ref(), &options).await?;
    report::write(&report, cli.format, &mut std::io::stdout().lock())
}
