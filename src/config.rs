use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context as _;
use serde::Deserialize;

pub const PROJECT_CONFIG_FILENAME: &str = "session-analyzer.toml";
pub const HOME_CONFIG_DIR: &str = ".session-analyzer";
pub const HOME_CONFIG_FILENAME: &str = "config.toml";
pub const DEFAULT_SESSION_TABLE: &str = "django_session";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodecConfig {
    pub kind: Option<CodecKind>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Payload is a bare JSON object.
    Json,
    /// Payload is base64 of `<sha256 hex>:<json>`, verified with a secret.
    Signed,
}

/// Raw `[scan]` values. Validation happens in `options`, so that config-file
/// and command-line values are checked by the same rules.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    pub batch_size: Option<i64>,
    pub bigger_than: Option<i64>,
    pub sleep_time: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Where a loaded config came from; used to label load errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Project(PathBuf),
    Home(PathBuf),
}

impl ConfigSource {
    /// `explicit` when given, otherwise whatever discovery finds in the
    /// working directory and then the home directory.
    pub fn locate(explicit: Option<&Path>) -> anyhow::Result<Option<Self>> {
        if let Some(path) = explicit {
            return Ok(Some(Self::Explicit(path.to_path_buf())));
        }
        let cwd = std::env::current_dir().context("resolve current directory")?;
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Ok(discover(&cwd, home.as_deref()))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Project(path) | Self::Home(path) => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(path) => write!(f, "--config {}", path.display()),
            Self::Project(_) => write!(f, "project ./{PROJECT_CONFIG_FILENAME}"),
            Self::Home(path) => write!(f, "home {}", path.display()),
        }
    }
}

impl Config {
    /// Load config from `source`. Without a source the defaults apply.
    pub fn load(source: Option<&ConfigSource>) -> anyhow::Result<Self> {
        let Some(source) = source else {
            return Ok(Self::default());
        };
        Self::from_path(source.path()).with_context(|| format!("load config from {source}"))
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&toml)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }

    pub fn session_table(&self) -> &str {
        self.database
            .table
            .as_deref()
            .unwrap_or(DEFAULT_SESSION_TABLE)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).context("parse config TOML")
    }
}

pub fn discover(cwd: &Path, home: Option<&Path>) -> Option<ConfigSource> {
    let project = cwd.join(PROJECT_CONFIG_FILENAME);
    if project.is_file() {
        return Some(ConfigSource::Project(project));
    }

    let home = home?.join(HOME_CONFIG_DIR).join(HOME_CONFIG_FILENAME);
    home.is_file().then_some(ConfigSource::Home(home))
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use super::{CodecKind, Config, ConfigSource, LogFormat, discover};
    use tempfile::tempdir;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").expect("empty config should parse");
        assert_eq!(config.session_table(), "django_session");
        assert!(config.database.path.is_none());
        assert!(config.codec.kind.is_none());
        assert!(config.logging.is_none());
    }

    #[test]
    fn full_config_parses_every_section() {
        let config = Config::from_toml_str(
            r#"
[database]
path = "/srv/app/db.sqlite3"
table = "web_sessions"

[codec]
kind = "signed"
secret = "hunter2"

[scan]
batch_size = 100
bigger_than = 0
sleep_time = 0.5

[logging]
level = "debug"
format = "json"
"#,
        )
        .expect("config should parse");

        assert_eq!(config.session_table(), "web_sessions");
        assert_eq!(config.codec.kind, Some(CodecKind::Signed));
        assert_eq!(config.codec.secret.as_deref(), Some("hunter2"));
        assert_eq!(config.scan.batch_size, Some(100));
        assert_eq!(config.scan.bigger_than, Some(0));
        assert_eq!(config.scan.sleep_time, Some(0.5));
        let logging = config.logging.expect("logging section");
        assert_eq!(logging.format, Some(LogFormat::Json));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str(
            r#"
[scan]
batch = 10
"#,
        )
        .unwrap_err();
        assert!(
            format!("{err:#}").contains("unknown field"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn discovery_prefers_project_over_home() {
        let sandbox = tempdir().unwrap();
        let project = sandbox.path().join("project");
        let home = sandbox.path().join("home");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(home.join(".session-analyzer")).unwrap();

        assert_eq!(discover(&project, Some(&home)), None);

        let home_config = home.join(".session-analyzer").join("config.toml");
        fs::write(&home_config, "").unwrap();
        assert_eq!(
            discover(&project, Some(&home)),
            Some(ConfigSource::Home(home_config))
        );

        let project_config = project.join("session-analyzer.toml");
        fs::write(&project_config, "").unwrap();
        let source = discover(&project, Some(&home)).expect("project config");
        assert_eq!(source, ConfigSource::Project(project_config));
        assert_eq!(source.to_string(), "project ./session-analyzer.toml");
    }

    #[test]
    fn explicit_source_skips_discovery() {
        let source = ConfigSource::locate(Some(Path::new("custom.toml")))
            .expect("explicit source should resolve");
        assert_eq!(
            source,
            Some(ConfigSource::Explicit(PathBuf::from("custom.toml")))
        );
    }

    #[test]
    fn load_uses_defaults_without_source_and_labels_errors_with_it() {
        let config = Config::load(None).expect("defaults should load");
        assert!(config.database.path.is_none());

        let sandbox = tempdir().unwrap();
        let path = sandbox.path().join("broken.toml");
        fs::write(&path, "[scan]\nbatch = 1\n").unwrap();
        let err = Config::load(Some(&ConfigSource::Explicit(path.clone()))).unwrap_err();
        assert!(
            err.to_string()
                .starts_with(&format!("load config from --config {}", path.display())),
            "unexpected error: {err:#}"
        );
    }
}
