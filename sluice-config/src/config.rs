use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};
use sluice_labels::Labels;
use sluice_log::LogConfig;
use sluice_relabel::RelabelConfig;
use sluice_remote::RemoteWriteConfig;

/// File name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Where an error originated.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error in a specific configuration value.
    Field(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (from file {})", file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, " (in field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: None,
        }
    }

    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Some(Box::new(error)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &str) -> Self {
        self.source = ConfigErrorSource::Field(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the file the error originated from, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ConfigErrorSource::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error
            .as_deref()
            .map(|error| error as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing or dumping YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// A config value is invalid.
    #[error("invalid config value")]
    InvalidValue,
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Metrics {
    /// Host and port of the statsd server.
    ///
    /// Metrics are disabled if this is not set.
    pub statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    pub prefix: String,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    pub sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "sluice".to_owned(),
            default_tags: BTreeMap::new(),
            sample_rate: 1.0,
        }
    }
}

/// Controls the identity registry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelStoreConfig {
    /// Seconds a stale series is kept before it is removed.
    pub stale_duration: u64,
    /// Seconds between two sweeps for expired stale series.
    pub sweep_interval: u64,
}

impl Default for LabelStoreConfig {
    fn default() -> Self {
        Self {
            stale_duration: 600,
            sweep_interval: 600,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    logging: LogConfig,
    metrics: Metrics,
    label_store: LabelStoreConfig,
    external_labels: BTreeMap<String, String>,
    relabel_configs: Vec<RelabelConfig>,
    remote_write: Vec<RemoteWriteConfig>,
}

impl ConfigValues {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.label_store.sweep_interval == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                .field("label_store.sweep_interval"));
        }

        if !(0.0..=1.0).contains(&self.metrics.sample_rate) {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                .field("metrics.sample_rate"));
        }

        for name in self.external_labels.keys() {
            if !is_valid_label_name(name) {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                    .field(&format!("external_labels.{name}")));
            }
        }

        sluice_relabel::validate_all(&self.relabel_configs)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::InvalidValue).field("relabel_configs"))?;

        let mut names = BTreeSet::new();
        for (index, remote) in self.remote_write.iter().enumerate() {
            let field = format!("remote_write[{index}]");
            remote
                .validate()
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::InvalidValue).field(&field))?;

            if !names.insert(remote.name()) {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                    .field(&format!("{field}.name")));
            }
        }

        Ok(())
    }
}

/// Checks the label name syntax `[a-zA-Z_][a-zA-Z0-9_]*`.
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Config struct.
#[derive(Debug)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl Config {
    /// Loads `config.yml` from the given config directory.
    ///
    /// Relative paths are resolved against the current working directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|cwd| cwd.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let file = path.join(CONFIG_FILE_NAME);
        let contents = fs::read_to_string(&file)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&file))?;

        let values: ConfigValues = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&file))?;
        values.validate()?;

        Ok(Config { values, path })
    }

    /// Parses and validates a configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Serializes the effective configuration, including defaults, to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))
    }

    /// Returns the config directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the metric name prefix.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the tags added to every metric.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the global metric sample rate.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns how long stale series are kept.
    pub fn stale_duration(&self) -> Duration {
        Duration::from_secs(self.values.label_store.stale_duration)
    }

    /// Returns the interval between two stale sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.values.label_store.sweep_interval)
    }

    /// Returns the labels added to every series sent to remote destinations.
    pub fn external_labels(&self) -> Labels {
        Labels::from_pairs(&self.values.external_labels)
    }

    /// Returns the relabel rules of the pipeline.
    pub fn relabel_configs(&self) -> &[RelabelConfig] {
        &self.values.relabel_configs
    }

    /// Returns the configured remote-write endpoints.
    pub fn remote_write(&self) -> &[RemoteWriteConfig] {
        &self.values.remote_write
    }
}
