use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_relabel::{RelabelConfig, RelabelConfigError};
use url::Url;

/// An error in the configuration of a remote-write endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RemoteConfigError {
    /// The endpoint URL could not be parsed.
    #[error("invalid remote write url {url:?}")]
    InvalidUrl {
        /// The configured URL.
        url: String,
        /// The parse error.
        #[source]
        source: url::ParseError,
    },
    /// The endpoint URL is neither `http` nor `https`.
    #[error("unsupported url scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
    /// A queue setting is out of range.
    #[error("invalid queue_config: {0}")]
    InvalidQueueConfig(&'static str),
    /// The metadata settings are out of range.
    #[error("invalid metadata_config: {0}")]
    InvalidMetadataConfig(&'static str),
    /// A write relabel rule is invalid.
    #[error("invalid write_relabel_configs")]
    InvalidRelabelConfig(#[from] RelabelConfigError),
}

/// Tuning of the sharded send queue of one endpoint.
///
/// Durations are configured in milliseconds.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of samples buffered per shard before appends block.
    pub capacity: usize,
    /// Upper bound of the shard count.
    pub max_shards: usize,
    /// Lower bound of the shard count, also the initial count.
    pub min_shards: usize,
    /// Maximum number of samples in one request.
    pub max_samples_per_send: usize,
    /// Maximum time a sample waits in a partial batch.
    pub batch_send_deadline: u64,
    /// Initial retry delay.
    pub min_backoff: u64,
    /// Maximum retry delay.
    pub max_backoff: u64,
    /// Time pending data gets to be sent on shutdown.
    pub flush_deadline: u64,
    /// Interval of rate updates and shard count recalculation.
    pub shard_update_interval: u64,
}

impl QueueConfig {
    /// Returns the maximum time a sample waits in a partial batch.
    pub fn batch_send_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_send_deadline)
    }

    /// Returns the initial retry delay.
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff)
    }

    /// Returns the maximum retry delay.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff)
    }

    /// Returns the time pending data gets to be sent on shutdown.
    pub fn flush_deadline(&self) -> Duration {
        Duration::from_millis(self.flush_deadline)
    }

    /// Returns the interval of shard count recalculation.
    pub fn shard_update_interval(&self) -> Duration {
        Duration::from_millis(self.shard_update_interval)
    }

    /// Returns the number of full batches a shard buffers.
    pub fn batches_per_shard(&self) -> usize {
        (self.capacity / self.max_samples_per_send.max(1)).max(1)
    }

    /// Checks that all settings are in range.
    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        let err = RemoteConfigError::InvalidQueueConfig;
        if self.min_shards < 1 {
            return Err(err("min_shards must be at least 1"));
        }
        if self.max_shards < self.min_shards {
            return Err(err("max_shards must not be less than min_shards"));
        }
        if self.max_samples_per_send < 1 {
            return Err(err("max_samples_per_send must be at least 1"));
        }
        if self.capacity < self.max_samples_per_send {
            return Err(err("capacity must not be less than max_samples_per_send"));
        }
        if self.max_backoff < self.min_backoff {
            return Err(err("max_backoff must not be less than min_backoff"));
        }
        if self.shard_update_interval == 0 {
            return Err(err("shard_update_interval must be positive"));
        }
        if self.batch_send_deadline == 0 {
            return Err(err("batch_send_deadline must be positive"));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_shards: 50,
            min_shards: 1,
            max_samples_per_send: 2_000,
            batch_send_deadline: 5_000,
            min_backoff: 30,
            max_backoff: 5_000,
            flush_deadline: 60_000,
            shard_update_interval: 10_000,
        }
    }
}

/// Settings for sending metric metadata.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataConfig {
    /// Whether metadata is sent at all.
    pub send: bool,
    /// Maximum number of metadata entries in one request.
    pub max_samples_per_send: usize,
}

impl MetadataConfig {
    /// Checks that all settings are in range.
    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        if self.max_samples_per_send < 1 {
            return Err(RemoteConfigError::InvalidMetadataConfig(
                "max_samples_per_send must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            send: true,
            max_samples_per_send: 500,
        }
    }
}

/// Configuration of one remote-write endpoint.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RemoteWriteConfig {
    /// Name of the destination, used in logs, metrics and as the identity of its local refs.
    ///
    /// Defaults to the URL.
    pub name: String,
    /// Endpoint URL.
    pub url: String,
    /// Request timeout in seconds.
    pub remote_timeout: u64,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Relabel rules applied to series before they are sent.
    pub write_relabel_configs: Vec<RelabelConfig>,
    /// Whether exemplars are sent.
    pub send_exemplars: bool,
    /// Whether native histograms are sent.
    pub send_native_histograms: bool,
    /// Whether HTTP 429 responses are retried.
    pub retry_on_http_429: bool,
    /// Queue tuning.
    pub queue_config: QueueConfig,
    /// Metadata settings.
    pub metadata_config: MetadataConfig,
}

impl RemoteWriteConfig {
    /// Returns the configured name, or the URL if no name is set.
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }

    /// Returns the request timeout.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout)
    }

    /// Parses the endpoint URL.
    pub fn parsed_url(&self) -> Result<Url, RemoteConfigError> {
        let url = Url::parse(&self.url).map_err(|source| RemoteConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(RemoteConfigError::UnsupportedScheme(other.to_owned())),
        }
    }

    /// Checks the URL, the relabel rules and the queue settings.
    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        self.parsed_url()?;
        sluice_relabel::validate_all(&self.write_relabel_configs)?;
        self.queue_config.validate()?;
        self.metadata_config.validate()
    }
}

impl Default for RemoteWriteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            remote_timeout: 30,
            headers: BTreeMap::new(),
            write_relabel_configs: Vec::new(),
            send_exemplars: true,
            send_native_histograms: false,
            retry_on_http_429: true,
            queue_config: QueueConfig::default(),
            metadata_config: MetadataConfig::default(),
        }
    }
}
