use std::sync::Arc;

use anyhow::{Context, Result};
use sluice_append::{Appendable, Appender, Fanout, Interceptor, SamplePrinter};
use sluice_config::Config;
use sluice_identity::{LabelStore, spawn_stale_sweeper};
use sluice_relabel::RelabelStage;
use sluice_remote::RemoteWrite;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The appender chain built from a [`Config`].
///
/// Samples enter through [`appender`](Self::appender), pass the relabel stage and are fanned out
/// to one [`RemoteWrite`] destination per configured endpoint.
pub struct Pipeline {
    store: Arc<LabelStore>,
    entry: Arc<dyn Appendable>,
    destinations: Vec<Arc<RemoteWrite>>,
    shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Pipeline {
    /// Builds the pipeline and starts all destination queues.
    ///
    /// With `print`, every sample is logged before it enters the relabel stage.
    pub async fn start(config: &Config, print: bool) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let store = Arc::new(LabelStore::new(config.stale_duration()));
        let external_labels = config.external_labels();

        let mut destinations = Vec::with_capacity(config.remote_write().len());
        for remote in config.remote_write() {
            let destination =
                RemoteWrite::new(remote, store.clone(), external_labels.clone(), &shutdown)
                    .with_context(|| format!("invalid remote write endpoint {}", remote.name()))?;
            destinations.push(Arc::new(destination));
        }

        for destination in &destinations {
            destination.start().await;
        }

        let children = destinations
            .iter()
            .map(|destination| destination.clone() as Arc<dyn Appendable>)
            .collect();
        let fanout = Arc::new(Fanout::new(store.clone(), children));

        let relabel = Arc::new(RelabelStage::new(
            store.clone(),
            config.relabel_configs().to_vec(),
            fanout,
        ));

        let entry: Arc<dyn Appendable> = if print {
            Arc::new(Interceptor::new(SamplePrinter, Some(relabel)))
        } else {
            relabel
        };

        let sweeper = spawn_stale_sweeper(
            store.clone(),
            config.sweep_interval(),
            shutdown.child_token(),
        );

        Ok(Self {
            store,
            entry,
            destinations,
            shutdown,
            sweeper,
        })
    }

    /// Creates an appender at the entry of the pipeline.
    pub fn appender(&self) -> Box<dyn Appender> {
        self.entry.appender()
    }

    /// Returns the identity registry shared by all stages.
    pub fn store(&self) -> &Arc<LabelStore> {
        &self.store
    }

    /// Flushes and stops every destination, then stops the stale sweeper.
    pub async fn shutdown(self) {
        for destination in &self.destinations {
            destination.stop().await;
        }

        self.shutdown.cancel();
        if let Err(error) = self.sweeper.await {
            sluice_log::error!(
                error = &error as &dyn std::error::Error,
                "stale sweeper failed",
            );
        }

        sluice_log::info!(series = self.store.series_count(), "pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sluice_labels::Labels;
    use sluice_remote::proto::WriteRequest;
    use sluice_test::MockRemoteWrite;

    use super::*;

    fn config(url: &str) -> Config {
        Config::from_yaml_str(&format!(
            r#"
external_labels:
  replica: a
relabel_configs:
  - source_labels: [__name__]
    regex: internal_.*
    action: drop
remote_write:
  - name: mock
    url: {url}
    queue_config:
      batch_send_deadline: 50
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_push_one_sample() {
        sluice_test::setup();
        let server = MockRemoteWrite::start().await;
        let pipeline = Pipeline::start(&config(&server.url()), false)
            .await
            .unwrap();

        let mut appender = pipeline.appender();
        appender
            .append(0, &Labels::from_pairs([("foo", "bar")]), 1, 12.0)
            .await
            .unwrap();
        appender
            .append(0, &Labels::from_pairs([("__name__", "internal_x")]), 1, 1.0)
            .await
            .unwrap();
        appender.commit().await.unwrap();

        server.wait_for_requests(1, Duration::from_secs(10)).await;
        pipeline.shutdown().await;

        let requests = server.requests();
        assert_eq!(requests.len(), 1);

        let request: WriteRequest = requests[0].decode();
        assert_eq!(request.timeseries.len(), 1);

        let labels: Vec<_> = request.timeseries[0]
            .labels
            .iter()
            .map(|label| (label.name.as_str(), label.value.as_str()))
            .collect();
        assert_eq!(labels, [("foo", "bar"), ("replica", "a")]);
        assert_eq!(request.timeseries[0].samples[0].value, 12.0);
    }

    #[tokio::test]
    async fn test_without_destinations() {
        let config = Config::from_yaml_str("{}").unwrap();
        let pipeline = Pipeline::start(&config, true).await.unwrap();

        let mut appender = pipeline.appender();
        let labels = Labels::from_pairs([("__name__", "up")]);
        let global = appender.append(0, &labels, 1, 1.0).await.unwrap();
        appender.commit().await.unwrap();

        assert_eq!(global, pipeline.store().get_or_add_global_ref_id(&labels));
        pipeline.shutdown().await;
    }
}
