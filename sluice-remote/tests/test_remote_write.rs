use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sluice_append::{AppendError, Appendable};
use sluice_identity::LabelStore;
use sluice_labels::{Exemplar, Labels, Metadata, MetricType, STALE_NAN};
use sluice_relabel::{Action, RelabelConfig, RelabelRegex};
use sluice_remote::proto::{self, WriteRequest};
use sluice_remote::{
    QueueConfig, REMOTE_WRITE_VERSION, RemoteWrite, RemoteWriteConfig, StoreError, WriteClient,
    decode_request,
};
use sluice_test::MockRemoteWrite;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingClient {
    requests: Mutex<Vec<WriteRequest>>,
}

impl RecordingClient {
    async fn wait_for_requests(&self, count: usize) -> Vec<WriteRequest> {
        loop {
            let requests = self.requests.lock().clone();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn series(&self) -> Vec<proto::TimeSeries> {
        self.requests
            .lock()
            .iter()
            .flat_map(|request| request.timeseries.clone())
            .collect()
    }
}

#[async_trait]
impl WriteClient for RecordingClient {
    async fn store(&self, payload: Bytes) -> Result<(), StoreError> {
        let request = decode_request(&payload)?;
        self.requests.lock().push(request);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }

    fn endpoint(&self) -> &str {
        "http://localhost/api/v1/write"
    }
}

fn config(url: &str) -> RemoteWriteConfig {
    RemoteWriteConfig {
        name: "test".to_owned(),
        url: url.to_owned(),
        queue_config: QueueConfig {
            batch_send_deadline: 50,
            min_backoff: 10,
            max_backoff: 100,
            shard_update_interval: 3_600_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn destination(
    config: &RemoteWriteConfig,
    store: &Arc<LabelStore>,
    external_labels: Labels,
) -> (RemoteWrite, Arc<RecordingClient>) {
    let client = Arc::new(RecordingClient::default());
    let destination = RemoteWrite::with_client(
        config,
        client.clone(),
        store.clone(),
        external_labels,
        &CancellationToken::new(),
    );
    (destination, client)
}

fn wire_labels(series: &proto::TimeSeries) -> Vec<(&str, &str)> {
    series
        .labels
        .iter()
        .map(|label| (label.name.as_str(), label.value.as_str()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_external_labels_are_merged() {
    sluice_test::setup();

    let store = Arc::new(LabelStore::default());
    let external = Labels::from_pairs([("cluster", "eu"), ("foo", "external")]);
    let (destination, client) = destination(&config("http://localhost"), &store, external);
    destination.start().await;

    let labels = Labels::from_pairs([("__name__", "up"), ("foo", "bar")]);
    let mut appender = destination.appender();
    let global = appender.append(0, &labels, 1000, 12.0).await.unwrap();
    appender.commit().await.unwrap();

    client.wait_for_requests(1).await;
    let series = client.series();
    assert_eq!(series.len(), 1);
    assert_eq!(
        wire_labels(&series[0]),
        [("__name__", "up"), ("cluster", "eu"), ("foo", "bar")]
    );
    assert_eq!(
        series[0].samples,
        [proto::Sample {
            value: 12.0,
            timestamp: 1000
        }]
    );

    assert_eq!(global, store.get_or_add_global_ref_id(&labels));
    assert_ne!(store.get_local_ref_id("test", global), 0);

    destination.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_local_refs_are_stable() {
    let store = Arc::new(LabelStore::default());
    let (destination, _client) = destination(&config("http://localhost"), &store, Labels::new());

    let up = Labels::from_pairs([("__name__", "up")]);
    let down = Labels::from_pairs([("__name__", "down")]);

    let mut appender = destination.appender();
    let first = appender.append(0, &up, 1, 1.0).await.unwrap();
    let second = appender.append(first, &up, 2, 1.0).await.unwrap();
    let other = appender.append(0, &down, 1, 1.0).await.unwrap();
    appender.rollback().await.unwrap();

    assert_eq!(first, second);
    let local_up = store.get_local_ref_id("test", first);
    let local_down = store.get_local_ref_id("test", other);
    assert_ne!(local_up, local_down);
    assert_eq!(store.get_global_ref_id("test", local_up), first);
}

#[tokio::test(start_paused = true)]
async fn test_write_relabel_drops_series() {
    let store = Arc::new(LabelStore::default());
    let config = RemoteWriteConfig {
        write_relabel_configs: vec![RelabelConfig {
            source_labels: vec!["__name__".to_owned()],
            regex: RelabelRegex::new("go_.*").unwrap(),
            action: Action::Drop,
            ..Default::default()
        }],
        ..config("http://localhost")
    };
    let (destination, client) = destination(&config, &store, Labels::new());
    destination.start().await;

    let mut appender = destination.appender();
    for name in ["go_goroutines", "up", "go_threads"] {
        let labels = Labels::from_pairs([("__name__", name)]);
        appender.append(0, &labels, 1, 1.0).await.unwrap();
    }
    appender.commit().await.unwrap();

    client.wait_for_requests(1).await;
    let series = client.series();
    assert_eq!(series.len(), 1);
    assert_eq!(wire_labels(&series[0]), [("__name__", "up")]);

    destination.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_markers_are_tracked() {
    let store = Arc::new(LabelStore::default());
    let (destination, _client) = destination(&config("http://localhost"), &store, Labels::new());

    let labels = Labels::from_pairs([("__name__", "up")]);
    let mut appender = destination.appender();

    let global = appender.append(0, &labels, 1, STALE_NAN).await.unwrap();
    assert_eq!(store.stale_count(), 1);

    appender.append(global, &labels, 2, 1.0).await.unwrap();
    assert_eq!(store.stale_count(), 0);

    appender.rollback().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rollback_discards_buffer() {
    let store = Arc::new(LabelStore::default());
    let (destination, client) = destination(&config("http://localhost"), &store, Labels::new());
    destination.start().await;

    let labels = Labels::from_pairs([("__name__", "up")]);
    let mut appender = destination.appender();
    appender.append(0, &labels, 1, 1.0).await.unwrap();
    appender.rollback().await.unwrap();
    appender.commit().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(client.requests.lock().is_empty());

    destination.stop().await;
}

#[tokio::test]
async fn test_commit_before_start_fails() {
    let store = Arc::new(LabelStore::default());
    let (destination, client) = destination(&config("http://localhost"), &store, Labels::new());

    let mut appender = destination.appender();
    appender
        .append(0, &Labels::from_pairs([("__name__", "up")]), 1, 1.0)
        .await
        .unwrap();

    assert_eq!(
        appender.commit().await,
        Err(AppendError::Remote(
            "queue manager is not started".to_owned()
        ))
    );
    assert!(client.requests.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exemplars_respect_flag() {
    let store = Arc::new(LabelStore::default());
    let labels = Labels::from_pairs([("__name__", "requests_total")]);
    let exemplar = Exemplar {
        labels: Labels::from_pairs([("trace_id", "abc")]),
        value: 1.0,
        timestamp: Some(5),
    };

    let disabled = RemoteWriteConfig {
        send_exemplars: false,
        ..config("http://localhost")
    };
    for (config, expected) in [(config("http://localhost"), 1), (disabled, 0)] {
        let (destination, client) = destination(&config, &store, Labels::new());
        destination.start().await;

        let mut appender = destination.appender();
        appender.append_exemplar(0, &labels, &exemplar).await.unwrap();
        appender.commit().await.unwrap();
        destination.stop().await;

        let series = client.series();
        assert_eq!(series.len(), expected);
        if let Some(series) = series.first() {
            assert_eq!(series.exemplars[0].timestamp, 5);
            assert_eq!(series.exemplars[0].labels[0].value, "abc");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_metadata_is_sent() {
    let store = Arc::new(LabelStore::default());
    let (destination, client) = destination(&config("http://localhost"), &store, Labels::new());
    destination.start().await;

    let labels = Labels::from_pairs([("__name__", "http_requests_total")]);
    let metadata = Metadata {
        metric_type: MetricType::Counter,
        help: "Total requests.".to_owned(),
        unit: String::new(),
    };

    let mut appender = destination.appender();
    appender.update_metadata(0, &labels, &metadata).await.unwrap();
    appender.commit().await.unwrap();

    let requests = client.wait_for_requests(1).await;
    assert_eq!(requests[0].metadata.len(), 1);
    assert_eq!(
        requests[0].metadata[0].metric_family_name,
        "http_requests_total"
    );
    assert_eq!(
        requests[0].metadata[0].r#type,
        proto::MetricType::Counter as i32
    );

    destination.stop().await;
}

#[tokio::test]
async fn test_end_to_end_http() {
    sluice_test::setup();

    let server = MockRemoteWrite::start().await;
    let store = Arc::new(LabelStore::default());
    let external = Labels::from_pairs([("replica", "a")]);
    let destination = RemoteWrite::new(
        &config(&server.url()),
        store,
        external,
        &CancellationToken::new(),
    )
    .unwrap();
    destination.start().await;

    let mut appender = destination.appender();
    let labels = Labels::from_pairs([("foo", "bar")]);
    appender.append(0, &labels, 1, 12.0).await.unwrap();
    appender.commit().await.unwrap();

    let requests = server
        .wait_for_requests(1, Duration::from_secs(10))
        .await;
    destination.stop().await;

    assert_eq!(server.requests().len(), 1);
    let request = &requests[0];
    assert_eq!(request.headers["content-encoding"], "snappy");
    assert_eq!(request.headers["content-type"], "application/x-protobuf");
    assert_eq!(
        request.headers["x-prometheus-remote-write-version"],
        REMOTE_WRITE_VERSION
    );

    let write: WriteRequest = request.decode();
    assert_eq!(write.timeseries.len(), 1);
    assert_eq!(
        wire_labels(&write.timeseries[0]),
        [("foo", "bar"), ("replica", "a")]
    );
    assert_eq!(write.timeseries[0].samples[0].value, 12.0);
}

#[tokio::test]
async fn test_http_retries_server_errors() {
    let server = MockRemoteWrite::start().await;
    server.fail_next(503, None);
    server.fail_next(429, Some("0"));

    let store = Arc::new(LabelStore::default());
    let destination =
        RemoteWrite::new(&config(&server.url()), store, Labels::new(), &CancellationToken::new())
            .unwrap();
    destination.start().await;

    let mut appender = destination.appender();
    let labels = Labels::from_pairs([("__name__", "up")]);
    appender.append(0, &labels, 1, 1.0).await.unwrap();
    appender.commit().await.unwrap();

    server.wait_for_requests(1, Duration::from_secs(10)).await;
    destination.stop().await;

    assert_eq!(server.attempts(), 3);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_http_client_errors_are_dropped() {
    let server = MockRemoteWrite::start().await;
    server.fail_next(400, None);

    let store = Arc::new(LabelStore::default());
    let destination =
        RemoteWrite::new(&config(&server.url()), store, Labels::new(), &CancellationToken::new())
            .unwrap();
    destination.start().await;

    let labels = Labels::from_pairs([("__name__", "up")]);
    for timestamp in [1, 2] {
        let mut appender = destination.appender();
        appender.append(0, &labels, timestamp, 1.0).await.unwrap();
        appender.commit().await.unwrap();

        while server.attempts() < timestamp as usize {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    destination.stop().await;

    // the first batch was rejected and not retried
    let requests = server.requests();
    assert_eq!(server.attempts(), 2);
    assert_eq!(requests.len(), 1);
    let write: WriteRequest = requests[0].decode();
    assert_eq!(write.timeseries[0].samples[0].timestamp, 2);
}

#[test]
fn test_invalid_url_is_rejected() {
    let store = Arc::new(LabelStore::default());
    let result = RemoteWrite::new(
        &config("ftp://localhost/write"),
        store,
        Labels::new(),
        &CancellationToken::new(),
    );
    assert!(result.is_err());
}
