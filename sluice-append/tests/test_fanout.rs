use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_append::{
    AppendError, AppendHook, Appendable, Appender, Fanout, Interceptor, Sample,
};
use sluice_identity::LabelStore;
use sluice_labels::{Exemplar, Labels, Metadata};

/// Records everything appended and committed through it.
#[derive(Clone, Debug, Default)]
struct Recorder {
    state: Arc<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    committed: Mutex<Vec<Sample>>,
    rollbacks: Mutex<usize>,
    fail: bool,
}

impl Recorder {
    fn failing() -> Self {
        Self {
            state: Arc::new(RecorderState {
                fail: true,
                ..Default::default()
            }),
        }
    }

    fn committed(&self) -> Vec<Sample> {
        self.state.committed.lock().clone()
    }

    fn rollbacks(&self) -> usize {
        *self.state.rollbacks.lock()
    }
}

struct RecorderAppender {
    state: Arc<RecorderState>,
    pending: Vec<Sample>,
}

impl Appendable for Recorder {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(RecorderAppender {
            state: self.state.clone(),
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl Appender for RecorderAppender {
    async fn append(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<u64, AppendError> {
        if self.state.fail {
            return Err(AppendError::Remote("unavailable".to_owned()));
        }
        self.pending.push(Sample {
            series_ref,
            labels: labels.clone(),
            timestamp,
            value,
        });
        Ok(series_ref)
    }

    async fn commit(&mut self) -> Result<(), AppendError> {
        if self.state.fail {
            return Err(AppendError::Closed);
        }
        self.state
            .committed
            .lock()
            .extend(std::mem::take(&mut self.pending));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppendError> {
        self.pending.clear();
        *self.state.rollbacks.lock() += 1;
        Ok(())
    }
}

fn foo_bar() -> Labels {
    Labels::from_pairs([("foo", "bar")])
}

#[tokio::test]
async fn test_fanout_resolves_global_ref() {
    let store = Arc::new(LabelStore::default());
    let child = Recorder::default();
    let fanout = Fanout::new(store.clone(), vec![Arc::new(child.clone())]);

    let mut appender = fanout.appender();
    let series_ref = appender.append(0, &foo_bar(), 1, 12.0).await.unwrap();
    appender.commit().await.unwrap();

    assert_eq!(series_ref, store.get_or_add_global_ref_id(&foo_bar()));
    assert_eq!(
        child.committed(),
        vec![Sample {
            series_ref,
            labels: foo_bar(),
            timestamp: 1,
            value: 12.0,
        }]
    );
}

#[tokio::test]
async fn test_fanout_keeps_given_ref() {
    let store = Arc::new(LabelStore::default());
    let child = Recorder::default();
    let fanout = Fanout::new(store.clone(), vec![Arc::new(child.clone())]);

    let mut appender = fanout.appender();
    assert_eq!(appender.append(77, &foo_bar(), 1, 1.0).await.unwrap(), 77);
    assert_eq!(store.series_count(), 0);
}

#[tokio::test]
async fn test_fanout_swallows_child_errors() {
    let store = Arc::new(LabelStore::default());
    let healthy = Recorder::default();
    let broken = Recorder::failing();
    let fanout = Fanout::new(
        store,
        vec![Arc::new(broken.clone()), Arc::new(healthy.clone())],
    );

    let mut appender = fanout.appender();
    appender.append(0, &foo_bar(), 1, 1.0).await.unwrap();
    appender.commit().await.unwrap();

    assert_eq!(healthy.committed().len(), 1);
    assert!(broken.committed().is_empty());
}

#[test]
fn test_fanout_counts_child_errors() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let store = Arc::new(LabelStore::default());
    let broken = Recorder::failing();
    let fanout = Fanout::new(store, vec![Arc::new(broken)]);

    let captures = sluice_statsd::with_capturing_test_client(|| {
        runtime.block_on(async {
            let mut appender = fanout.appender();
            appender.append(5, &foo_bar(), 1, 1.0).await.unwrap();
            appender.commit().await.unwrap();
        })
    });

    assert_eq!(
        captures,
        [
            "append.fanout.child_error:1|c|#operation:append",
            "append.fanout.child_error:1|c|#operation:commit",
        ]
    );
}

#[tokio::test]
async fn test_fanout_intercept_rewrites_and_drops() {
    let store = Arc::new(LabelStore::default());
    let child = Recorder::default();
    let fanout = Fanout::new(store, vec![Arc::new(child.clone())]).with_intercept(
        |series_ref, labels, timestamp, value| {
            if labels.get("drop").is_some() {
                return Ok(None);
            }
            Ok(Some(Sample {
                series_ref,
                labels: labels.clone(),
                timestamp,
                value: value * 2.0,
            }))
        },
    );

    let mut appender = fanout.appender();
    appender.append(1, &foo_bar(), 1, 2.0).await.unwrap();
    appender
        .append(2, &Labels::from_pairs([("drop", "yes")]), 1, 2.0)
        .await
        .unwrap();
    appender.commit().await.unwrap();

    let committed = child.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].value, 4.0);
}

#[tokio::test]
async fn test_fanout_intercept_error_propagates() {
    let store = Arc::new(LabelStore::default());
    let fanout = Fanout::new(store, vec![])
        .with_intercept(|_, _, _, _| Err(AppendError::Closed));

    let mut appender = fanout.appender();
    assert_eq!(
        appender.append(1, &foo_bar(), 1, 1.0).await,
        Err(AppendError::Closed)
    );
}

#[tokio::test]
async fn test_fanout_update_children() {
    let store = Arc::new(LabelStore::default());
    let first = Recorder::default();
    let second = Recorder::default();
    let fanout = Fanout::new(store, vec![Arc::new(first.clone())]);

    let mut old = fanout.appender();
    fanout.update_children(vec![Arc::new(second.clone())]);
    let mut new = fanout.appender();

    old.append(1, &foo_bar(), 1, 1.0).await.unwrap();
    old.commit().await.unwrap();
    new.append(1, &foo_bar(), 2, 2.0).await.unwrap();
    new.commit().await.unwrap();

    assert_eq!(first.committed().len(), 1);
    assert_eq!(second.committed().len(), 1);
    assert_eq!(second.committed()[0].timestamp, 2);
}

#[tokio::test]
async fn test_fanout_rollback() {
    let store = Arc::new(LabelStore::default());
    let child = Recorder::default();
    let fanout = Fanout::new(store, vec![Arc::new(child.clone())]);

    let mut appender = fanout.appender();
    appender.append(1, &foo_bar(), 1, 1.0).await.unwrap();
    appender.rollback().await.unwrap();

    assert!(child.committed().is_empty());
    assert_eq!(child.rollbacks(), 1);
}

#[tokio::test]
async fn test_unsupported_operations() {
    let child = Recorder::default();
    let mut appender = child.appender();

    let exemplar = Exemplar {
        labels: Labels::from_pairs([("trace_id", "abc")]),
        value: 1.0,
        timestamp: Some(1),
    };
    assert_eq!(
        appender.append_exemplar(1, &foo_bar(), &exemplar).await,
        Err(AppendError::Unsupported {
            operation: "append_exemplar"
        })
    );
    assert_eq!(
        appender
            .update_metadata(1, &foo_bar(), &Metadata::default())
            .await,
        Err(AppendError::unsupported("update_metadata"))
    );
    assert!(matches!(
        appender.append_histogram(1, &foo_bar(), 1, None, None).await,
        Err(AppendError::Unsupported { .. })
    ));
}

/// Drops every sample whose value is negative.
struct DropNegative;

#[async_trait]
impl AppendHook for DropNegative {
    async fn on_append(
        &self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        if value < 0.0 {
            return Ok(0);
        }
        next.append(series_ref, labels, timestamp, value).await
    }
}

#[tokio::test]
async fn test_interceptor_vetoes() {
    let child = Recorder::default();
    let interceptor = Interceptor::new(DropNegative, Some(Arc::new(child.clone())));

    let mut appender = interceptor.appender();
    appender.append(1, &foo_bar(), 1, -1.0).await.unwrap();
    appender.append(1, &foo_bar(), 2, 1.0).await.unwrap();
    appender.commit().await.unwrap();

    let committed = child.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].timestamp, 2);
}

#[tokio::test]
async fn test_interceptor_without_next() {
    let interceptor = Interceptor::new(DropNegative, None);

    let mut appender = interceptor.appender();
    assert_eq!(appender.append(9, &foo_bar(), 1, 1.0).await, Ok(0));
    appender.commit().await.unwrap();
}

#[tokio::test]
async fn test_interceptor_forwards_unsupported() {
    let child = Recorder::default();
    let interceptor = Interceptor::new(DropNegative, Some(Arc::new(child)));

    let mut appender = interceptor.appender();
    assert!(matches!(
        appender
            .update_metadata(1, &foo_bar(), &Metadata::default())
            .await,
        Err(AppendError::Unsupported { .. })
    ));
}
