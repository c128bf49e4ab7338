use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sluice_identity::LabelStore;
use sluice_labels::{Exemplar, FloatHistogram, Histogram, Labels, Metadata};
use sluice_log::LogError;

use crate::statsd::AppendCounters;
use crate::{AppendError, Appendable, Appender};

/// A float sample as passed through the appender chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Reference id of the series.
    pub series_ref: u64,
    /// Labels of the series.
    pub labels: Labels,
    /// Timestamp in milliseconds.
    pub timestamp: i64,
    /// Sample value.
    pub value: f64,
}

/// Function that can rewrite or drop samples before a [`Fanout`] forwards them.
///
/// Returning `Ok(None)` drops the sample silently.
pub type InterceptFn =
    dyn Fn(u64, &Labels, i64, f64) -> Result<Option<Sample>, AppendError> + Send + Sync;

/// An appendable backed by any number of children.
///
/// The appender of a fan-out resolves the global id of every series that arrives without a
/// reference and forwards all data to every child. Errors of individual children do not stop
/// delivery to the others and are not returned to the producer. They are logged and counted in
/// the `append.fanout.child_error` metric instead.
pub struct Fanout {
    store: Arc<LabelStore>,
    children: RwLock<Vec<Arc<dyn Appendable>>>,
    intercept: Option<Arc<InterceptFn>>,
}

impl Fanout {
    /// Creates a fan-out forwarding to the given children.
    pub fn new(store: Arc<LabelStore>, children: Vec<Arc<dyn Appendable>>) -> Self {
        Self {
            store,
            children: RwLock::new(children),
            intercept: None,
        }
    }

    /// Sets a function invoked for every float sample before it is forwarded.
    pub fn with_intercept<F>(mut self, intercept: F) -> Self
    where
        F: Fn(u64, &Labels, i64, f64) -> Result<Option<Sample>, AppendError>
            + Send
            + Sync
            + 'static,
    {
        self.intercept = Some(Arc::new(intercept));
        self
    }

    /// Replaces the children.
    ///
    /// Appenders created before the update keep forwarding to the previous children.
    pub fn update_children(&self, children: Vec<Arc<dyn Appendable>>) {
        *self.children.write() = children;
    }

    /// Returns the number of children.
    pub fn children_count(&self) -> usize {
        self.children.read().len()
    }
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout")
            .field("children", &self.children_count())
            .field("intercept", &self.intercept.is_some())
            .finish()
    }
}

impl Appendable for Fanout {
    fn appender(&self) -> Box<dyn Appender> {
        let children = self
            .children
            .read()
            .iter()
            .map(|child| child.appender())
            .collect();

        Box::new(FanoutAppender {
            store: self.store.clone(),
            children,
            intercept: self.intercept.clone(),
        })
    }
}

struct FanoutAppender {
    store: Arc<LabelStore>,
    children: Vec<Box<dyn Appender>>,
    intercept: Option<Arc<InterceptFn>>,
}

impl FanoutAppender {
    fn resolve(&self, series_ref: u64, labels: &Labels) -> u64 {
        match series_ref {
            0 => self.store.get_or_add_global_ref_id(labels),
            series_ref => series_ref,
        }
    }
}

fn child_error(operation: &'static str, error: AppendError) {
    sluice_log::debug!("fan-out child failed to {operation}: {}", LogError(&error));
    sluice_statsd::metric!(
        counter(AppendCounters::FanoutChildError) += 1,
        operation = operation,
    );
}

#[async_trait]
impl Appender for FanoutAppender {
    async fn append(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<u64, AppendError> {
        let series_ref = self.resolve(series_ref, labels);

        let rewritten;
        let (series_ref, labels, timestamp, value) = match &self.intercept {
            Some(intercept) => match intercept(series_ref, labels, timestamp, value)? {
                Some(sample) => {
                    rewritten = sample;
                    (
                        rewritten.series_ref,
                        &rewritten.labels,
                        rewritten.timestamp,
                        rewritten.value,
                    )
                }
                None => {
                    sluice_statsd::metric!(counter(AppendCounters::FanoutDropped) += 1);
                    return Ok(series_ref);
                }
            },
            None => (series_ref, labels, timestamp, value),
        };

        for child in &mut self.children {
            if let Err(error) = child.append(series_ref, labels, timestamp, value).await {
                child_error("append", error);
            }
        }

        Ok(series_ref)
    }

    async fn append_exemplar(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        exemplar: &Exemplar,
    ) -> Result<u64, AppendError> {
        let series_ref = self.resolve(series_ref, labels);

        for child in &mut self.children {
            if let Err(error) = child.append_exemplar(series_ref, labels, exemplar).await {
                child_error("append_exemplar", error);
            }
        }

        Ok(series_ref)
    }

    async fn append_histogram(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
    ) -> Result<u64, AppendError> {
        let series_ref = self.resolve(series_ref, labels);

        for child in &mut self.children {
            if let Err(error) = child
                .append_histogram(series_ref, labels, timestamp, histogram, float_histogram)
                .await
            {
                child_error("append_histogram", error);
            }
        }

        Ok(series_ref)
    }

    async fn update_metadata(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        metadata: &Metadata,
    ) -> Result<u64, AppendError> {
        let series_ref = self.resolve(series_ref, labels);

        for child in &mut self.children {
            if let Err(error) = child.update_metadata(series_ref, labels, metadata).await {
                child_error("update_metadata", error);
            }
        }

        Ok(series_ref)
    }

    async fn commit(&mut self) -> Result<(), AppendError> {
        for child in &mut self.children {
            if let Err(error) = child.commit().await {
                child_error("commit", error);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppendError> {
        for child in &mut self.children {
            if let Err(error) = child.rollback().await {
                child_error("rollback", error);
            }
        }
        Ok(())
    }
}
